//! Side-effecting operations over the state directory and child processes.

pub mod account;
pub mod catalog;
pub mod config;
pub mod fsutil;
pub mod history;
pub mod init;
pub mod interrupt;
pub mod lock;
pub mod process;
pub mod run_store;
pub mod tool;
