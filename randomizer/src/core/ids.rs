//! Run id generation and input validation.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;

use crate::error::RandomizerError;

static RUN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}T\d{6}Z-[0-9a-f]{8}$").unwrap());
static ACCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{12}$").unwrap());
static REGION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d{1,2}$").unwrap());

/// Build a run id: UTC timestamp plus 4 random bytes in hex.
///
/// Ids sort chronologically as strings, which the run store relies on.
pub fn generate_run_id<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let suffix: [u8; 4] = rng.r#gen();
    format!("{}-{}", now.format("%Y%m%dT%H%M%SZ"), hex::encode(suffix))
}

/// Reject anything that is not a run id before it is used as a file name.
pub fn validate_run_id(run_id: &str) -> Result<(), RandomizerError> {
    if RUN_ID_RE.is_match(run_id) {
        return Ok(());
    }
    Err(RandomizerError::InvalidInput(format!(
        "invalid run id '{run_id}' (expected YYYYMMDDTHHMMSSZ-xxxxxxxx)"
    )))
}

pub fn validate_account(account: &str) -> Result<(), RandomizerError> {
    if ACCOUNT_RE.is_match(account) {
        return Ok(());
    }
    Err(RandomizerError::InvalidInput(format!(
        "invalid account id '{account}' (expected 12 digits)"
    )))
}

pub fn validate_region(region: &str) -> Result<(), RandomizerError> {
    if REGION_RE.is_match(region) {
        return Ok(());
    }
    Err(RandomizerError::InvalidInput(format!(
        "invalid region '{region}' (expected e.g. us-east-1)"
    )))
}
