//! Child processes with a wall-clock limit and bounded output capture.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How much of stderr to quote in a one-line failure message.
const FAILURE_TAIL_BYTES: usize = 400;

/// Bytes kept from one output stream, plus how many were discarded past the limit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: u64,
}

impl Captured {
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Result of a finished (or killed) child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
    /// The limit the command ran under.
    pub timeout: Duration,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.status.success() && !self.timed_out
    }

    /// One line saying why the command failed, suitable for a run record.
    pub fn failure_message(&self) -> String {
        if self.timed_out {
            return format!("timed out after {}s", self.timeout.as_secs());
        }
        let code = match self.status.code() {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        };
        match stderr_tail(&self.stderr.bytes, FAILURE_TAIL_BYTES) {
            tail if tail.is_empty() => format!("exit status {code}"),
            tail => format!("exit status {code}: {tail}"),
        }
    }

    /// Both streams as a log file body, noting truncation and timeouts.
    pub fn log_text(&self) -> String {
        let mut text = String::new();
        for (name, stream) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            text.push_str(&format!("=== {name} ===\n"));
            text.push_str(&String::from_utf8_lossy(&stream.bytes));
            if !text.ends_with('\n') {
                text.push('\n');
            }
            if stream.dropped > 0 {
                text.push_str(&format!("[{name} truncated, {} bytes dropped]\n", stream.dropped));
            }
        }
        if self.timed_out {
            text.push_str(&format!("[killed after {}s]\n", self.timeout.as_secs()));
        }
        text
    }
}

/// Build a `Command` from an argv vector such as `["aws", "sts", "get-caller-identity"]`.
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let Some((program, args)) = argv.split_first() else {
        return Err(anyhow!("empty command"));
    };
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Run `cmd` to completion or until `timeout`, keeping at most `limit` bytes per stream.
///
/// Both pipes are drained on their own threads for the whole lifetime of the
/// child, so a chatty tool can never block on a full pipe. Stdin is closed so
/// a tool that prompts fails instead of hanging.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    limit: usize,
) -> Result<CommandOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;

    let stdout = spawn_drain(child.stdout.take(), limit);
    let stderr = spawn_drain(child.stderr.take(), limit);
    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;
    let stdout = collect(stdout).context("capture stdout")?;
    let stderr = collect(stderr).context("capture stderr")?;

    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "child output truncated"
        );
    }
    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
        timeout,
    })
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for child")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "child exceeded its time limit, killing it");
    child.kill().context("kill child")?;
    let status = child.wait().context("reap killed child")?;
    Ok((status, true))
}

fn spawn_drain<R>(stream: Option<R>, limit: usize) -> JoinHandle<io::Result<Captured>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || match stream {
        Some(stream) => drain_bounded(stream, limit),
        None => Ok(Captured::default()),
    })
}

/// Keep the first `limit` bytes and count the rest while reading to EOF.
fn drain_bounded<R: Read>(mut stream: R, limit: usize) -> io::Result<Captured> {
    let mut bytes = Vec::new();
    stream.by_ref().take(limit as u64).read_to_end(&mut bytes)?;
    let dropped = io::copy(&mut stream, &mut io::sink())?;
    Ok(Captured { bytes, dropped })
}

fn collect(handle: JoinHandle<io::Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader panicked"))?
        .context("read child output")
}

/// Last `max_bytes` of stderr as a single whitespace-collapsed line.
fn stderr_tail(stderr: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= max_bytes {
        return flat;
    }
    let mut start = flat.len() - max_bytes;
    while !flat.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &flat[start..])
}
