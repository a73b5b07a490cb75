use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use serde::Serialize;

const TRUNCATION_MARKER: &str = "\n[...truncated...]\n";

/// Exit status and captured output of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// The last `lines` lines of stderr, for error summaries.
    #[must_use]
    pub fn stderr_tail(&self, lines: usize) -> String {
        tail(&self.stderr, lines)
    }
}

pub(crate) fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Runs `program` to completion and captures stdout/stderr.
///
/// A non-zero exit is reported through [`RunOutput::code`], never as an
/// error. Each stream keeps at most `capture_limit` trailing bytes. An env
/// pair with an empty value removes the variable from the child environment.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or its streams cannot
/// be read.
pub fn run_command(
    program: impl AsRef<OsStr>,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
    capture_limit: usize,
) -> io::Result<RunOutput> {
    let mut command = Command::new(program);
    command.args(args);
    for (key, value) in envs {
        if value.is_empty() {
            command.env_remove(key);
        } else {
            command.env(key, value);
        }
    }
    command.current_dir(cwd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout pipe missing"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr pipe missing"))?;
    // Both pipes are drained concurrently so a chatty child cannot block on a
    // full buffer.
    let stdout_handle = thread::spawn(move || read_to_string_limited(stdout, capture_limit));
    let stderr_handle = thread::spawn(move || read_to_string_limited(stderr, capture_limit));

    let status = child.wait()?;
    let stdout = stdout_handle
        .join()
        .map_err(|_| io::Error::other("stdout reader panicked"))??;
    let stderr = stderr_handle
        .join()
        .map_err(|_| io::Error::other("stderr reader panicked"))??;
    Ok(RunOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn read_to_string_limited(mut reader: impl Read, limit: usize) -> io::Result<String> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        append_limited(&mut buffer, &chunk[..read], limit, &mut truncated);
    }
    let mut text = String::from_utf8_lossy(&buffer).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    Ok(text)
}

/// Keeps the newest `limit` bytes; build failures print their cause last.
fn append_limited(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize, truncated: &mut bool) {
    if limit == 0 {
        *truncated |= !chunk.is_empty();
        return;
    }
    if buffer.len().saturating_add(chunk.len()) <= limit {
        buffer.extend_from_slice(chunk);
        return;
    }
    *truncated = true;
    let excess = buffer.len().saturating_add(chunk.len()) - limit;
    if excess >= buffer.len() {
        let from_chunk = excess - buffer.len();
        buffer.clear();
        buffer.extend_from_slice(&chunk[from_chunk..]);
    } else {
        buffer.drain(..excess);
        buffer.extend_from_slice(chunk);
    }
}
