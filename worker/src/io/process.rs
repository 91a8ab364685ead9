//! Helpers for running external programs and capturing their output.
//!
//! stdout and stderr are drained concurrently on reader threads, so a chatty
//! child can never deadlock on a full pipe. Besides the two separate streams,
//! a `combined` buffer keeps both in arrival order for callers that report
//! them as one block.

use std::ffi::{OsStr, OsString};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::CommandError;

/// Lines of stderr kept in a [`CommandError::Failed`].
const STDERR_TAIL_LINES: usize = 20;

/// Description of an external program invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    env_remove: Vec<OsString>,
    current_dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    /// Drop an inherited variable before the overrides are applied.
    pub fn env_remove(mut self, key: impl AsRef<OsStr>) -> Self {
        self.env_remove.push(key.as_ref().to_owned());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Kill the child after `timeout`. `None` waits indefinitely.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn arg_list(&self) -> &[OsString] {
        &self.args
    }

    /// Short human-readable form used in errors: program name plus the first
    /// argument that is not a `--flag=value` scoping option.
    pub fn display(&self) -> String {
        let name = self
            .program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned();
        match self
            .args
            .iter()
            .map(|arg| arg.to_string_lossy())
            .find(|arg| !arg.starts_with("--"))
        {
            Some(sub) => format!("{name} {sub}"),
            None => name,
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for key in &self.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// stdout and stderr interleaved in the order chunks arrived.
    pub combined: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Turn a non-zero exit into [`CommandError::Failed`].
    pub fn check(self, spec: &CommandSpec) -> Result<Self, CommandError> {
        if self.status.success() {
            return Ok(self);
        }
        Err(CommandError::Failed {
            command: spec.display(),
            code: self.status.code(),
            stderr_tail: stderr_tail(&self.stderr, STDERR_TAIL_LINES),
        })
    }
}

/// Run `spec` to completion and capture its output.
///
/// A non-zero exit is *not* an error here; use [`CommandOutput::check`] or
/// [`run_checked`]. Spawn failures, pipe errors and timeouts are.
#[instrument(skip_all, fields(command = %spec.display()))]
pub fn run_command(spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
    let command = spec.display();
    let io_err = |source: std::io::Error| CommandError::Io {
        command: command.clone(),
        source,
    };

    let mut cmd = spec.to_command();
    if spec.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(CommandError::Spawn {
                command: command.clone(),
                source: e,
            });
        }
    };

    if let Some(input) = &spec.stdin {
        // Dropped at the end of the block so the child sees EOF.
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| io_err(std::io::Error::other("stdin was not piped")))?;
        child_stdin.write_all(input).map_err(io_err)?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_err(std::io::Error::other("stdout was not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_err(std::io::Error::other("stderr was not piped")))?;

    let combined = Arc::new(Mutex::new(Vec::new()));
    let stdout_handle = {
        let combined = Arc::clone(&combined);
        thread::spawn(move || read_stream(stdout, &combined))
    };
    let stderr_handle = {
        let combined = Arc::clone(&combined);
        thread::spawn(move || read_stream(stderr, &combined))
    };

    let mut timed_out = None;
    let status = match spec.timeout {
        None => child.wait().map_err(io_err)?,
        Some(timeout) => match child.wait_timeout(timeout).map_err(io_err)? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
                timed_out = Some(timeout);
                child.kill().map_err(io_err)?;
                child.wait().map_err(io_err)?
            }
        },
    };

    let stdout = join_output(stdout_handle).map_err(io_err)?;
    let stderr = join_output(stderr_handle).map_err(io_err)?;

    if let Some(timeout) = timed_out {
        return Err(CommandError::TimedOut { command, timeout });
    }

    let combined = std::mem::take(&mut *combined.lock().unwrap_or_else(|p| p.into_inner()));

    debug!(exit_code = ?status.code(), "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        combined,
    })
}

/// Run `spec` and fail on a non-zero exit.
pub fn run_checked(spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
    run_command(spec)?.check(spec)
}

fn join_output(
    handle: thread::JoinHandle<std::io::Result<Vec<u8>>>,
) -> std::io::Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::other("output reader thread panicked")),
    }
}

fn read_stream<R: Read>(mut reader: R, combined: &Mutex<Vec<u8>>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Ok(mut all) = combined.lock() {
            all.extend_from_slice(&chunk[..n]);
        }
    }

    Ok(buf)
}

/// Last `max_lines` non-empty lines of `stderr`, joined with `\n`.
fn stderr_tail(stderr: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
