//! Error taxonomy for the work-order pipeline.
//!
//! Every failure that crosses a stage boundary is a [`PipelineError`] carrying
//! the stage, the operation, the package and the directory involved, so callers
//! can branch on [`Stage`] or [`Operation`] without matching on strings.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Base, workspace or source directory could not be created or cleaned.
    Setup,
    /// A version-control step failed.
    Sync,
    /// A package's test run failed or could not be started.
    Test,
    /// The output sink refused a progress write.
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Sync => "sync",
            Stage::Test => "test",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

/// The operation that failed inside a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateBaseDir,
    CreateSourceDir,
    WalkWorkspace,
    RemoveStale,
    RemoveSourceDir,
    Clone,
    Fetch,
    Reset,
    Clean,
    Checkout,
    Pull,
    Log,
    ListDir,
    RunTests,
    Report,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateBaseDir => "create base directory",
            Operation::CreateSourceDir => "create source directory",
            Operation::WalkWorkspace => "walk workspace",
            Operation::RemoveStale => "remove",
            Operation::RemoveSourceDir => "remove source directory",
            Operation::Clone => "clone",
            Operation::Fetch => "fetch",
            Operation::Reset => "reset",
            Operation::Clean => "clean",
            Operation::Checkout => "checkout",
            Operation::Pull => "pull",
            Operation::Log => "log",
            Operation::ListDir => "list directory",
            Operation::RunTests => "run tests",
            Operation::Report => "report",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an external program invocation.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("spawn {command}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o with {command}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} exited with {}{}", exit_label(.code), stderr_suffix(.stderr_tail))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("{command} timed out after {}s", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

fn stderr_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {tail}")
    }
}

/// Underlying cause of a [`PipelineError`].
#[derive(Debug, thiserror::Error)]
pub enum Cause {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// A stage failure annotated with work-order context.
#[derive(Debug, thiserror::Error)]
#[error("[{package}] {operation} failed in [{}]", .path.display())]
pub struct PipelineError {
    pub stage: Stage,
    pub operation: Operation,
    pub package: String,
    pub path: PathBuf,
    #[source]
    pub cause: Cause,
}

impl PipelineError {
    pub fn new(
        stage: Stage,
        operation: Operation,
        package: impl Into<String>,
        path: impl Into<PathBuf>,
        cause: impl Into<Cause>,
    ) -> Self {
        Self {
            stage,
            operation,
            package: package.into(),
            path: path.into(),
            cause: cause.into(),
        }
    }

    /// Output sink rejected a write while reporting progress about `path`.
    pub fn report(package: impl Into<String>, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::new(Stage::Report, Operation::Report, package, path, source)
    }

    /// Render the error with its full source chain (`outer: inner: root`).
    pub fn chain(&self) -> String {
        display_chain(self)
    }
}

/// Join an error and all of its sources with `": "`.
pub fn display_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut next = err.source();
    while let Some(cause) = next {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        next = cause.source();
    }
    msg
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
