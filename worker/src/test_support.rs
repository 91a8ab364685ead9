//! Test helpers: capture buffers, scripted collaborators and scratch layouts.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::TempDir;

use crate::core::types::CommitInfo;
use crate::error::{CommandError, Operation};
use crate::io::git::VersionControl;
use crate::io::output::OutputSink;
use crate::io::unit_tests::{TestInvoker, TestRequest};
use crate::order::{WorkOrder, WorkOrderRequest};

/// In-memory writer that remembers every `write` call as a separate chunk.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SharedBuffer {
    /// One entry per `write` call, in call order.
    pub fn chunks(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }

    pub fn contents(&self) -> String {
        self.chunks().concat()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer whose every write fails, as a closed pipe would.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokenWriter;

impl Write for BrokenWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "output closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A sink writing into a fresh [`SharedBuffer`].
pub fn capture_sink() -> (OutputSink, SharedBuffer) {
    let buffer = SharedBuffer::default();
    (OutputSink::new(buffer.clone()), buffer)
}

/// A call received by [`ScriptedVcs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    Clone(String),
    Fetch,
    Reset,
    Clean,
    Checkout(String),
    Pull,
    Head,
    Log(String),
}

impl VcsCall {
    fn operation(&self) -> Operation {
        match self {
            VcsCall::Clone(_) => Operation::Clone,
            VcsCall::Fetch => Operation::Fetch,
            VcsCall::Reset => Operation::Reset,
            VcsCall::Clean => Operation::Clean,
            VcsCall::Checkout(_) => Operation::Checkout,
            VcsCall::Pull => Operation::Pull,
            VcsCall::Head | VcsCall::Log(_) => Operation::Log,
        }
    }
}

/// [`VersionControl`] that records calls and fails on request.
///
/// Cloning creates `<dir>/.git` so later runs see a working copy.
#[derive(Debug, Default)]
pub struct ScriptedVcs {
    calls: Mutex<Vec<VcsCall>>,
    fail_on: Option<Operation>,
    new_commits: Vec<CommitInfo>,
}

impl ScriptedVcs {
    /// Commit id reported for `HEAD`.
    pub const HEAD: &'static str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

    pub fn fail_on(mut self, operation: Operation) -> Self {
        self.fail_on = Some(operation);
        self
    }

    /// Commits returned for a `before..HEAD` range.
    pub fn with_new_commits(mut self, commits: Vec<CommitInfo>) -> Self {
        self.new_commits = commits;
        self
    }

    pub fn calls(&self) -> Vec<VcsCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Operations that change the working copy, in call order.
    pub fn operations(&self) -> Vec<Operation> {
        self.calls()
            .iter()
            .map(VcsCall::operation)
            .filter(|op| *op != Operation::Log)
            .collect()
    }

    fn record(&self, call: VcsCall) -> Result<(), CommandError> {
        let operation = call.operation();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if self.fail_on == Some(operation) {
            return Err(CommandError::Failed {
                command: format!("git {operation}"),
                code: Some(128),
                stderr_tail: "fatal: scripted failure".to_string(),
            });
        }
        Ok(())
    }

    pub fn head_commit() -> CommitInfo {
        CommitInfo {
            description: "Current head".to_string(),
            commit: Self::HEAD.to_string(),
            author: "worker".to_string(),
            date: "January 01, 2024 at 12:00:00 AM +0000".to_string(),
        }
    }
}

impl VersionControl for ScriptedVcs {
    fn is_repo(&self, dir: &Path) -> bool {
        dir.join(".git").is_dir()
    }

    fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), CommandError> {
        self.record(VcsCall::Clone(url.to_string()))?;
        fs::create_dir_all(dir.join(".git")).map_err(|source| CommandError::Io {
            command: "git clone".to_string(),
            source,
        })
    }

    fn fetch(&self, _dir: &Path) -> Result<(), CommandError> {
        self.record(VcsCall::Fetch)
    }

    fn reset_hard(&self, _dir: &Path) -> Result<(), CommandError> {
        self.record(VcsCall::Reset)
    }

    fn clean(&self, _dir: &Path) -> Result<(), CommandError> {
        self.record(VcsCall::Clean)
    }

    fn checkout(&self, _dir: &Path, branch: &str) -> Result<(), CommandError> {
        self.record(VcsCall::Checkout(branch.to_string()))
    }

    fn pull(&self, _dir: &Path) -> Result<(), CommandError> {
        self.record(VcsCall::Pull)
    }

    fn head(&self, _dir: &Path) -> Result<String, CommandError> {
        self.record(VcsCall::Head)?;
        Ok(Self::HEAD.to_string())
    }

    fn log(
        &self,
        _dir: &Path,
        range: &str,
        max_count: usize,
    ) -> Result<Vec<CommitInfo>, CommandError> {
        self.record(VcsCall::Log(range.to_string()))?;
        if range == "HEAD" {
            return Ok(vec![Self::head_commit()]);
        }
        Ok(self.new_commits.iter().take(max_count).cloned().collect())
    }
}

/// [`TestInvoker`] that records packages and prints canned output.
#[derive(Debug, Default)]
pub struct ScriptedTests {
    packages: Mutex<Vec<String>>,
    output: String,
    failing: Vec<String>,
}

impl ScriptedTests {
    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    /// Make the run for `package` exit non-zero.
    pub fn fail_package(mut self, package: &str) -> Self {
        self.failing.push(package.to_string());
        self
    }

    /// Packages run so far, in call order.
    pub fn packages(&self) -> Vec<String> {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TestInvoker for ScriptedTests {
    fn run_tests(
        &self,
        request: &TestRequest<'_>,
        output: &mut Vec<u8>,
    ) -> Result<(), CommandError> {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.package.to_string());
        output.extend_from_slice(self.output.as_bytes());
        if self.failing.iter().any(|p| p == request.package) {
            return Err(CommandError::Failed {
                command: "go test".to_string(),
                code: Some(1),
                stderr_tail: String::new(),
            });
        }
        Ok(())
    }
}

/// Scratch directory holding a base directory for work orders.
pub struct TestLayout {
    temp: TempDir,
}

impl Default for TestLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLayout {
    pub fn new() -> Self {
        Self {
            temp: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Shared base directory; not created until a work order needs it.
    pub fn base_dir(&self) -> PathBuf {
        self.root().join("base")
    }

    pub fn request(&self, package: &str, branch: &str) -> WorkOrderRequest {
        WorkOrderRequest {
            repo: format!("https://git.example.com/{package}.git"),
            package: package.to_string(),
            branch: branch.to_string(),
            environment: "qa".to_string(),
            build_number: "1".to_string(),
        }
    }

    pub fn order(&self, package: &str, branch: &str) -> WorkOrder {
        WorkOrder::new(self.request(package, branch), &self.base_dir()).expect("valid package id")
    }

    /// Write `contents` to `path`, creating parent directories.
    pub fn write(&self, path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(path, contents).expect("write file");
    }
}
