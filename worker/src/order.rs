//! The work order: one build/test request and the state the pipeline records on it.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::core::path::{PackageIdError, validate_package_id, workspace_slug};
use crate::core::types::{CommitInfo, PackageTestResult};
use crate::error::PipelineError;

/// Caller-supplied description of a work order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrderRequest {
    /// Repository location handed to `git clone`.
    pub repo: String,
    /// Package identifier, e.g. `github.com/acme/billing`.
    pub package: String,
    pub branch: String,
    pub environment: String,
    pub build_number: String,
}

/// On-disk directories owned by a work order.
///
/// `source_dir` is strictly inside `workspace_dir`, which is strictly inside
/// `base_dir`. Everything under `workspace_dir` outside `source_dir` is
/// expendable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    /// Root shared by every work order's workspace.
    pub base_dir: PathBuf,
    /// This order's root; also the path-resolution root handed to the test tool.
    pub workspace_dir: PathBuf,
    /// Subtree managed by version control.
    pub source_dir: PathBuf,
}

impl WorkspaceLayout {
    /// Derive the layout for `package` under `base_dir`.
    ///
    /// `<base>/<slug>/src/<package>`: a single-segment workspace per package, with
    /// the source checked out at its import path beneath `src/`.
    pub fn for_package(
        base_dir: impl Into<PathBuf>,
        package: &str,
    ) -> Result<Self, PackageIdError> {
        validate_package_id(package)?;
        let base_dir = base_dir.into();
        let workspace_dir = base_dir.join(workspace_slug(package));
        let source_dir = workspace_dir.join("src").join(package);
        Ok(Self {
            base_dir,
            workspace_dir,
            source_dir,
        })
    }
}

/// One build/test request, mutated in place by each pipeline stage.
#[derive(Debug)]
pub struct WorkOrder {
    pub repo: String,
    pub package: String,
    pub branch: String,
    pub environment: String,
    pub build_number: String,
    pub layout: WorkspaceLayout,
    pub submit_time: DateTime<Local>,
    /// Time between submission and execution start.
    pub wait_duration: Option<Duration>,
    pub execute_start_time: Option<DateTime<Local>>,
    pub execution_duration: Option<Duration>,
    pub failed: bool,
    /// Terminal error; `None` on success.
    pub error: Option<PipelineError>,
    /// Commits brought in by the last synchronization.
    pub commit_info: Vec<CommitInfo>,
    /// Packages tested so far, in walk order (the last one may have failed).
    pub test_results: Vec<PackageTestResult>,
}

impl WorkOrder {
    /// Create a work order submitted now, with its workspace under `base_dir`.
    pub fn new(request: WorkOrderRequest, base_dir: &Path) -> Result<Self, PackageIdError> {
        let layout = WorkspaceLayout::for_package(base_dir, &request.package)?;
        Ok(Self {
            repo: request.repo,
            package: request.package,
            branch: request.branch,
            environment: request.environment,
            build_number: request.build_number,
            layout,
            submit_time: Local::now(),
            wait_duration: None,
            execute_start_time: None,
            execution_duration: None,
            failed: false,
            error: None,
            commit_info: Vec::new(),
            test_results: Vec::new(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.layout.base_dir
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.layout.workspace_dir
    }

    pub fn source_dir(&self) -> &Path {
        &self.layout.source_dir
    }

    /// Record the terminal error.
    pub fn fail(&mut self, err: PipelineError) {
        self.failed = true;
        self.error = Some(err);
    }
}

/// A work order the pipeline has finished with. Read-only from here on.
#[derive(Debug)]
pub struct CompletedWorkOrder(WorkOrder);

impl CompletedWorkOrder {
    pub fn into_inner(self) -> WorkOrder {
        self.0
    }
}

impl From<WorkOrder> for CompletedWorkOrder {
    fn from(order: WorkOrder) -> Self {
        Self(order)
    }
}

impl Deref for CompletedWorkOrder {
    type Target = WorkOrder;

    fn deref(&self) -> &WorkOrder {
        &self.0
    }
}
