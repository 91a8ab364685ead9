//! Workspace preparation: base directory, source directory, stale-entry purge.

use std::fs::{self, DirBuilder};
use std::io;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::core::path::is_strict_ancestor;
use crate::error::{Operation, PipelineError, Result, Stage};
use crate::io::output::OutputSink;
use crate::order::WorkOrder;

/// Guards the shared base directory's check-and-create.
///
/// Lives for the whole process. Held only inside [`create_base_dir`], never
/// across any other step, so unrelated work orders are not serialized.
static BASE_DIR_LOCK: Mutex<()> = Mutex::new(());

/// Create the shared base directory if it does not exist yet.
///
/// Returns `true` for the caller that created it and `false` when it already
/// existed by the time the lock was acquired.
pub fn create_base_dir(base_dir: &Path) -> io::Result<bool> {
    let _guard = BASE_DIR_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if base_dir.try_exists()? {
        return Ok(false);
    }
    owner_only_dir_builder().create(base_dir)?;
    Ok(true)
}

/// Make sure the order's directories exist and nothing stale surrounds the source.
///
/// A workspace whose source directory is missing is a normal first run.
/// Failures abort immediately; partial cleanup is left for the next run.
#[instrument(skip_all, fields(package = %order.package))]
pub fn prepare_workspace(order: &WorkOrder, sink: &OutputSink) -> Result<()> {
    let package = order.package.as_str();
    let base_dir = order.base_dir();
    let source_dir = order.source_dir();

    let base_exists =
        exists(base_dir).map_err(|e| setup_err(Operation::CreateBaseDir, package, base_dir, e))?;
    if !base_exists {
        sink.progress(
            package,
            base_dir,
            &format!(
                "[{package}] Missing base directory [{}]. Creating it now.",
                base_dir.display()
            ),
        )?;
        let created = create_base_dir(base_dir)
            .map_err(|e| setup_err(Operation::CreateBaseDir, package, base_dir, e))?;
        debug!(created, "base directory ensured");
    }

    let source_exists = exists(source_dir)
        .map_err(|e| setup_err(Operation::CreateSourceDir, package, source_dir, e))?;
    if !source_exists {
        sink.progress(
            package,
            source_dir,
            &format!(
                "[{package}] Missing repository directory structure [{}]. Creating it now.",
                source_dir.display()
            ),
        )?;
        owner_only_dir_builder()
            .recursive(true)
            .create(source_dir)
            .map_err(|e| setup_err(Operation::CreateSourceDir, package, source_dir, e))?;
    }

    remove_stale_entries(order, sink)
}

/// Remove every entry under the workspace that is not inside the source directory.
///
/// Ancestors of the source directory are descended into but kept; the source
/// directory itself is neither descended into nor removed. Symlinks are removed
/// as links.
fn remove_stale_entries(order: &WorkOrder, sink: &OutputSink) -> Result<()> {
    let package = order.package.as_str();
    let workspace_dir = order.workspace_dir();
    let source_dir = order.source_dir();

    let mut walk = WalkDir::new(workspace_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    let mut removed = 0usize;

    while let Some(entry) = walk.next() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(workspace_dir).to_path_buf();
            setup_err(Operation::WalkWorkspace, package, &path, e)
        })?;
        let path = entry.path();
        let is_dir = entry.file_type().is_dir();

        // walkdir skips the parent's remaining entries when asked to skip a file.
        if path == source_dir {
            if is_dir {
                walk.skip_current_dir();
            }
            continue;
        }
        if is_dir && is_strict_ancestor(path, source_dir) {
            continue;
        }

        sink.progress(
            package,
            path,
            &format!("[{package}] Removing [{}].", path.display()),
        )?;
        let result = if is_dir {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| setup_err(Operation::RemoveStale, package, path, e))?;
        removed += 1;
        if is_dir {
            walk.skip_current_dir();
        }
    }

    if removed > 0 {
        info!(removed, "removed stale workspace entries");
    }
    Ok(())
}

fn exists(path: &Path) -> io::Result<bool> {
    path.try_exists()
}

fn setup_err(
    operation: Operation,
    package: &str,
    path: &Path,
    cause: impl Into<crate::error::Cause>,
) -> PipelineError {
    PipelineError::new(Stage::Setup, operation, package, path, cause)
}

fn owner_only_dir_builder() -> DirBuilder {
    let mut builder = DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
}
