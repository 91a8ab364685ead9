//! Source synchronization: bring a work order's source directory to the tip of
//! its branch.
//!
//! The sequence is fixed: prepare workspace, ensure cloned, fetch, hard reset,
//! clean, checkout, pull. Every step reports before it runs and the first
//! failure ends the sequence. Re-running on an up-to-date working copy repeats
//! the same steps and leaves the source tree unchanged.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::core::types::CommitInfo;
use crate::error::{CommandError, Operation, PipelineError, Result, Stage};
use crate::io::git::VersionControl;
use crate::io::output::OutputSink;
use crate::io::workspace::prepare_workspace;
use crate::order::WorkOrder;

/// Upper bound on commits collected for release notes.
const MAX_RELEASE_COMMITS: usize = 100;

/// Synchronize `order`'s source directory with its repository and branch.
///
/// On success `order.commit_info` holds the commits the pull brought in, or
/// the current `HEAD` commit if nothing changed.
#[instrument(skip_all, fields(package = %order.package, branch = %order.branch))]
pub fn get_source<V>(order: &mut WorkOrder, sink: &OutputSink, vcs: &V) -> Result<()>
where
    V: VersionControl + ?Sized,
{
    prepare_workspace(order, sink)?;

    let steps = Steps {
        package: &order.package,
        dir: order.source_dir(),
        sink,
    };
    let dir = steps.dir;

    if !vcs.is_repo(dir) {
        if dir.try_exists().unwrap_or(true) {
            steps.report(&format!(
                "[{}] Removing git repository directory [{}].",
                steps.package,
                dir.display()
            ))?;
            remove_path(dir).map_err(|e| {
                PipelineError::new(Stage::Setup, Operation::RemoveSourceDir, steps.package, dir, e)
            })?;
        }
        steps.run(
            Operation::Clone,
            &format!(
                "[{}] Cloning git repository [{}] into directory [{}].",
                steps.package,
                order.repo,
                dir.display()
            ),
            || vcs.clone_repo(&order.repo, dir),
        )?;
    }

    steps.run(
        Operation::Fetch,
        &format!("[{}] Fetching source code in directory [{}].", steps.package, dir.display()),
        || vcs.fetch(dir),
    )?;
    steps.run(
        Operation::Reset,
        &format!(
            "[{}] Hard resetting git repository in directory [{}].",
            steps.package,
            dir.display()
        ),
        || vcs.reset_hard(dir),
    )?;
    steps.run(
        Operation::Clean,
        &format!("[{}] Cleaning repository in directory [{}].", steps.package, dir.display()),
        || vcs.clean(dir),
    )?;
    steps.run(
        Operation::Checkout,
        &format!(
            "[{}] Checking out branch [{}] in directory [{}].",
            steps.package,
            order.branch,
            dir.display()
        ),
        || vcs.checkout(dir, &order.branch),
    )?;

    let before = vcs.head(dir).map_err(|e| steps.fail(Operation::Log, e))?;

    steps.run(
        Operation::Pull,
        &format!(
            "[{}] Pulling new changes into branch [{}] in directory [{}].",
            steps.package,
            order.branch,
            dir.display()
        ),
        || vcs.pull(dir),
    )?;

    let commits = released_commits(vcs, dir, &before).map_err(|e| steps.fail(Operation::Log, e))?;
    info!(count = commits.len(), "source synchronized");
    order.commit_info = commits;
    Ok(())
}

/// Commits in `before..HEAD`, falling back to `HEAD` alone when the pull was a no-op.
fn released_commits<V>(vcs: &V, dir: &Path, before: &str) -> Result<Vec<CommitInfo>, CommandError>
where
    V: VersionControl + ?Sized,
{
    let range = format!("{before}..HEAD");
    let commits = vcs.log(dir, &range, MAX_RELEASE_COMMITS)?;
    if !commits.is_empty() {
        return Ok(commits);
    }
    debug!("pull brought no new commits");
    vcs.log(dir, "HEAD", 1)
}

/// Remove whatever sits at `path`: a directory tree, a file or a symlink.
fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Shared context for the sync steps of one work order.
struct Steps<'a> {
    package: &'a str,
    dir: &'a Path,
    sink: &'a OutputSink,
}

impl Steps<'_> {
    fn report(&self, message: &str) -> Result<()> {
        self.sink.progress(self.package, self.dir, message)
    }

    /// Report `message`, then run `op`, wrapping its failure as `operation`.
    fn run<F>(&self, operation: Operation, message: &str, op: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), CommandError>,
    {
        self.report(message)?;
        op().map_err(|e| self.fail(operation, e))
    }

    fn fail(&self, operation: Operation, cause: CommandError) -> PipelineError {
        PipelineError::new(Stage::Sync, operation, self.package, self.dir, cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BrokenWriter, ScriptedVcs, SharedBuffer, TestLayout, VcsCall};

    #[test]
    fn fresh_workspace_clones_then_runs_every_step_in_order() {
        let layout = TestLayout::new();
        let mut order = layout.order("github.com/acme/svc", "release/1.2");
        let buffer = SharedBuffer::default();
        let sink = OutputSink::new(buffer.clone());
        let vcs = ScriptedVcs::default();

        get_source(&mut order, &sink, &vcs).expect("sync");

        assert_eq!(
            vcs.operations(),
            vec![
                Operation::Clone,
                Operation::Fetch,
                Operation::Reset,
                Operation::Clean,
                Operation::Checkout,
                Operation::Pull,
            ]
        );
        assert!(vcs.calls().contains(&VcsCall::Checkout("release/1.2".to_string())));
        let out = buffer.contents();
        let clone = out.find("Cloning git repository").expect("clone reported");
        let pull = out
            .find("Pulling new changes into branch [release/1.2]")
            .expect("pull reported");
        assert!(clone < pull);
    }

    #[test]
    fn existing_working_copy_is_not_recloned() {
        let layout = TestLayout::new();
        let mut order = layout.order("svc", "main");
        let sink = OutputSink::new(SharedBuffer::default());
        let vcs = ScriptedVcs::default();

        get_source(&mut order, &sink, &vcs).expect("first sync");
        get_source(&mut order, &sink, &vcs).expect("second sync");

        let clones = vcs
            .operations()
            .into_iter()
            .filter(|op| *op == Operation::Clone)
            .count();
        assert_eq!(clones, 1);
    }

    #[test]
    fn failed_fetch_stops_before_checkout_and_pull() {
        let layout = TestLayout::new();
        let mut order = layout.order("svc", "main");
        let sink = OutputSink::new(SharedBuffer::default());
        let vcs = ScriptedVcs::default().fail_on(Operation::Fetch);

        let err = get_source(&mut order, &sink, &vcs).expect_err("fetch fails");

        assert_eq!(err.stage, Stage::Sync);
        assert_eq!(err.operation, Operation::Fetch);
        assert_eq!(err.path, order.source_dir());
        assert!(err.to_string().starts_with("[svc] fetch failed in ["));
        let ops = vcs.operations();
        assert!(!ops.contains(&Operation::Checkout));
        assert!(!ops.contains(&Operation::Pull));
    }

    #[test]
    fn no_new_commits_falls_back_to_head() {
        let layout = TestLayout::new();
        let mut order = layout.order("svc", "main");
        let sink = OutputSink::new(SharedBuffer::default());
        let vcs = ScriptedVcs::default();

        get_source(&mut order, &sink, &vcs).expect("sync");

        assert_eq!(order.commit_info.len(), 1);
        assert_eq!(order.commit_info[0].commit, ScriptedVcs::HEAD);
    }

    #[test]
    fn stray_non_repo_source_dir_is_replaced() {
        let layout = TestLayout::new();
        let mut order = layout.order("svc", "main");
        layout.write(&order.source_dir().join("junk.txt"), "left behind");
        let buffer = SharedBuffer::default();
        let sink = OutputSink::new(buffer.clone());
        let vcs = ScriptedVcs::default();

        get_source(&mut order, &sink, &vcs).expect("sync");

        assert!(!order.source_dir().join("junk.txt").exists());
        assert!(buffer.contents().contains("Removing git repository directory"));
    }

    #[test]
    fn file_at_source_path_is_replaced_by_a_clone() {
        let layout = TestLayout::new();
        let mut order = layout.order("acme/svc", "main");
        layout.write(order.source_dir(), "not a checkout");
        let buffer = SharedBuffer::default();
        let sink = OutputSink::new(buffer.clone());
        let vcs = ScriptedVcs::default();

        get_source(&mut order, &sink, &vcs).expect("sync");

        assert!(order.source_dir().join(".git").is_dir());
        assert!(buffer.contents().contains("Removing git repository directory"));
        assert_eq!(vcs.operations()[0], Operation::Clone);
    }

    #[test]
    fn failed_report_stops_before_the_reported_step() {
        let layout = TestLayout::new();
        let mut order = layout.order("svc", "main");
        let vcs = ScriptedVcs::default();
        get_source(&mut order, &OutputSink::new(SharedBuffer::default()), &vcs).expect("seed");
        let calls_before = vcs.calls().len();

        let err = get_source(&mut order, &OutputSink::new(BrokenWriter), &vcs)
            .expect_err("report fails");

        assert_eq!(err.stage, Stage::Report);
        assert_eq!(err.operation, Operation::Report);
        assert_eq!(err.path, order.source_dir());
        assert_eq!(vcs.calls().len(), calls_before);
    }
}
