//! Version-control adapter for the source synchronizer.
//!
//! Every operation points git explicitly at one working copy with
//! `--work-tree=<dir> --git-dir=<dir>/.git`, so the worker's own current
//! directory never matters.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::core::types::CommitInfo;
use crate::error::CommandError;
use crate::io::process::{CommandSpec, run_checked};

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const LOG_FORMAT: &str = "--format=%s%x1f%H%x1f%an%x1f%ad%x1e";
const LOG_DATE: &str = "--date=format:%B %d, %Y at %I:%M:%S %p %z";

/// Version-control operations the synchronizer depends on.
///
/// Each call blocks until the underlying command exits.
pub trait VersionControl {
    /// True if `dir` is already a working copy.
    fn is_repo(&self, dir: &Path) -> bool;
    fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), CommandError>;
    fn fetch(&self, dir: &Path) -> Result<(), CommandError>;
    /// Discard local modifications to tracked files.
    fn reset_hard(&self, dir: &Path) -> Result<(), CommandError>;
    /// Remove untracked files and directories.
    fn clean(&self, dir: &Path) -> Result<(), CommandError>;
    fn checkout(&self, dir: &Path, branch: &str) -> Result<(), CommandError>;
    fn pull(&self, dir: &Path) -> Result<(), CommandError>;
    /// Full commit id of `HEAD`.
    fn head(&self, dir: &Path) -> Result<String, CommandError>;
    /// Up to `max_count` commits in `range`, newest first.
    fn log(
        &self,
        dir: &Path,
        range: &str,
        max_count: usize,
    ) -> Result<Vec<CommitInfo>, CommandError>;
}

/// [`VersionControl`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command scoped to the working copy at `dir`.
    fn scoped(&self, dir: &Path) -> CommandSpec {
        let mut work_tree = std::ffi::OsString::from("--work-tree=");
        work_tree.push(dir);
        let mut git_dir = std::ffi::OsString::from("--git-dir=");
        git_dir.push(dir.join(".git"));
        CommandSpec::new(&self.program)
            .arg(work_tree)
            .arg(git_dir)
            .timeout(self.timeout)
    }

    fn run_scoped(&self, dir: &Path, args: &[&str]) -> Result<String, CommandError> {
        let spec = self.scoped(dir).args(args);
        let output = run_checked(&spec)?;
        Ok(output.stdout_lossy())
    }
}

impl VersionControl for GitCli {
    fn is_repo(&self, dir: &Path) -> bool {
        dir.join(".git").exists()
    }

    #[instrument(skip_all, fields(url, dir = %dir.display()))]
    fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), CommandError> {
        let spec = CommandSpec::new(&self.program)
            .arg("clone")
            .arg(url)
            .arg(dir)
            .timeout(self.timeout);
        run_checked(&spec)?;
        debug!("clone complete");
        Ok(())
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    fn fetch(&self, dir: &Path) -> Result<(), CommandError> {
        self.run_scoped(dir, &["fetch"]).map(drop)
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    fn reset_hard(&self, dir: &Path) -> Result<(), CommandError> {
        self.run_scoped(dir, &["reset", "--hard"]).map(drop)
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    fn clean(&self, dir: &Path) -> Result<(), CommandError> {
        self.run_scoped(dir, &["clean", "-f", "-d"]).map(drop)
    }

    #[instrument(skip_all, fields(dir = %dir.display(), branch))]
    fn checkout(&self, dir: &Path, branch: &str) -> Result<(), CommandError> {
        self.run_scoped(dir, &["checkout", branch]).map(drop)
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    fn pull(&self, dir: &Path) -> Result<(), CommandError> {
        self.run_scoped(dir, &["pull"]).map(drop)
    }

    fn head(&self, dir: &Path) -> Result<String, CommandError> {
        let out = self.run_scoped(dir, &["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    fn log(
        &self,
        dir: &Path,
        range: &str,
        max_count: usize,
    ) -> Result<Vec<CommitInfo>, CommandError> {
        let max = format!("--max-count={max_count}");
        let out = self.run_scoped(dir, &["log", &max, LOG_DATE, LOG_FORMAT, range])?;
        let commits = parse_log(&out);
        debug!(range, count = commits.len(), "collected commits");
        Ok(commits)
    }
}

/// Parse `git log` output produced with [`LOG_FORMAT`].
///
/// Records with the wrong number of fields are skipped.
pub fn parse_log(output: &str) -> Vec<CommitInfo> {
    output
        .split(RECORD_SEP)
        .map(|record| record.trim_matches(|c: char| c == '\n' || c == '\r'))
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let fields: Vec<&str> = record.split(FIELD_SEP).collect();
            match fields.as_slice() {
                [description, commit, author, date] => Some(CommitInfo {
                    description: description.to_string(),
                    commit: commit.to_string(),
                    author: author.to_string(),
                    date: date.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_records() {
        let out = concat!(
            "Fix defect\u{1f}0f69a1de\u{1f}eschw\u{1f}July 05, 2016 at 10:07:07 AM -0400\u{1e}\n",
            "Initial commit\u{1f}1a2b3c4d\u{1f}ops\u{1f}July 04, 2016 at 09:00:00 AM -0400\u{1e}\n",
        );
        let commits = parse_log(out);
        assert_eq!(commits.len(), 2);
        assert_eq!(
            commits[0],
            CommitInfo {
                description: "Fix defect".to_string(),
                commit: "0f69a1de".to_string(),
                author: "eschw".to_string(),
                date: "July 05, 2016 at 10:07:07 AM -0400".to_string(),
            }
        );
        assert_eq!(commits[1].commit, "1a2b3c4d");
    }

    #[test]
    fn skips_malformed_records_and_empty_output() {
        assert!(parse_log("").is_empty());
        assert!(parse_log("\n").is_empty());
        let commits = parse_log("only\u{1f}two\u{1e}\nok\u{1f}abc\u{1f}me\u{1f}today\u{1e}");
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].description, "ok");
    }

    #[test]
    fn detects_working_copy_by_metadata_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = GitCli::default();
        assert!(!git.is_repo(temp.path()));
        std::fs::create_dir(temp.path().join(".git")).expect("mkdir");
        assert!(git.is_repo(temp.path()));
    }
}
