//! Worker configuration, stored as TOML (`worker.toml` by default).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::TestFileMatcher;
use crate::io::git::GitCli;
use crate::io::unit_tests::{CommandTestInvoker, PACKAGE_PLACEHOLDER};

/// Worker configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Shared root of every work order's workspace.
    pub base_dir: PathBuf,

    /// Kill external commands after this many seconds. Unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,

    /// When set, progress is also appended to `<log_dir>/<package>-<build>.log`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    pub git: GitConfig,
    pub tests: TestsConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub program: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    pub program: PathBuf,
    /// Arguments; `{package}` is replaced with the package id.
    pub args: Vec<String>,
    /// Variable pointed at the workspace root for each run. Empty disables it.
    pub path_env: String,
    /// A directory is a test package if a child file name ends with this.
    pub test_file_suffix: String,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("go"),
            args: vec![
                "test".to_string(),
                "-v".to_string(),
                "-short".to_string(),
                format!("./{PACKAGE_PLACEHOLDER}"),
            ],
            path_env: "GOPATH".to_string(),
            test_file_suffix: "_test.go".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MailConfig {
    pub from: String,
    pub success_to: Vec<String>,
    pub failure_to: Vec<String>,
    pub cc: Vec<String>,
    pub sendmail_program: PathBuf,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: "build-worker@localhost".to_string(),
            success_to: Vec::new(),
            failure_to: Vec::new(),
            cc: Vec::new(),
            sendmail_program: PathBuf::from("/usr/sbin/sendmail"),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/var/lib/build-worker/workspaces"),
            command_timeout_secs: None,
            log_dir: None,
            git: GitConfig::default(),
            tests: TestsConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(anyhow!("base_dir must be set"));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(anyhow!("command_timeout_secs must be > 0 when set"));
        }
        if self.git.program.as_os_str().is_empty() {
            return Err(anyhow!("git.program must be set"));
        }
        if self.tests.program.as_os_str().is_empty() {
            return Err(anyhow!("tests.program must be set"));
        }
        if !self.tests.args.iter().any(|arg| arg.contains(PACKAGE_PLACEHOLDER)) {
            return Err(anyhow!("tests.args must mention {PACKAGE_PLACEHOLDER}"));
        }
        if self.tests.test_file_suffix.is_empty() {
            return Err(anyhow!("tests.test_file_suffix must be non-empty"));
        }
        if self.mail.from.trim().is_empty() {
            return Err(anyhow!("mail.from must be set"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn git_cli(&self) -> GitCli {
        GitCli::new(&self.git.program).with_timeout(self.command_timeout())
    }

    pub fn test_invoker(&self) -> CommandTestInvoker {
        CommandTestInvoker::new(&self.tests.program, self.tests.args.clone())
            .with_path_env(Some(self.tests.path_env.clone()))
            .with_timeout(self.command_timeout())
    }

    pub fn test_file_matcher(&self) -> TestFileMatcher {
        TestFileMatcher::with_suffix(&self.tests.test_file_suffix)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WorkerConfig::default()`.
pub fn load_config(path: &Path) -> Result<WorkerConfig> {
    if !path.exists() {
        let cfg = WorkerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WorkerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WorkerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, WorkerConfig::default());
        assert!(cfg.command_timeout().is_none());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("worker.toml");
        let mut cfg = WorkerConfig::default();
        cfg.command_timeout_secs = Some(900);
        cfg.mail.success_to = vec!["release@example.com".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!temp.path().join("worker.toml.tmp").exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("worker.toml");
        fs::write(&path, "base_dir = \"/tmp/ws\"\n[tests]\ntest_file_suffix = \"_spec.rb\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.base_dir, PathBuf::from("/tmp/ws"));
        assert_eq!(cfg.tests.program, PathBuf::from("go"));
        assert_eq!(cfg.test_file_matcher().suffix(), "_spec.rb");
    }

    #[test]
    fn rejects_zero_timeout_and_args_without_placeholder() {
        let mut cfg = WorkerConfig::default();
        cfg.command_timeout_secs = Some(0);
        assert!(cfg.validate().is_err());

        let mut cfg = WorkerConfig::default();
        cfg.tests.args = vec!["test".to_string(), "./...".to_string()];
        let err = cfg.validate().expect_err("placeholder required");
        assert!(err.to_string().contains("{package}"));
    }
}
