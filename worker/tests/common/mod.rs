//! Local git fixtures: a bare origin plus a seed clone used to push commits.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "Fixture Author")
        .env("GIT_AUTHOR_EMAIL", "author@example.com")
        .env("GIT_COMMITTER_NAME", "Fixture Author")
        .env("GIT_COMMITTER_EMAIL", "author@example.com")
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// A bare repository with `main` and `release/1.2` branches.
pub struct Origin {
    pub bare: PathBuf,
    seed: PathBuf,
}

impl Origin {
    pub fn create(root: &Path) -> Self {
        let bare = root.join("origin.git");
        let seed = root.join("seed");
        fs::create_dir_all(&bare).expect("mkdir bare");
        fs::create_dir_all(&seed).expect("mkdir seed");
        git(&bare, &["init", "--bare", "--quiet"]);
        git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        git(&seed, &["init", "--quiet"]);
        git(&seed, &["checkout", "--quiet", "-b", "main"]);
        let origin = Self { bare, seed };
        origin.commit("go.mod", "module example.com/svc\n", "Initial commit");
        git(&origin.seed, &["remote", "add", "origin", &origin.url()]);
        git(&origin.seed, &["push", "--quiet", "origin", "main"]);

        git(&origin.seed, &["checkout", "--quiet", "-b", "release/1.2"]);
        origin.commit("api/api_test.go", "package api\n", "Add api tests");
        git(&origin.seed, &["push", "--quiet", "origin", "release/1.2"]);
        origin
    }

    pub fn url(&self) -> String {
        self.bare.display().to_string()
    }

    /// Commit `contents` at `path` on the seed's current branch; returns the id.
    pub fn commit(&self, path: &str, contents: &str, message: &str) -> String {
        let file = self.seed.join(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(&file, contents).expect("write");
        git(&self.seed, &["add", path]);
        git(&self.seed, &["commit", "--quiet", "-m", message]);
        git(&self.seed, &["rev-parse", "HEAD"])
    }

    /// Commit on `release/1.2` and push it to the origin.
    pub fn push_release_commit(&self, path: &str, contents: &str, message: &str) -> String {
        let id = self.commit(path, contents, message);
        git(&self.seed, &["push", "--quiet", "origin", "release/1.2"]);
        id
    }
}
