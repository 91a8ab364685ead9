//! Test package discovery.
//!
//! A directory is a test package when at least one of its immediate children
//! is a file matching the [`TestFileMatcher`]. Discovery is lazy and knows
//! nothing about running tests: [`TestPackages::iter`] can be called any
//! number of times and each call walks the tree afresh.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, FilterEntry, WalkDir};

use crate::core::path::relative_package_id;
use crate::core::types::TestFileMatcher;
use crate::error::Cause;

const VCS_METADATA_DIR: &str = ".git";

/// A directory that holds tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDir {
    pub path: PathBuf,
    /// Path relative to the discovery root with `/` separators; `.` for the root.
    pub id: String,
}

/// The tree could not be walked or a directory could not be listed.
#[derive(Debug, thiserror::Error)]
#[error("list directory {}", .path.display())]
pub struct DiscoveryError {
    pub path: PathBuf,
    #[source]
    pub cause: Cause,
}

/// Restartable description of the test packages under `root`.
#[derive(Debug, Clone)]
pub struct TestPackages {
    root: PathBuf,
    matcher: TestFileMatcher,
}

impl TestPackages {
    pub fn new(root: impl Into<PathBuf>, matcher: TestFileMatcher) -> Self {
        Self {
            root: root.into(),
            matcher,
        }
    }

    /// Walk the tree in lexical order, yielding each test package as it is found.
    pub fn iter(&self) -> PackageIter<'_> {
        let walk = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(is_walkable as fn(&DirEntry) -> bool);
        PackageIter {
            packages: self,
            walk,
        }
    }
}

impl<'a> IntoIterator for &'a TestPackages {
    type Item = Result<PackageDir, DiscoveryError>;
    type IntoIter = PackageIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`TestPackages::iter`].
pub struct PackageIter<'a> {
    packages: &'a TestPackages,
    walk: FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>,
}

impl Iterator for PackageIter<'_> {
    type Item = Result<PackageDir, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map_or_else(|| self.packages.root.clone(), Path::to_path_buf);
                    return Some(Err(DiscoveryError {
                        path,
                        cause: err.into(),
                    }));
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            match has_test_files(entry.path(), &self.packages.matcher) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) => {
                    return Some(Err(DiscoveryError {
                        path: entry.path().to_path_buf(),
                        cause: err.into(),
                    }));
                }
            }
            let Some(id) = relative_package_id(&self.packages.root, entry.path()) else {
                continue;
            };
            return Some(Ok(PackageDir {
                path: entry.into_path(),
                id,
            }));
        }
    }
}

fn is_walkable(entry: &DirEntry) -> bool {
    !(entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name() == VCS_METADATA_DIR)
}

fn has_test_files(dir: &Path, matcher: &TestFileMatcher) -> std::io::Result<bool> {
    for child in fs::read_dir(dir)? {
        let child = child?;
        if child.file_type()?.is_file() && matcher.matches(&child.file_name()) {
            return Ok(true);
        }
    }
    Ok(false)
}
