//! Build worker: workspace lifecycle and unit-test pipeline for one work order.
//!
//! A work order names a repository, a package and a branch. The worker prepares
//! an isolated workspace under a shared base directory, synchronizes the source
//! with git, and runs the package's unit tests directory by directory, streaming
//! timestamped progress to a single output sink. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (package ids, test-file matching,
//!   notification records). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, child processes,
//!   mail). External programs sit behind traits so tests can script them.
//!
//! [`pipeline`] chains the stages for one [`order::WorkOrder`].

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod order;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
