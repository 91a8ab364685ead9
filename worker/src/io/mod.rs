//! I/O adapters and the side-effecting pipeline stages.

pub mod config;
pub mod discovery;
pub mod git;
pub mod mail;
pub mod output;
pub mod process;
pub mod sync;
pub mod workspace;
