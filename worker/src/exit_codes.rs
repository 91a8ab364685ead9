//! Stable exit codes for worker CLI commands.

/// Command succeeded (for `worker run`: every stage of the work order passed).
pub const OK: i32 = 0;
/// The work order ran and failed (setup, sync, test or reporting error).
pub const FAILED: i32 = 1;
/// Command could not start: invalid arguments, config, or package identifier.
pub const INVALID: i32 = 2;
