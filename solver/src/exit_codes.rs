//! Stable exit codes for solver CLI commands.

/// Command succeeded (for `solve`/`exec`: the code ran successfully).
pub const OK: i32 = 0;
/// Invalid input, config or an unexpected fault.
pub const INVALID: i32 = 1;
/// The task ran but did not succeed (failed execution, exhausted retries,
/// failed installation or unparseable response).
pub const FAILED: i32 = 2;
