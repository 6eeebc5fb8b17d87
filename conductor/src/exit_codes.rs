//! Stable exit codes for conductor CLI commands.

/// Command succeeded and the final agent turn exited cleanly.
pub const OK: i32 = 0;
/// Invalid layout/config/arguments or an infrastructure failure.
pub const INVALID: i32 = 1;
/// The final agent execution reported a non-zero exit code.
pub const AGENT_FAILED: i32 = 2;
/// The planner loop hit its step or delegation limit before finishing.
pub const STOPPED: i32 = 3;
