//! Process exit codes shared by the phase binaries.
//!
//! Each error class maps to a distinct code so callers can tell a detect
//! miss from a buildpack failure without parsing stderr.

pub const SUCCESS: i32 = 0;
pub const FAILED: i32 = 1;
pub const INVALID_ARGS: i32 = 3;
pub const FAILED_DETECT: i32 = 6;
pub const FAILED_BUILD: i32 = 7;
pub const INCOMPATIBLE_BASE: i32 = 8;
pub const IMAGE_STORE: i32 = 9;
pub const MALFORMED: i32 = 10;

/// Exit code returned by a buildpack's detect executable to opt out of a
/// group without failing it.
pub const DETECT_SKIP: i32 = 100;
