//! Stable exit codes for the reflector CLI.

/// Single pass finished.
pub const OK: i32 = 0;
/// Invalid config, or an iteration error in single-pass mode.
pub const INVALID: i32 = 1;
/// Stopped by SIGINT/SIGTERM.
pub const INTERRUPTED: i32 = 130;
