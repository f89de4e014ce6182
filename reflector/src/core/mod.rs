//! Deterministic, pure logic shared by the reflector.
//!
//! Core modules must be free of I/O side effects.

pub mod crossing;
pub mod types;
