//! Failure-driven self-improvement loop for a coding agent.
//!
//! The reflector watches a benchmark job tree for failed task runs, archives
//! their artifacts, and whenever a job's failure count crosses a new multiple
//! of the trigger threshold runs a three-stage pipeline: reflect on the
//! failures, revise the agent's behavior specification, publish the revision.
//!
//! - **[`core`]**: Pure, deterministic logic (crossing rule, records).
//! - **[`io`]**: Side-effecting operations (filesystem, subprocesses, signals).
//! - **[`stages`]** and **[`reconcile`]**: orchestration over both.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod reconcile;
pub mod report;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
