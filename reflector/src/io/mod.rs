//! I/O helpers: job tree access, persisted state, subprocesses, signals.

pub mod agent;
pub mod archiver;
pub mod config;
pub mod process;
pub mod prompt;
pub mod publisher;
pub mod scanner;
pub mod shutdown;
pub mod state_store;
