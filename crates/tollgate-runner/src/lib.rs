//! Execution backends for Tollgate.

pub mod runner;
pub mod shell;
pub mod simulated;

pub use runner::{OutputLine, OutputStream, RunnerConfig};
pub use shell::ShellBackend;
pub use simulated::SimulatedBackend;
