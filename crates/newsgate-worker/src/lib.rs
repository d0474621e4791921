//! Process wiring shared by the worker daemon and the operator CLI.

pub mod runtime;
pub mod scheduler;

pub use runtime::{init_tracing, Runtime};
pub use scheduler::build_scheduler;
