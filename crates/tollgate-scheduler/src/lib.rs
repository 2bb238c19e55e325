//! Trigger classification, job graph construction and run scheduling for Tollgate.

pub mod dag;
pub mod gate;
pub mod matrix;
pub mod scheduler;
pub mod triggers;

pub use dag::{GraphBuilder, JobGraph, JobInstance};
pub use gate::{GateEvaluator, aggregate};
pub use scheduler::Scheduler;
pub use triggers::{RawEvent, TriggerClassifier};
