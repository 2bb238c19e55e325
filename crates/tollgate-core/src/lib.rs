//! Tollgate Core
//!
//! Core domain types, traits, and error handling for Tollgate.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: the declarative workflow format, job and
//! gate statuses, guard expressions, run events, and the execution backend
//! port.

pub mod error;
pub mod events;
pub mod guard;
pub mod ids;
pub mod ports;
pub mod run;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
