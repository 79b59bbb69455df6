//! Simrun Core
//!
//! Core types for the simrun job runner.
//!
//! This crate contains:
//! - Domain types: the job description, input references, output policy,
//!   execution result and job lifecycle states
//! - The job description parser and its validation errors
//! - The process exit-code table shared by the runner
//!
//! Nothing in here performs I/O.

pub mod domain;
pub mod error;

pub use domain::exit;
pub use domain::execution::{ExecutionResult, JobState};
pub use domain::job::{InputSpec, JobDescription, OutputPolicy};
pub use domain::uri::{InputSource, ObjectUri};
pub use error::JobError;
