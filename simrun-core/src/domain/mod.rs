//! Core domain types
//!
//! These types describe one runner invocation: what to fetch, what to run,
//! where results go, and how the run ended. They are created once per job and
//! never mutated afterwards.

pub mod execution;
pub mod exit;
pub mod job;
pub mod uri;
