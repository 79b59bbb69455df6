//! Service layer
//!
//! One service per job phase. Each is a small struct owning what it needs
//! (the object store client, the shell) and exposing a single async entry
//! point that the job runner calls in order.

mod execution;
mod publishing;
mod staging;

pub use execution::CommandExecutor;
pub use publishing::OutputPublisher;
pub use staging::InputStager;
