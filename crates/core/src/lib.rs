//! `applyflow-core`: identifiers and error primitives shared by every crate.
//!
//! Nothing here knows about storage, HTTP, or the batch state machine.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{BatchId, JobId, TaskId, UserId};
