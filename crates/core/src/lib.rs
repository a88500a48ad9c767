//! `taskq-core`: job domain types.
//!
//! This crate contains **pure domain** primitives (no I/O): identifiers, the
//! job request/record model and its validation rules.

pub mod error;
pub mod id;
pub mod job;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{JobRecord, JobRequest, MISSING_TYPE_MESSAGE, present_data};
