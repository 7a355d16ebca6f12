//! Core domain types for the extraction job engine.
//!
//! This crate contains shared types used across all other crates:
//! - Job definitions, identifiers and the lifecycle state machine
//! - Artifacts written by workers
//! - Queue messages and statistics
//! - Lifecycle events
//! - Upload admission policy
//! - The extractor capability trait

mod admission;
mod artifact;
mod events;
mod extract;
mod job;
mod queue;
mod status;

pub use admission::*;
pub use artifact::*;
pub use events::*;
pub use extract::*;
pub use job::*;
pub use queue::*;
pub use status::*;
