//! Actor system for the extraction job engine.
//!
//! This crate provides the Ractor-based actor system that moves jobs from
//! submission to a terminal state, plus the read path used by pollers.
//!
//! # Architecture
//!
//! - `Supervisor` - Owns the queue actor and the worker pool, restarts them,
//!   and runs the optional lease reaper
//! - `QueueActor` - Durable FIFO broker; parks idle workers until work arrives
//! - `WorkerActor` - Claims a job lease, runs the extractor, writes the
//!   artifact and commits the terminal state
//! - `StatusResolver` - Maps a job id to its client-facing status
//! - `Engine` - Facade tying the above to a job store, result sink and extractor
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Engine, EngineConfig, EngineParts};
//!
//! let engine = Engine::start(EngineConfig::default(), parts).await?;
//! let job = engine.submit(upload).await?;
//! let status = engine.poll(&job.id).await?;
//! ```

mod engine;
mod handler;
mod messages;
mod persistence;
mod queue_actor;
mod resolver;
mod supervisor;
mod worker_actor;

pub use engine::{Engine, EngineConfig, EngineError, EngineParts, SubmitError};
pub use handler::FnExtractor;
pub use messages::{QueueError, QueueMessage, SupervisorMessage, WorkerMessage};
pub use persistence::{PersistenceError, StatePersistence};
pub use queue_actor::{QueueActor, QueueArgs};
pub use resolver::{ResolveError, StatusResolver};
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};
pub use worker_actor::{WorkerActor, WorkerArgs, WorkerContext};

pub use jobs_core;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
