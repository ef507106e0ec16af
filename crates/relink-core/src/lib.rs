#![forbid(unsafe_code)]
//! relink-core library.
//!
//! Keeps a graph of original → replacement item relationships consistent
//! while batches of candidate edges arrive. Edges are grouped into connected
//! components, classified for structural conflicts, and moved through a
//! forward-only stage lifecycle.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums per component, each mapped to an
//!   [`error::ErrorCode`]. `anyhow::Result` only at I/O boundaries.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`).
//! - **Ownership**: only [`batch::BatchCoordinator`] mutates the
//!   [`store::EdgeStore`].

pub mod batch;
pub mod clock;
pub mod config;
pub mod conflicts;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lease;
pub mod model;
pub mod planner;
pub mod snapshot;
pub mod store;
pub mod transition;

pub use batch::{
    BatchCoordinator, BatchReport, CandidateEdge, GroupSnapshot, RefreshTrigger, RowOutcome,
    RowReport, SplitReport, StoreDelta,
};
pub use config::EngineConfig;
pub use engine::{Engine, EngineError};
pub use graph::ConflictKind;
pub use model::{Edge, EdgeId, EntityId, EntitySide, GroupId, Stage};
