//! Core domain model types for etlflow.
//!
//! This module contains the fundamental types used throughout the runner:
//! - Stage kind, idempotency class and run state enums
//! - Stage outcome and failure cause types
//! - Artifacts and pipeline events

mod artifact;
mod event;
mod outcome;
mod status;

pub use artifact::{Artifact, ArtifactKind};
pub use event::PipelineEvent;
pub use outcome::{CauseKind, Classification, FailureCause, StageMetrics, StageOutcome};
pub use status::{IdempotencyClass, RunState, StageKind};
