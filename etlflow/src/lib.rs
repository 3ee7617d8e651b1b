//! # Etlflow
//!
//! A runner for a fixed four-stage batch pipeline:
//! Extract → Transform → ProvisionSchema → Load.
//!
//! Etlflow provides:
//!
//! - **Classified outcomes**: every stage attempt ends in `Success`,
//!   `RetryableFailure` or `FatalFailure`; nothing is thrown
//! - **Per-stage retry policies**: fixed, linear or exponential backoff,
//!   with append-only stages held to a single attempt unless reconciled
//! - **Run records**: an append-only audit trail, immutable once finalized
//! - **Swappable collaborators**: object storage, compute and warehouse
//!   sit behind traits with local adapters
//! - **Cooperative cancellation** and a per-pipeline run lock
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use etlflow::prelude::*;
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::from_file("etlflow.toml")?;
//! let (collaborators, _warehouse) = Collaborators::local(&config);
//! let chain = standard_chain(&config, &collaborators)?;
//! let runner = PipelineRunner::new(config, chain)?;
//!
//! let record = runner.run(&Arc::new(CancellationToken::new())).await?;
//! assert_eq!(record.state, RunState::Completed);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod adapters;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod record;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::PipelineConfig;
    pub use crate::context::{RunIdentity, StageContext};
    pub use crate::core::{
        Artifact, ArtifactKind, CauseKind, FailureCause, IdempotencyClass, PipelineEvent,
        RunState, StageKind, StageOutcome,
    };
    pub use crate::errors::{EtlflowError, PipelineValidationError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        standard_chain, Collaborators, PipelineBuilder, PipelineRunner, RetryPolicy, StageChain,
        Trigger,
    };
    pub use crate::record::{RunRecord, RunRecordStore};
    pub use crate::stages::{Reconciliation, Stage};
}
