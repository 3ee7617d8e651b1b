//! Event emission for run observers.
//!
//! The runner emits a [`PipelineEvent`](crate::core::PipelineEvent) at every
//! lifecycle transition. Sinks are handed to the runner explicitly; there is
//! no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
