//! Chain building and execution.
//!
//! This module provides:
//! - The chain builder with ordering validation
//! - Retry policies and their backoff schedules
//! - The run lock
//! - The sequential runner and its triggers

mod assembly;
mod builder;
mod lock;
mod retry;
mod runner;
mod trigger;

pub use assembly::{standard_chain, Collaborators};
pub use builder::{ChainEntry, PipelineBuilder, StageChain};
pub use lock::{InMemoryRunLock, RunLock, RunLockGuard};
pub use retry::{BackoffStrategy, GiveUpReason, RetryDecision, RetryPolicy};
pub use runner::PipelineRunner;
pub use trigger::{exit_status, run_trigger, Trigger, TriggerReport};
