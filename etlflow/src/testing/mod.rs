//! Testing utilities for etlflow chains.
//!
//! This module provides:
//! - Scripted stages that replay outcomes and record calls
//! - Assertions over finished run records
//! - Configuration and collaborator fixtures

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_run_aborted_at, assert_run_completed, assert_stage_attempts};
pub use fixtures::{
    chain_of, fast_config, scripted_stages, succeeding_chain, InMemoryHarness,
    SAMPLE_SALES_CSV,
};
pub use mocks::{artifact_kind_for, ScriptedCall, ScriptedStage};
