//! Run and stage execution context.
//!
//! This module provides:
//! - Run identity shared by every stage of a run
//! - Per-attempt stage context carrying the cancellation token

mod identity;
mod stage;

pub use identity::RunIdentity;
pub use stage::StageContext;
