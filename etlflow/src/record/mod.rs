//! Run records and their storage.
//!
//! A [`RunRecord`] is built in memory by the runner and handed to a
//! [`RunRecordStore`] once the run is finalized.

mod run;
mod store;

pub use run::{AttemptRecord, RunRecord, StageEntry};
pub use store::{InMemoryRunRecordStore, JsonlRunRecordStore, RunRecordStore, StoredRun};
