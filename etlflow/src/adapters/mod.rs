//! In-process adapters for the collaborator ports.
//!
//! These back the CLI's local mode and the test suite. Vendor-backed
//! implementations plug into the same traits.

mod compute;
mod fs;
mod memory;
pub mod tabular;

pub use compute::{LocalComputeEngine, DEFAULT_PARTITION};
pub use fs::{CsvFileSource, FsObjectStore};
pub use memory::{InMemoryObjectStore, InMemoryWarehouse, StaticSource, WarehouseTable};
