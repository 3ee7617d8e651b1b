//! Utility functions for timestamps, stable keys and identifier checks.

mod hashing;
pub mod timestamps;
mod validation;

pub use hashing::stable_key;
pub use timestamps::{
    elapsed_ms, iso_timestamp, now_utc, parse_partition_date, snapshot_stamp, year_month,
    Timestamp, SNAPSHOT_STAMP_FORMAT,
};
pub use validation::{
    validate_identifier, validate_qualified_name, IdentifierError, MAX_IDENTIFIER_LEN,
};
