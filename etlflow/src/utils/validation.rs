//! Validation of warehouse identifiers.
//!
//! Table and column names are interpolated into DDL and COPY statements,
//! so they are checked before any statement is built.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

#[allow(clippy::expect_used)]
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier pattern"));

/// Upper bound on identifier length accepted by common warehouses.
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// An identifier that cannot be safely used in a statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identifier '{identifier}': {reason}")]
pub struct IdentifierError {
    /// The rejected identifier.
    pub identifier: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// Validates a single unquoted identifier.
///
/// # Errors
///
/// Returns `IdentifierError` if the identifier is empty, too long, or
/// contains characters outside `[A-Za-z0-9_]`.
pub fn validate_identifier(identifier: &str) -> Result<(), IdentifierError> {
    let reason = if identifier.is_empty() {
        "empty"
    } else if identifier.len() > MAX_IDENTIFIER_LEN {
        "too long"
    } else if !IDENTIFIER.is_match(identifier) {
        "must start with a letter or underscore and contain only letters, digits or '_'"
    } else {
        return Ok(());
    };
    Err(IdentifierError {
        identifier: identifier.to_string(),
        reason,
    })
}

/// Validates a dotted name such as `DATABASE.SCHEMA.TABLE`, part by part.
///
/// # Errors
///
/// Returns the first failing part's `IdentifierError`.
pub fn validate_qualified_name(name: &str) -> Result<(), IdentifierError> {
    name.split('.').try_for_each(validate_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        for ident in ["sales_fact", "_tmp", "Customer_Dimension2"] {
            assert!(validate_identifier(ident).is_ok(), "{ident}");
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        for ident in ["", "1table", "sales fact", "sales;DROP TABLE x", "t-1", "\"q\"", "A$B"] {
            assert!(validate_identifier(ident).is_err(), "{ident}");
        }
        let long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert_eq!(validate_identifier(&long).unwrap_err().reason, "too long");
    }

    #[test]
    fn test_qualified_name() {
        assert!(validate_qualified_name("ENTERPRISE_DB.PUBLIC.sales_fact").is_ok());
        let err = validate_qualified_name("ENTERPRISE_DB..sales_fact").unwrap_err();
        assert_eq!(err.reason, "empty");
    }
}
