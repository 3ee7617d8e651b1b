//! Stable content keys.

use sha2::{Digest, Sha256};

/// Builds a stable key from ordered components.
///
/// The same components always yield the same key, so a bulk load of the
/// same columnar output into the same table is recognizable across attempts.
/// Each component is hashed behind its length, so no two distinct component
/// lists share an input.
#[must_use]
pub fn stable_key(prefix: &str, components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        hasher.update((component.len() as u64).to_be_bytes());
        hasher.update(component.as_bytes());
    }
    let result = hasher.finalize();
    format!("{prefix}:{}", hex::encode(&result[..16]))
}
