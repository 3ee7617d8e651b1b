//! Artifact handles passed between stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::StageKind;

/// What an artifact points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Timestamped raw objects written by Extract.
    RawSnapshot,
    /// Partitioned columnar output written by Transform.
    Columnar,
    /// Tables provisioned in the warehouse.
    Schema,
    /// Receipt of a bulk load.
    LoadReceipt,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawSnapshot => write!(f, "raw_snapshot"),
            Self::Columnar => write!(f, "columnar"),
            Self::Schema => write!(f, "schema"),
            Self::LoadReceipt => write!(f, "load_receipt"),
        }
    }
}

/// An opaque handle to data produced by a stage.
///
/// The runner keeps artifacts only for stages whose outcome was `Success`,
/// and hands downstream stages borrowed slices of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier for the artifact.
    pub id: Uuid,

    /// The kind of data the artifact references.
    pub kind: ArtifactKind,

    /// The stage that produced it.
    pub produced_by: StageKind,

    /// Storage locations or qualified names, in production order.
    #[serde(default)]
    pub locations: Vec<String>,

    /// Additional metadata about the artifact.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// When the artifact was created.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates a new artifact with no locations.
    #[must_use]
    pub fn new(kind: ArtifactKind, produced_by: StageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            produced_by,
            locations: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Appends a location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.locations.push(location.into());
        self
    }

    /// Replaces the locations.
    #[must_use]
    pub fn with_locations(mut self, locations: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.locations = locations.into_iter().map(Into::into).collect();
        self
    }

    /// Adds metadata to the artifact.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The first location, if any.
    #[must_use]
    pub fn primary_location(&self) -> Option<&str> {
        self.locations.first().map(String::as_str)
    }
}
