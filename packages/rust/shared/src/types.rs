//! Core domain types for geonote.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A note on disk, identified by its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File extension without the leading dot, if any.
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }

    /// Whether this document is a note the pipeline should tag.
    ///
    /// Extensions compare case-sensitively, so `Note.MD` is not a note
    /// unless `MD` is listed.
    pub fn is_eligible(&self, extensions: &[String]) -> bool {
        self.extension()
            .is_some_and(|ext| extensions.iter().any(|allowed| allowed == ext))
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

// ---------------------------------------------------------------------------
// LocationRecord
// ---------------------------------------------------------------------------

/// Location string produced by the lookup command.
///
/// Opaque: only surrounding whitespace is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationRecord(String);

impl LocationRecord {
    /// Build a record from raw command output.
    pub fn from_output(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for LocationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// DocumentCreated
// ---------------------------------------------------------------------------

/// Host event announcing that a document was created.
#[derive(Debug, Clone)]
pub struct DocumentCreated {
    pub document: Document,
    /// When the host observed the creation.
    pub observed_at: DateTime<Utc>,
}

impl DocumentCreated {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::seen_at(path, Utc::now())
    }

    /// Event for a creation the host observed at `observed_at`.
    pub fn seen_at(path: impl Into<PathBuf>, observed_at: DateTime<Utc>) -> Self {
        Self {
            document: Document::new(path),
            observed_at,
        }
    }
}
