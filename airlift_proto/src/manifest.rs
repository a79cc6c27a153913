//! File manifest carried on transfer offers
//!
//! The sending side attaches a `fileDescription` array to its offer so the
//! receiver knows every file name and byte length up front. The receiver
//! validates it before accepting any data; the byte lengths drive chunk
//! reassembly on the other end.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Wire field name on the offer message.
pub const MANIFEST_FIELD: &str = "fileDescription";

#[derive(Debug, Error, PartialEq)]
pub enum ManifestError {
    #[error("offer carries no file description")]
    Missing,
    #[error("file description is empty")]
    Empty,
    #[error("file description is malformed: {0}")]
    Malformed(String),
}

/// One announced file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub file_name: String,
    pub file_bytes: u64,
}

/// Ordered list of files for one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileManifest(Vec<FileEntry>);

impl FileManifest {
    pub fn new(entries: Vec<FileEntry>) -> Self {
        Self(entries)
    }

    /// Validate the `fileDescription` value from an inbound offer.
    ///
    /// Absent or empty lists and entries missing a name or byte length are
    /// rejected; the transfer must not start.
    pub fn from_value(value: Option<&Value>) -> Result<Self, ManifestError> {
        let value = value.ok_or(ManifestError::Missing)?;
        let entries: Vec<FileEntry> = serde_json::from_value(value.clone())
            .map_err(|e| ManifestError::Malformed(e.to_string()))?;
        if entries.is_empty() {
            return Err(ManifestError::Empty);
        }
        Ok(Self(entries))
    }

    pub fn to_value(&self) -> Value {
        // Vec<FileEntry> of plain strings and integers always serializes.
        serde_json::to_value(&self.0).unwrap_or(Value::Null)
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.0.iter().map(|e| e.file_bytes).sum()
    }
}
