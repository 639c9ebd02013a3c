// src/model.rs

use bstr::BString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic position of a revision in the scanned stream
pub type SequenceId = u64;

/// Identifies a physical item across renames and shares
pub type ItemId = String;

/// Per-item revision number, used to fetch content
pub type Version = u32;

/// What a single revision did to its item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Edited,
    Deleted,
    Renamed,
    Shared,
    Unshared,
    Branched,
    Labeled,
    Recovered,
}

/// One record of the per-file revision log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub sequence: SequenceId,
    pub item: ItemId,
    #[serde(default)]
    pub version: Version,
    pub path: String,
    pub action: Action,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    #[serde(default)]
    pub comment: BString,
    /// Destination path for renames and shares
    #[serde(default)]
    pub target_path: Option<String>,
    /// Tag name for labels and branches
    #[serde(default)]
    pub label: Option<String>,
}

/// A run of revisions inferred to be one logical commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub revisions: Vec<Revision>,
    pub time: DateTime<Utc>,
    pub author: String,
    pub comment: BString,
}

impl Changeset {
    pub fn first_sequence(&self) -> SequenceId {
        self.revisions.first().map_or(0, |r| r.sequence)
    }
}
