//! Readers for the legacy store.
//!
//! The core only sees the [`RevisionSource`] trait: a normalized,
//! time-ordered revision stream plus lazy content lookup. Two readers ship
//! with the crate: [`MemorySource`] for embedding and tests, and
//! [`JournalSource`], which reads a JSON-lines revision journal exported
//! from the legacy server next to a `content/<item>/<version>` tree.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::SourceError;
use crate::model::{ItemId, Revision, Version};

/// Collaborator contract for the legacy store.
pub trait RevisionSource: Send + Sync {
    /// All revisions touching `root` or anything beneath it, in scan order.
    fn scan_root(&self, root: &str) -> Result<Vec<Revision>, SourceError>;

    /// Content of `item` as of `version`.
    fn fetch_content(&self, item: &str, version: Version) -> Result<Vec<u8>, SourceError>;
}

/// True when `path` is `root` itself or lies beneath it.
pub fn is_under(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    if root.is_empty() || root == "$" {
        return true;
    }
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn touches(rev: &Revision, root: &str) -> bool {
    is_under(&rev.path, root)
        || rev
            .target_path
            .as_deref()
            .is_some_and(|target| is_under(target, root))
}

/// In-memory store, with optional fault injection on content reads.
#[derive(Debug, Default)]
pub struct MemorySource {
    revisions: Vec<Revision>,
    contents: HashMap<(ItemId, Version), Vec<u8>>,
    failures: Mutex<HashMap<(ItemId, Version), usize>>,
}

impl MemorySource {
    pub fn new(revisions: Vec<Revision>) -> Self {
        Self {
            revisions,
            ..Default::default()
        }
    }

    pub fn with_content(mut self, item: &str, version: Version, bytes: impl Into<Vec<u8>>) -> Self {
        self.contents
            .insert((item.to_string(), version), bytes.into());
        self
    }

    /// Makes the next `times` reads of `item`@`version` fail.
    pub fn failing(self, item: &str, version: Version, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((item.to_string(), version), times);
        self
    }
}

impl RevisionSource for MemorySource {
    fn scan_root(&self, root: &str) -> Result<Vec<Revision>, SourceError> {
        let found: Vec<Revision> = self
            .revisions
            .iter()
            .filter(|rev| touches(rev, root))
            .cloned()
            .collect();
        if found.is_empty() {
            return Err(SourceError::UnknownRoot(root.to_string()));
        }
        Ok(found)
    }

    fn fetch_content(&self, item: &str, version: Version) -> Result<Vec<u8>, SourceError> {
        let key = (item.to_string(), version);
        {
            let mut failures = self
                .failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(remaining) = failures.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SourceError::ContentUnavailable {
                        item: item.to_string(),
                        version,
                        reason: "injected read failure".to_string(),
                    });
                }
            }
        }
        self.contents
            .get(&key)
            .cloned()
            .ok_or_else(|| SourceError::ContentUnavailable {
                item: item.to_string(),
                version,
                reason: "no stored content".to_string(),
            })
    }
}

/// Journal file name inside a journal directory
pub const JOURNAL_FILE: &str = "journal.jsonl";

/// Reads a revision journal directory.
///
/// Layout:
/// ```text
/// <dir>/journal.jsonl            one Revision per line, in scan order
/// <dir>/content/<item>/<version> raw bytes of each stored version
/// ```
#[derive(Debug)]
pub struct JournalSource {
    root: PathBuf,
    revisions: Vec<Revision>,
}

impl JournalSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let path = dir.join(JOURNAL_FILE);
        let file = fs::File::open(&path).map_err(|source| SourceError::Journal {
            path: path.clone(),
            source,
        })?;

        let mut revisions = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| SourceError::Journal {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let rev: Revision = serde_json::from_str(&line).map_err(|source| SourceError::Parse {
                line: idx + 1,
                source,
            })?;
            revisions.push(rev);
        }
        debug!(journal = %path.display(), revisions = revisions.len(), "journal loaded");

        Ok(Self {
            root: dir.to_path_buf(),
            revisions,
        })
    }

    fn content_path(&self, item: &str, version: Version) -> Option<PathBuf> {
        let safe = !item.is_empty()
            && item != "."
            && item != ".."
            && !item.contains(['/', '\\']);
        safe.then(|| {
            self.root
                .join("content")
                .join(item)
                .join(version.to_string())
        })
    }
}

impl RevisionSource for JournalSource {
    fn scan_root(&self, root: &str) -> Result<Vec<Revision>, SourceError> {
        let found: Vec<Revision> = self
            .revisions
            .iter()
            .filter(|rev| touches(rev, root))
            .cloned()
            .collect();
        if found.is_empty() {
            return Err(SourceError::UnknownRoot(root.to_string()));
        }
        Ok(found)
    }

    fn fetch_content(&self, item: &str, version: Version) -> Result<Vec<u8>, SourceError> {
        let unavailable = |reason: String| SourceError::ContentUnavailable {
            item: item.to_string(),
            version,
            reason,
        };
        let path = self
            .content_path(item, version)
            .ok_or_else(|| unavailable("item id is not a valid file name".to_string()))?;
        fs::read(&path).map_err(|err| unavailable(format!("{}: {err}", path.display())))
    }
}
