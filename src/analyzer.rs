// src/analyzer.rs

use crate::error::{ConfigError, SourceError};
use crate::model::*;
use crate::queue::CancelToken;
use crate::source::RevisionSource;
use crate::status::Progress;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use tracing::{debug, info};

/// Glob-based filter for logical paths the migration should skip
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
    set: GlobSet,
    empty: bool,
}

impl ExcludeFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        let mut empty = true;
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::Glob {
                    pattern: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
            empty = false;
        }
        let set = builder.build().map_err(|source| ConfigError::Glob {
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join(";"),
            source,
        })?;
        Ok(Self { set, empty })
    }

    pub fn none() -> Self {
        Self {
            set: GlobSet::empty(),
            empty: true,
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        !self.empty && self.set.is_match(path)
    }
}

/// Output of the scan stage
#[derive(Debug, Default)]
pub struct AnalysisResult {
    pub revisions: Vec<Revision>,
    /// Distinct physical items seen
    pub files: usize,
    /// Revisions dropped by exclude patterns
    pub excluded: usize,
}

/// Scans every root item and merges the results into one ordered stream.
///
/// Overlapping roots may report the same revision twice; the merged stream
/// keeps one copy per sequence id, ordered by sequence id.
pub fn analyze(
    source: &dyn RevisionSource,
    roots: &[String],
    excludes: &ExcludeFilter,
    progress: &Progress,
    cancel: &CancelToken,
) -> Result<AnalysisResult, SourceError> {
    let mut revisions: Vec<Revision> = Vec::new();
    let mut seen: HashSet<SequenceId> = HashSet::new();
    let mut items: HashSet<ItemId> = HashSet::new();
    let mut excluded = 0;

    for root in roots {
        if cancel.is_cancelled() {
            info!(root = %root, "scan cancelled");
            break;
        }
        info!(root = %root, "scanning root item");

        for rev in source.scan_root(root)? {
            if !seen.insert(rev.sequence) {
                continue;
            }
            if excludes.is_excluded(&rev.path) {
                debug!(path = %rev.path, sequence = rev.sequence, "excluded");
                excluded += 1;
                continue;
            }
            items.insert(rev.item.clone());
            revisions.push(rev);
            progress.set_files(items.len());
            progress.set_revisions(revisions.len());
        }
    }

    // Stable, so equal sequence ids (which dedup prevents anyway) keep scan order
    revisions.sort_by_key(|rev| rev.sequence);

    info!(
        files = items.len(),
        revisions = revisions.len(),
        excluded,
        "scan complete"
    );

    Ok(AnalysisResult {
        revisions,
        files: items.len(),
        excluded,
    })
}
