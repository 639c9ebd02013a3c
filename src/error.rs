//! Error taxonomy for the migration pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{ItemId, SequenceId, Version};

/// Raised by the changeset builder when the input contract is broken upstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("revision stream out of order at sequence {sequence}: {reason}")]
    StreamOrderViolation { sequence: SequenceId, reason: String },

    #[error("changeset build cancelled after {processed} revisions")]
    Cancelled { processed: usize },
}

/// Errors from the legacy store reader.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SourceError {
    #[error("content unavailable for item {item} version {version}: {reason}")]
    ContentUnavailable {
        item: ItemId,
        version: Version,
        reason: String,
    },

    #[error("root item not found: {0}")]
    UnknownRoot(String),

    #[error("failed to read revision journal {path}: {source}")]
    Journal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed journal entry at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures writing to the target repository.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TargetError {
    #[error("failed to open target repository at {0}: {1}")]
    Open(PathBuf, #[source] git2::Error),

    #[error("failed to write blob: {0}")]
    WriteBlob(#[source] git2::Error),

    #[error("failed to build tree: {0}")]
    BuildTree(#[source] git2::Error),

    #[error("failed to create commit: {0}")]
    Commit(#[source] git2::Error),

    #[error("failed to create tag {name}: {source}")]
    Tag {
        name: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to check out the migrated history: {0}")]
    Checkout(#[source] git2::Error),

    #[error("target write rejected: {0}")]
    Rejected(String),
}

/// Terminal outcomes of an export run.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExportError {
    #[error("export aborted after {exported} commits")]
    Aborted { exported: usize },

    #[error("export cancelled after {exported} commits")]
    Cancelled { exported: usize },

    #[error("target write failed after {exported} commits: {source}")]
    TargetWrite {
        exported: usize,
        #[source]
        source: TargetError,
    },
}

impl ExportError {
    /// Number of commits intact in the target when the export stopped.
    pub fn exported(&self) -> usize {
        match self {
            ExportError::Aborted { exported }
            | ExportError::Cancelled { exported }
            | ExportError::TargetWrite { exported, .. } => *exported,
        }
    }
}

/// Fatal problems detected before any stage runs.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid exclude pattern {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("target location {0} is unusable: {1}")]
    Target(PathBuf, String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Renders a captured fault as a one-line summary plus the full cause chain.
pub fn format_exception(error: &anyhow::Error) -> (String, String) {
    let short = error.to_string();
    let detail = format!("{error:?}");
    (short, detail)
}

/// One exception-list entry: the summary, then each cause on its own line.
pub fn describe_exception(error: &anyhow::Error) -> String {
    let mut entry = error.to_string();
    for cause in error.chain().skip(1) {
        entry.push_str("\n    caused by: ");
        entry.push_str(&cause.to_string());
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exception_format_keeps_cause_chain() {
        let err: anyhow::Result<()> = Err(SourceError::UnknownRoot("$/Missing".into()))
            .context("scan stage failed");
        let err = err.unwrap_err();
        let (short, detail) = format_exception(&err);
        assert_eq!(short, "scan stage failed");
        assert!(detail.contains("root item not found: $/Missing"));
    }

    #[test]
    fn description_lists_causes() {
        let err = anyhow::Error::new(ExportError::Aborted { exported: 2 }).context("export stage failed");
        assert_eq!(
            describe_exception(&err),
            "export stage failed\n    caused by: export aborted after 2 commits"
        );
    }

    #[test]
    fn export_error_reports_progress() {
        let err = ExportError::Aborted { exported: 3 };
        assert_eq!(err.exported(), 3);
        assert_eq!(err.to_string(), "export aborted after 3 commits");
    }
}
