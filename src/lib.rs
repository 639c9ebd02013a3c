//! **legacy2git** - replays a legacy single-repository version-control
//! history into git.
//!
//! The pipeline runs on a background work queue: scan the legacy store,
//! group per-file revisions into changesets, export one commit per
//! changeset. Recoverable faults are decided through a feedback broker so
//! the same pipeline runs attended or unattended.

pub mod analyzer;
pub mod changeset;
pub mod cli;
pub mod config;
pub mod error;
pub mod exporter;
pub mod feedback;
pub mod model;
pub mod queue;
pub mod service;
pub mod source;
pub mod status;
pub mod target;
pub mod telemetry;

pub use changeset::{build as build_changesets, ChangesetBuilder, MergeWindows};
pub use config::{load_config, MigrationConfig};
pub use error::{BuildError, ConfigError, ExportError, SourceError, TargetError};
pub use exporter::{CommentEncoding, ExportOptions, HistoryExporter};
pub use feedback::{FeedbackBroker, FeedbackOptions, FeedbackResult};
pub use model::{Action, Changeset, Revision};
pub use queue::{CancelToken, WorkQueue};
pub use service::MigrationService;
pub use source::{JournalSource, MemorySource, RevisionSource};
pub use status::StatusSnapshot;
pub use target::{GitTarget, MemoryTarget, TargetRepository};
