//! Migration controller.
//!
//! Wires the three stages onto the work queue. Each stage enqueues the
//! next one only after it succeeds, so the pipeline stays strictly
//! sequential whatever the worker count, and a failed stage leaves nothing
//! downstream to run on bad input.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::info;

use crate::analyzer::{self, ExcludeFilter};
use crate::changeset::{self, MergeWindows};
use crate::config::MigrationConfig;
use crate::error::{describe_exception, BuildError, ConfigError, ExportError};
use crate::exporter::{ExportOptions, HistoryExporter};
use crate::feedback::FeedbackBroker;
use crate::model::{Changeset, Revision};
use crate::queue::{WorkContext, WorkQueue};
use crate::source::RevisionSource;
use crate::status::{Progress, StatusSnapshot};
use crate::target::{GitTarget, TargetRepository};

pub struct MigrationService {
    config: MigrationConfig,
    source: Arc<dyn RevisionSource>,
    broker: Arc<FeedbackBroker>,
    queue: WorkQueue,
    progress: Arc<Progress>,
}

/// Everything the stages need, moved from unit to unit.
struct Pipeline<T> {
    source: Arc<dyn RevisionSource>,
    broker: Arc<FeedbackBroker>,
    progress: Arc<Progress>,
    roots: Vec<String>,
    excludes: ExcludeFilter,
    windows: MergeWindows,
    options: ExportOptions,
    target: Option<Arc<Mutex<T>>>,
}

impl MigrationService {
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn RevisionSource>,
        broker: Arc<FeedbackBroker>,
    ) -> Self {
        let queue = WorkQueue::new(config.workers);
        queue.on_idle(|| info!("work queue idle"));
        Self {
            config,
            source,
            broker,
            queue,
            progress: Arc::new(Progress::default()),
        }
    }

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Validates the configuration, opens the output repository (if any)
    /// and queues the pipeline.
    pub fn start_migration(&self) -> Result<()> {
        self.config.validate()?;
        let target = match &self.config.output {
            Some(path) => {
                let target = GitTarget::create(path, &self.config.branch)
                    .map_err(|err| ConfigError::Target(path.clone(), err.to_string()))?;
                Some(Arc::new(Mutex::new(target)))
            }
            None => None,
        };
        self.queue_pipeline(target)
    }

    /// Like [`start_migration`](Self::start_migration) with a caller-supplied target.
    pub fn start_migration_into<T>(&self, target: Arc<Mutex<T>>) -> Result<()>
    where
        T: TargetRepository + Send + 'static,
    {
        self.config.validate()?;
        self.queue_pipeline(Some(target))
    }

    fn queue_pipeline<T>(&self, target: Option<Arc<Mutex<T>>>) -> Result<()>
    where
        T: TargetRepository + Send + 'static,
    {
        let config = &self.config;
        info!(
            roots = ?config.root_items,
            encoding = %config.comment_encoding,
            transcode = config.transcode_comments,
            any_comment_seconds = config.any_comment_seconds,
            same_comment_seconds = config.same_comment_seconds,
            unattended = self.broker.is_unattended(),
            "migration starting"
        );

        let pipeline = Pipeline {
            source: Arc::clone(&self.source),
            broker: Arc::clone(&self.broker),
            progress: Arc::clone(&self.progress),
            roots: config.root_items.clone(),
            excludes: config.excludes()?,
            windows: config.merge_windows()?,
            options: config.export_options()?,
            target,
        };
        self.queue.enqueue("Scanning", move |ctx| pipeline.scan(ctx));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.queue.is_idle()
    }

    pub fn wait(&self) {
        self.queue.wait_idle();
    }

    /// Requests cancellation and blocks until the worker has stopped.
    pub fn cancel_migration(&self) {
        self.queue.abort();
        self.queue.wait_idle();
    }

    /// Snapshot of the run; captured faults are handed out once.
    pub fn current_state(&self) -> StatusSnapshot {
        let exceptions = self
            .queue
            .fetch_exceptions()
            .iter()
            .map(describe_exception)
            .collect::<Vec<_>>()
            .join("\n");
        StatusSnapshot {
            running: self.is_running(),
            status: self
                .queue
                .last_status()
                .unwrap_or_else(|| "Idle".to_string()),
            elapsed: self.queue.active_time(),
            files: self.progress.files(),
            revisions: self.progress.revisions(),
            changesets: self.progress.changesets(),
            commits: self.progress.commits(),
            exceptions,
        }
    }
}

impl<T> Pipeline<T>
where
    T: TargetRepository + Send + 'static,
{
    fn scan(self, ctx: &WorkContext) -> Result<()> {
        let result = analyzer::analyze(
            self.source.as_ref(),
            &self.roots,
            &self.excludes,
            &self.progress,
            ctx.cancel_token(),
        )
        .context("Scanning the legacy store failed")?;
        if ctx.is_cancelled() {
            return Ok(());
        }
        ctx.set_status(format!(
            "Scanned {} files, {} revisions",
            result.files,
            result.revisions.len()
        ));

        let revisions = result.revisions;
        ctx.enqueue("Building changesets", move |ctx| self.build(ctx, revisions));
        Ok(())
    }

    fn build(self, ctx: &WorkContext, revisions: Vec<Revision>) -> Result<()> {
        let progress = Arc::clone(&self.progress);
        let changesets = match changeset::build(revisions, self.windows, ctx.cancel_token(), |n| {
            progress.set_changesets(n)
        }) {
            Ok(changesets) => changesets,
            Err(BuildError::Cancelled { processed }) => {
                info!(processed, "changeset build cancelled");
                return Ok(());
            }
            Err(err) => return Err(err).context("Building changesets failed"),
        };
        ctx.set_status(format!("Built {} changesets", changesets.len()));

        if self.target.is_some() {
            ctx.enqueue("Exporting", move |ctx| self.export(ctx, changesets));
        } else {
            info!("no output repository configured, skipping export");
        }
        Ok(())
    }

    fn export(self, ctx: &WorkContext, changesets: Vec<Changeset>) -> Result<()> {
        let Some(target) = self.target else {
            return Ok(());
        };
        let mut guard = target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let exporter = HistoryExporter::new(
            self.source.as_ref(),
            &mut *guard,
            &self.broker,
            &self.options,
            ctx.cancel_token(),
        )
        .with_progress(&self.progress);

        match exporter.export(&changesets) {
            Ok(summary) => {
                ctx.set_status(format!(
                    "Exported {} commits, {} tags",
                    summary.commits, summary.tags
                ));
                Ok(())
            }
            Err(ExportError::Cancelled { exported }) => {
                ctx.set_status(format!("Cancelled after {exported} commits"));
                Ok(())
            }
            Err(err) => {
                ctx.set_status(format!("Export stopped after {} commits", err.exported()));
                Err(err).context("Exporting to git failed")
            }
        }
    }
}
