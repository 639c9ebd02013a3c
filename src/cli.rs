// src/cli.rs

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{self, split_list, MigrationConfig};
use crate::error::ConfigError;
use crate::feedback::{
    ConsoleFeedback, FeedbackBroker, FeedbackHandler, FeedbackRequest, FeedbackResult,
};
use crate::service::MigrationService;
use crate::source::JournalSource;

#[derive(Parser, Debug)]
#[command(author, version, about = "Migrate legacy version-control history into git", long_about = None)]
pub struct Cli {
    /// Increase stderr log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a migration
    Migrate(MigrateArgs),
    /// Write a default configuration file
    Init(InitArgs),
}

#[derive(Args, Debug, Default)]
pub struct MigrateArgs {
    /// Configuration file (defaults to ./legacy2git.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding the revision journal of the legacy store
    #[arg(short, long)]
    pub journal: Option<PathBuf>,

    /// Root items to migrate, separated by `;`
    #[arg(short, long)]
    pub roots: Option<String>,

    /// Target git repository directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Append diagnostics to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Glob patterns of paths to skip, separated by `;`
    #[arg(long)]
    pub excludes: Option<String>,

    /// Encoding label of legacy comments
    #[arg(long)]
    pub encoding: Option<String>,

    /// Write comment bytes untouched, tagged with --encoding
    #[arg(long)]
    pub no_transcode: bool,

    /// Merge revisions within this many seconds regardless of comment
    #[arg(long)]
    pub any_comment: Option<f64>,

    /// Merge revisions with identical comments within this many seconds
    #[arg(long)]
    pub same_comment: Option<f64>,

    /// Domain appended to user names for commit emails
    #[arg(long)]
    pub email_domain: Option<String>,

    /// Never prompt; answer recoverable faults with the default policy
    #[arg(long)]
    pub unattended: bool,

    /// Worker threads for the background queue
    #[arg(long)]
    pub workers: Option<usize>,

    /// Create annotated tags for every label
    #[arg(long)]
    pub force_annotated_tags: bool,

    /// Branch that receives the history
    #[arg(long)]
    pub branch: Option<String>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Where to write the configuration
    #[arg(default_value = config::CONFIG_FILE)]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

impl MigrateArgs {
    /// Applies flags given on the command line over `config`.
    pub fn apply(&self, config: &mut MigrationConfig) {
        if let Some(journal) = &self.journal {
            config.journal = Some(journal.clone());
        }
        if let Some(roots) = &self.roots {
            config.root_items = split_list(roots);
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
        if let Some(excludes) = &self.excludes {
            config.exclude_patterns = split_list(excludes);
        }
        if let Some(encoding) = &self.encoding {
            config.comment_encoding = encoding.clone();
        }
        if self.no_transcode {
            config.transcode_comments = false;
        }
        if let Some(secs) = self.any_comment {
            config.any_comment_seconds = secs;
        }
        if let Some(secs) = self.same_comment {
            config.same_comment_seconds = secs;
        }
        if let Some(domain) = &self.email_domain {
            config.email_domain = domain.clone();
        }
        if self.unattended {
            config.unattended = true;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.force_annotated_tags {
            config.force_annotated_tags = true;
        }
        if let Some(branch) = &self.branch {
            config.branch = branch.clone();
        }
    }

    pub fn resolve(&self) -> Result<MigrationConfig> {
        let mut config = config::load_config(self.config.as_deref())?;
        self.apply(&mut config);
        Ok(config)
    }
}

/// Hides the spinner while a decision is prompted on the same terminal.
struct SuspendSpinner<H> {
    bar: ProgressBar,
    inner: H,
}

impl<H: FeedbackHandler> FeedbackHandler for SuspendSpinner<H> {
    fn handle(&self, request: &FeedbackRequest) -> FeedbackResult {
        self.bar.suspend(|| self.inner.handle(request))
    }
}

pub fn run_init(args: InitArgs) -> Result<()> {
    config::write_default(&args.path, args.force)?;
    println!("Wrote {}", args.path.display());
    Ok(())
}

pub fn run_migrate(config: MigrationConfig) -> Result<()> {
    let journal = config.journal.clone().ok_or(ConfigError::Invalid {
        field: "journal",
        reason: "a journal directory is required".to_string(),
    })?;
    let source = JournalSource::open(&journal)
        .with_context(|| format!("Failed to open journal at {}", journal.display()))?;

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let broker = if config.unattended {
        FeedbackBroker::unattended()
    } else {
        FeedbackBroker::attended(Arc::new(SuspendSpinner {
            bar: bar.clone(),
            inner: ConsoleFeedback::stdio(),
        }))
    };

    println!("Starting migration (legacy2git {})", MigrationService::version());
    println!("Journal: {}", journal.display());
    println!("Roots: {}", config.root_items.join(";"));
    match &config.output {
        Some(output) => println!("Repository: {}", output.display()),
        None => println!("Repository: none (analysis only)"),
    }
    println!("Excludes: {}", config.exclude_patterns.join(";"));
    println!(
        "Encoding: {} (transcode: {})",
        config.comment_encoding, config.transcode_comments
    );
    println!("Combine any comments within: {}s", config.any_comment_seconds);
    println!("Combine same comments within: {}s", config.same_comment_seconds);
    println!("Unattended: {}", config.unattended);
    println!();

    let service = MigrationService::new(config, Arc::new(source), Arc::new(broker));
    service.start_migration()?;

    let mut faults = 0;
    loop {
        let running = service.is_running();
        let state = service.current_state();
        bar.set_message(state.summary());
        bar.tick();
        if !state.exceptions.is_empty() {
            faults += state.exceptions.lines().filter(|l| !l.starts_with(' ')).count();
            bar.println(&state.exceptions);
        }
        if !running {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let state = service.current_state();
    bar.finish_with_message(state.summary());
    println!("Migration finished: {} commits", state.commits);
    if faults > 0 {
        bail!("migration finished with {faults} fault(s)");
    }
    Ok(())
}
