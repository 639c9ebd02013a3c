use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::analyzer::ExcludeFilter;
use crate::changeset::MergeWindows;
use crate::error::ConfigError;
use crate::exporter::{CommentEncoding, ExportOptions};

/// Default configuration file looked up in the working directory
pub const CONFIG_FILE: &str = "legacy2git.toml";

/// Everything a migration run needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory holding the revision journal of the legacy store
    pub journal: Option<PathBuf>,

    /// Legacy project paths to migrate, e.g. `$/Product`
    pub root_items: Vec<String>,

    /// Globs of logical paths to leave out
    pub exclude_patterns: Vec<String>,

    /// Merge revisions this close together whatever their comments
    pub any_comment_seconds: f64,

    /// Merge revisions this close together when comments match exactly
    pub same_comment_seconds: f64,

    /// Appended to user names to form commit emails
    pub email_domain: String,

    /// Encoding label of legacy comments
    pub comment_encoding: String,

    /// When false, comment bytes are written untouched
    pub transcode_comments: bool,

    /// Answer recoverable faults with the default policy
    pub unattended: bool,

    /// Target git repository directory
    pub output: Option<PathBuf>,

    /// Diagnostic log file; no log is written when unset
    pub log_file: Option<PathBuf>,

    /// Background workers; the pipeline itself is always sequential
    pub workers: usize,

    /// Annotate every tag, not just commented ones
    pub force_annotated_tags: bool,

    /// Branch receiving the migrated history
    pub branch: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            journal: None,
            root_items: Vec::new(),
            exclude_patterns: Vec::new(),
            any_comment_seconds: 30.0,
            same_comment_seconds: 600.0,
            email_domain: String::new(),
            comment_encoding: "UTF-8".to_string(),
            transcode_comments: true,
            unattended: false,
            output: None,
            log_file: None,
            workers: 1,
            force_annotated_tags: false,
            branch: "refs/heads/master".to_string(),
        }
    }
}

/// Splits the `;`-separated lists the legacy tools used.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn window(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|err| ConfigError::Invalid {
        field,
        reason: format!("{secs} is not a usable number of seconds: {err}"),
    })
}

impl MigrationConfig {
    pub fn merge_windows(&self) -> Result<MergeWindows, ConfigError> {
        Ok(MergeWindows {
            any_comment: window("any_comment_seconds", self.any_comment_seconds)?,
            same_comment: window("same_comment_seconds", self.same_comment_seconds)?,
        })
    }

    pub fn excludes(&self) -> Result<ExcludeFilter, ConfigError> {
        ExcludeFilter::new(&self.exclude_patterns)
    }

    /// Transcoding needs a label `encoding_rs` knows; pass-through keeps any label.
    pub fn comment_encoding(&self) -> Result<CommentEncoding, ConfigError> {
        let label = self.comment_encoding.trim();
        if label.is_empty() {
            return Err(ConfigError::Invalid {
                field: "comment_encoding",
                reason: "must name an encoding".to_string(),
            });
        }
        if !self.transcode_comments {
            return Ok(CommentEncoding::PassThrough {
                label: label.to_string(),
            });
        }
        Encoding::for_label(label.as_bytes())
            .map(|from| CommentEncoding::Transcode { from })
            .ok_or_else(|| ConfigError::Invalid {
                field: "comment_encoding",
                reason: format!("unknown encoding {label:?}"),
            })
    }

    pub fn export_options(&self) -> Result<ExportOptions, ConfigError> {
        let domain = self.email_domain.trim();
        Ok(ExportOptions {
            email_domain: (!domain.is_empty()).then(|| domain.to_string()),
            comment_encoding: self.comment_encoding()?,
            force_annotated_tags: self.force_annotated_tags,
        })
    }

    /// Rejects values that would make the run meaningless or unsafe.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_items.is_empty() {
            return Err(ConfigError::Invalid {
                field: "root_items",
                reason: "at least one root item is required".to_string(),
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "workers",
                reason: "must be at least 1".to_string(),
            });
        }
        self.merge_windows()?;
        self.comment_encoding()?;
        if let Some(output) = &self.output {
            if output.exists() && !output.is_dir() {
                return Err(ConfigError::Target(
                    output.clone(),
                    "exists and is not a directory".into(),
                ));
            }
        }
        self.excludes()?;
        Ok(())
    }
}

/// Loads configuration: defaults, then a TOML file, then `LEGACY2GIT_*` env vars.
pub fn load_config(path: Option<&Path>) -> Result<MigrationConfig, ConfigError> {
    let defaults = config::Config::try_from(&MigrationConfig::default())?;
    let mut builder = config::Config::builder().add_source(defaults);

    match path {
        Some(path) => builder = builder.add_source(config::File::from(path).required(true)),
        None => {
            if Path::new(CONFIG_FILE).exists() {
                builder = builder.add_source(config::File::with_name(CONFIG_FILE));
            }
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LEGACY2GIT")
            .separator("__")
            .list_separator(";")
            .with_list_parse_key("root_items")
            .with_list_parse_key("exclude_patterns")
            .try_parsing(true),
    );

    let cfg = builder.build()?;
    Ok(cfg.try_deserialize()?)
}

/// Writes the default configuration as TOML.
pub fn write_default(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let text = toml::to_string_pretty(&MigrationConfig::default())
        .context("Failed to serialize default configuration")?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
