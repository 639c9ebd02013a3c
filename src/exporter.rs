//! Replays changesets into the target history.
//!
//! The exporter owns an [`ExportState`]: which physical item each logical
//! path currently shows, which logical paths alias each item, and the
//! current content handle of every item. Each changeset is applied to that
//! state revision by revision, then the full resulting tree is committed on
//! top of the previous commit. Labels and branches become tags on the commit
//! of the changeset they belong to.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use bstr::ByteSlice;
use encoding_rs::Encoding;
use tracing::{debug, info, warn};

use crate::error::{ExportError, SourceError, TargetError};
use crate::feedback::{FeedbackBroker, FeedbackOptions, FeedbackResult};
use crate::model::{Action, Changeset, ItemId, Revision, Version};
use crate::queue::CancelToken;
use crate::source::RevisionSource;
use crate::status::Progress;
use crate::target::{CommitRequest, Identity, TagAnnotation, TargetRepository};

/// How changeset comments become commit messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentEncoding {
    /// Decode legacy comments from `from` and write UTF-8
    Transcode { from: &'static Encoding },
    /// Raw comment bytes, labelled with their legacy encoding
    PassThrough { label: String },
}

impl Default for CommentEncoding {
    fn default() -> Self {
        CommentEncoding::Transcode {
            from: encoding_rs::UTF_8,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub email_domain: Option<String>,
    pub comment_encoding: CommentEncoding,
    pub force_annotated_tags: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub commits: usize,
    pub tags: usize,
    /// Revisions whose content was skipped by decision
    pub ignored: usize,
}

/// Maps a legacy user to a commit identity.
pub fn author_identity(user: &str, email_domain: Option<&str>) -> Identity {
    let email = match email_domain.map(str::trim).filter(|d| !d.is_empty()) {
        Some(domain) => {
            let local: String = user
                .trim()
                .chars()
                .map(|c| if c.is_whitespace() { '.' } else { c })
                .collect::<String>()
                .to_lowercase();
            format!("{local}@{}", domain.trim_start_matches('@'))
        }
        None => user.to_string(),
    };
    debug!(user, %email, "author mapped");
    Identity {
        name: user.to_string(),
        email,
    }
}

/// Repository-relative path for a logical legacy path.
pub fn repo_path(logical: &str) -> &str {
    logical
        .strip_prefix('$')
        .unwrap_or(logical)
        .trim_start_matches('/')
}

fn is_under(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// Path/identity/content state mutated only by the exporter.
#[derive(Debug)]
pub struct ExportState<B> {
    paths: BTreeMap<String, ItemId>,
    aliases: HashMap<ItemId, BTreeSet<String>>,
    content: HashMap<ItemId, B>,
}

impl<B> Default for ExportState<B> {
    fn default() -> Self {
        Self {
            paths: BTreeMap::new(),
            aliases: HashMap::new(),
            content: HashMap::new(),
        }
    }
}

impl<B: Clone> ExportState<B> {
    pub fn item_at(&self, path: &str) -> Option<&ItemId> {
        self.paths.get(path)
    }

    /// Logical paths currently showing `item`.
    pub fn aliases_of(&self, item: &str) -> impl Iterator<Item = &String> {
        self.aliases.get(item).into_iter().flatten()
    }

    pub fn bind(&mut self, path: &str, item: &str) {
        if self.paths.get(path).is_some_and(|bound| bound == item) {
            return;
        }
        self.unbind(path);
        self.paths.insert(path.to_string(), item.to_string());
        self.aliases
            .entry(item.to_string())
            .or_default()
            .insert(path.to_string());
    }

    pub fn unbind(&mut self, path: &str) -> Option<ItemId> {
        let item = self.paths.remove(path)?;
        if let Some(set) = self.aliases.get_mut(&item) {
            set.remove(path);
            if set.is_empty() {
                self.aliases.remove(&item);
            }
        }
        Some(item)
    }

    pub fn set_content(&mut self, item: &str, blob: B) {
        self.content.insert(item.to_string(), blob);
    }

    pub fn content_of(&self, item: &str) -> Option<&B> {
        self.content.get(item)
    }

    /// Bound paths equal to or beneath `path`.
    fn subtree(&self, path: &str) -> Vec<String> {
        self.paths
            .range(path.to_string()..)
            .take_while(|(p, _)| p.as_str() == path || p.starts_with(path))
            .filter(|(p, _)| p.as_str() == path || is_under(p, path))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Removes `path`, or every path beneath it when it names a directory.
    pub fn remove(&mut self, path: &str) -> usize {
        let doomed = self.subtree(path);
        for p in &doomed {
            self.unbind(p);
        }
        doomed.len()
    }

    /// Moves `from` (a file or a directory) to `to`, keeping item identity.
    pub fn rename(&mut self, from: &str, to: &str) -> usize {
        let moved: Vec<(String, ItemId)> = self
            .subtree(from)
            .into_iter()
            .filter_map(|p| {
                let item = self.unbind(&p)?;
                Some((format!("{to}{}", &p[from.len()..]), item))
            })
            .collect();
        for (path, item) in &moved {
            self.bind(path, item);
        }
        moved.len()
    }

    /// Full tree for the next commit; paths without content are left out.
    pub fn snapshot(&self) -> BTreeMap<String, B> {
        self.paths
            .iter()
            .filter_map(|(path, item)| {
                let blob = self.content.get(item)?;
                let rel = repo_path(path);
                (!rel.is_empty()).then(|| (rel.to_string(), blob.clone()))
            })
            .collect()
    }
}

struct PendingTag {
    name: String,
    annotation: Option<TagAnnotation>,
}

/// Drives one export run.
pub struct HistoryExporter<'a, T: TargetRepository> {
    source: &'a dyn RevisionSource,
    target: &'a mut T,
    broker: &'a FeedbackBroker,
    options: &'a ExportOptions,
    cancel: &'a CancelToken,
    progress: Option<&'a Progress>,
    state: ExportState<T::Blob>,
    head: Option<T::Commit>,
    tag_names: HashSet<String>,
    summary: ExportSummary,
}

impl<'a, T: TargetRepository> HistoryExporter<'a, T> {
    pub fn new(
        source: &'a dyn RevisionSource,
        target: &'a mut T,
        broker: &'a FeedbackBroker,
        options: &'a ExportOptions,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            source,
            target,
            broker,
            options,
            cancel,
            progress: None,
            state: ExportState::default(),
            head: None,
            tag_names: HashSet::new(),
            summary: ExportSummary::default(),
        }
    }

    pub fn with_progress(mut self, progress: &'a Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Exports every changeset in order, one commit each.
    ///
    /// Once at least one commit exists the target is finished (for git, the
    /// working copy is checked out), also when the run stops early.
    pub fn export(mut self, changesets: &[Changeset]) -> Result<ExportSummary, ExportError> {
        info!(changesets = changesets.len(), "export started");
        let outcome = self.export_all(changesets);
        if self.summary.commits > 0 {
            match &outcome {
                Ok(()) => self.with_target_retry("checkout", |target, _| target.finish())?,
                Err(_) => {
                    if let Err(err) = self.target.finish() {
                        warn!(error = %err, "failed to finish partial history");
                    }
                }
            }
        }
        outcome?;
        info!(
            commits = self.summary.commits,
            tags = self.summary.tags,
            ignored = self.summary.ignored,
            "export complete"
        );
        Ok(self.summary)
    }

    fn export_all(&mut self, changesets: &[Changeset]) -> Result<(), ExportError> {
        for (idx, changeset) in changesets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(exported = self.summary.commits, "export cancelled");
                return Err(ExportError::Cancelled {
                    exported: self.summary.commits,
                });
            }
            self.export_changeset(changeset)?;
            if (idx + 1) % 100 == 0 {
                info!(exported = idx + 1, total = changesets.len(), "export progress");
            }
        }
        Ok(())
    }

    fn export_changeset(&mut self, changeset: &Changeset) -> Result<(), ExportError> {
        let mut fetched: HashMap<(ItemId, Version), Option<T::Blob>> = HashMap::new();
        let mut tags = Vec::new();

        for rev in &changeset.revisions {
            self.apply(rev, &mut fetched, &mut tags)?;
        }

        let tree = self.state.snapshot();
        let author = author_identity(&changeset.author, self.options.email_domain.as_deref());
        let (message, encoding) = self.message(changeset);

        let commit = self.with_target_retry("commit", |target, head| {
            target.commit(CommitRequest {
                tree: &tree,
                parent: head,
                author: &author,
                time: changeset.time,
                message: &message,
                encoding: encoding.as_deref(),
            })
        })?;
        debug!(
            ?commit,
            first_sequence = changeset.first_sequence(),
            files = tree.len(),
            revisions = changeset.revisions.len(),
            "changeset committed"
        );
        self.head = Some(commit.clone());
        self.summary.commits += 1;
        if let Some(progress) = self.progress {
            progress.inc_commits();
        }

        for tag in tags {
            self.with_target_retry("tag", |target, _| {
                target.tag(&tag.name, &commit, tag.annotation.as_ref())
            })?;
            info!(tag = %tag.name, "tag created");
            self.summary.tags += 1;
        }
        Ok(())
    }

    fn apply(
        &mut self,
        rev: &Revision,
        fetched: &mut HashMap<(ItemId, Version), Option<T::Blob>>,
        tags: &mut Vec<PendingTag>,
    ) -> Result<(), ExportError> {
        match rev.action {
            Action::Created | Action::Edited | Action::Recovered => {
                self.state.bind(&rev.path, &rev.item);
                if let Some(blob) = self.content(rev, fetched)? {
                    self.state.set_content(&rev.item, blob);
                }
            }
            Action::Deleted => {
                if self.state.remove(&rev.path) == 0 {
                    debug!(path = %rev.path, "delete of unknown path");
                }
            }
            Action::Renamed => match rev.target_path.as_deref() {
                Some(to) => {
                    if self.state.rename(&rev.path, to) == 0 {
                        debug!(from = %rev.path, to, "rename of unknown path");
                    }
                }
                None => warn!(path = %rev.path, sequence = rev.sequence, "rename without target path"),
            },
            Action::Shared => {
                let alias = rev.target_path.as_deref().unwrap_or(&rev.path);
                self.state.bind(alias, &rev.item);
                if self.state.content_of(&rev.item).is_none() {
                    if let Some(blob) = self.content(rev, fetched)? {
                        self.state.set_content(&rev.item, blob);
                    }
                }
            }
            Action::Unshared => {
                let alias = rev.target_path.as_deref().unwrap_or(&rev.path);
                self.state.unbind(alias);
            }
            Action::Branched | Action::Labeled => {
                let tag = self.pending_tag(rev);
                tags.push(tag);
            }
        }
        Ok(())
    }

    /// Content of `rev`, fetched at most once per changeset.
    fn content(
        &mut self,
        rev: &Revision,
        fetched: &mut HashMap<(ItemId, Version), Option<T::Blob>>,
    ) -> Result<Option<T::Blob>, ExportError> {
        let key = (rev.item.clone(), rev.version);
        if let Some(blob) = fetched.get(&key) {
            return Ok(blob.clone());
        }

        let bytes = loop {
            match self.source.fetch_content(&rev.item, rev.version) {
                Ok(bytes) => break Some(bytes),
                Err(err) => match self.escalate_content(rev, &err) {
                    FeedbackResult::Retry => continue,
                    FeedbackResult::Ignore => {
                        warn!(path = %rev.path, error = %err, "content skipped");
                        self.summary.ignored += 1;
                        break None;
                    }
                    _ => {
                        return Err(ExportError::Aborted {
                            exported: self.summary.commits,
                        })
                    }
                },
            }
        };

        let blob = match bytes {
            Some(bytes) => Some(self.with_target_retry("blob", |target, _| target.write_blob(&bytes))?),
            None => None,
        };
        fetched.insert(key, blob.clone());
        Ok(blob)
    }

    fn escalate_content(&self, rev: &Revision, err: &SourceError) -> FeedbackResult {
        warn!(path = %rev.path, version = rev.version, error = %err, "content unavailable");
        self.broker.request(
            format!("Failed to read {} (version {}): {err}", rev.path, rev.version),
            "Content unavailable",
            FeedbackOptions::AbortRetryIgnore,
        )
    }

    /// Runs a target write, asking Retry/Cancel on failure. Never ignores.
    fn with_target_retry<R>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut T, Option<&T::Commit>) -> Result<R, TargetError>,
    ) -> Result<R, ExportError> {
        loop {
            match op(self.target, self.head.as_ref()) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(what, error = %err, "target write failed");
                    let decision = self.broker.request(
                        format!("Failed to write {what} to the target repository: {err}"),
                        "Target write failure",
                        FeedbackOptions::RetryCancel,
                    );
                    if decision != FeedbackResult::Retry {
                        return Err(ExportError::TargetWrite {
                            exported: self.summary.commits,
                            source: err,
                        });
                    }
                }
            }
        }
    }

    fn message(&self, changeset: &Changeset) -> (Vec<u8>, Option<String>) {
        match &self.options.comment_encoding {
            CommentEncoding::Transcode { from } => {
                let (text, had_errors) = from.decode_without_bom_handling(changeset.comment.as_bytes());
                if had_errors {
                    warn!(
                        time = %changeset.time,
                        encoding = from.name(),
                        "comment has invalid bytes for its encoding, replacing them"
                    );
                }
                (text.into_owned().into_bytes(), None)
            }
            CommentEncoding::PassThrough { label } => {
                let utf8 = label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8");
                (changeset.comment.to_vec(), (!utf8).then(|| label.clone()))
            }
        }
    }

    fn pending_tag(&mut self, rev: &Revision) -> PendingTag {
        let base = rev
            .label
            .as_deref()
            .map(sanitize_tag_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                let leaf = repo_path(&rev.path).rsplit('/').next().unwrap_or_default();
                let kind = if rev.action == Action::Branched { "branch" } else { "label" };
                let name = sanitize_tag_name(&format!("{leaf}-{kind}-{}", rev.sequence));
                name.trim_start_matches('-').to_string()
            });

        let mut name = base.clone();
        let mut n = 2;
        while !self.tag_names.insert(name.clone()) {
            name = format!("{base}-{n}");
            n += 1;
        }

        let annotated = self.options.force_annotated_tags || !rev.comment.trim().is_empty();
        let annotation = annotated.then(|| TagAnnotation {
            tagger: author_identity(&rev.author, self.options.email_domain.as_deref()),
            time: rev.timestamp,
            message: rev
                .label
                .as_deref()
                .filter(|_| rev.comment.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| rev.comment.to_str_lossy().into_owned()),
        });
        PendingTag { name, annotation }
    }
}

/// Turns a free-form label into a valid tag name.
pub fn sanitize_tag_name(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_sep = false;
    for c in label.trim().chars() {
        let ok = !(c.is_whitespace()
            || c.is_control()
            || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\' | '/' | '@' | '{' | '}'));
        if ok {
            out.push(c);
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    while out.contains("..") {
        out = out.replace("..", ".");
    }
    let out = out.trim_matches(|c| c == '.' || c == '_').to_string();
    let out = out.strip_suffix(".lock").map(str::to_string).unwrap_or(out);
    if git2::Reference::is_valid_name(&format!("refs/tags/{out}")) {
        out
    } else {
        String::new()
    }
}
