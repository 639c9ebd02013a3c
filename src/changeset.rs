//! Groups the flat revision stream into changesets.
//!
//! One forward pass. The only open changeset is the most recent one, so
//! every changeset is a contiguous run of the input. An incoming revision
//! joins it when the author matches and either
//!
//! * it arrives within `any_comment` of the changeset's newest revision, or
//! * it arrives within `same_comment` and carries exactly the changeset's
//!   (non-empty) comment.
//!
//! Anything else closes the open changeset and starts a new one.

use std::time::Duration;

use bstr::{BString, ByteSlice};
use tracing::{debug, info};

use crate::error::BuildError;
use crate::model::{Changeset, Revision};
use crate::queue::CancelToken;

/// Merge windows for the changeset builder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeWindows {
    pub any_comment: Duration,
    pub same_comment: Duration,
}

impl Default for MergeWindows {
    fn default() -> Self {
        Self {
            any_comment: Duration::from_secs(30),
            same_comment: Duration::from_secs(600),
        }
    }
}

/// Incremental builder; [`build`] wraps it for the common case.
#[derive(Debug)]
pub struct ChangesetBuilder {
    windows: MergeWindows,
    open: Option<OpenChangeset>,
    done: Vec<Changeset>,
    last: Option<(u64, chrono::DateTime<chrono::Utc>)>,
}

#[derive(Debug)]
struct OpenChangeset {
    revisions: Vec<Revision>,
    /// Comment of the first revision that had one
    comment: BString,
}

impl OpenChangeset {
    fn start(rev: Revision) -> Self {
        Self {
            comment: rev.comment.clone(),
            revisions: vec![rev],
        }
    }

    fn accepts(&self, rev: &Revision, windows: &MergeWindows) -> bool {
        let Some(newest) = self.revisions.last() else {
            return false;
        };
        if newest.author != rev.author {
            return false;
        }
        // Negative gaps are rejected before we get here
        let gap = (rev.timestamp - newest.timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if gap <= windows.any_comment {
            return true;
        }
        gap <= windows.same_comment && !rev.comment.is_empty() && rev.comment == self.comment
    }

    fn push(&mut self, rev: Revision) {
        if self.comment.is_empty() {
            self.comment = rev.comment.clone();
        }
        self.revisions.push(rev);
    }

    fn finish(self) -> Changeset {
        let first = &self.revisions[0];
        Changeset {
            time: first.timestamp,
            author: first.author.clone(),
            comment: derive_comment(&self.revisions),
            revisions: self.revisions,
        }
    }
}

/// Distinct non-empty comments in first-seen order, one per line.
pub fn derive_comment(revisions: &[Revision]) -> BString {
    let mut seen: Vec<&[u8]> = Vec::new();
    for rev in revisions {
        let text = rev.comment.trim();
        if !text.is_empty() && !seen.contains(&text) {
            seen.push(text);
        }
    }
    BString::from(bstr::join("\n", seen))
}

impl ChangesetBuilder {
    pub fn new(windows: MergeWindows) -> Self {
        Self {
            windows,
            open: None,
            done: Vec::new(),
            last: None,
        }
    }

    pub fn push(&mut self, rev: Revision) -> Result<(), BuildError> {
        if let Some((sequence, timestamp)) = self.last {
            if rev.sequence <= sequence {
                return Err(BuildError::StreamOrderViolation {
                    sequence: rev.sequence,
                    reason: format!("sequence does not increase (previous {sequence})"),
                });
            }
            if rev.timestamp < timestamp {
                return Err(BuildError::StreamOrderViolation {
                    sequence: rev.sequence,
                    reason: format!("timestamp {} precedes {}", rev.timestamp, timestamp),
                });
            }
        }
        self.last = Some((rev.sequence, rev.timestamp));

        match self.open.as_mut() {
            Some(open) if open.accepts(&rev, &self.windows) => open.push(rev),
            _ => {
                if let Some(open) = self.open.replace(OpenChangeset::start(rev)) {
                    self.close(open);
                }
            }
        }
        Ok(())
    }

    fn close(&mut self, open: OpenChangeset) {
        let changeset = open.finish();
        debug!(
            time = %changeset.time,
            author = %changeset.author,
            revisions = changeset.revisions.len(),
            "changeset closed"
        );
        self.done.push(changeset);
    }

    /// Changesets closed so far; the open one is not counted.
    pub fn closed(&self) -> usize {
        self.done.len()
    }

    pub fn finish(mut self) -> Vec<Changeset> {
        if let Some(open) = self.open.take() {
            self.close(open);
        }
        self.done
    }
}

/// Builds the whole changeset sequence, checking `cancel` between revisions.
pub fn build<I>(
    revisions: I,
    windows: MergeWindows,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(usize),
) -> Result<Vec<Changeset>, BuildError>
where
    I: IntoIterator<Item = Revision>,
{
    let mut builder = ChangesetBuilder::new(windows);
    for (processed, rev) in revisions.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled { processed });
        }
        builder.push(rev)?;
        on_progress(builder.closed());
    }
    let changesets = builder.finish();
    on_progress(changesets.len());
    info!(changesets = changesets.len(), "changesets built");
    Ok(changesets)
}
