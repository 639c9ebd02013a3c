//! Run-state shared between the worker and the polling caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Counters written by the worker, read by anyone.
#[derive(Debug, Default)]
pub struct Progress {
    files: AtomicUsize,
    revisions: AtomicUsize,
    changesets: AtomicUsize,
    commits: AtomicUsize,
}

impl Progress {
    pub fn set_files(&self, n: usize) {
        self.files.store(n, Ordering::Release);
    }

    pub fn set_revisions(&self, n: usize) {
        self.revisions.store(n, Ordering::Release);
    }

    pub fn set_changesets(&self, n: usize) {
        self.changesets.store(n, Ordering::Release);
    }

    pub fn inc_commits(&self) {
        self.commits.fetch_add(1, Ordering::AcqRel);
    }

    pub fn files(&self) -> usize {
        self.files.load(Ordering::Acquire)
    }

    pub fn revisions(&self) -> usize {
        self.revisions.load(Ordering::Acquire)
    }

    pub fn changesets(&self) -> usize {
        self.changesets.load(Ordering::Acquire)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::Acquire)
    }
}

/// Point-in-time copy of everything the shells display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub running: bool,
    pub status: String,
    pub elapsed: Duration,
    pub files: usize,
    pub revisions: usize,
    pub changesets: usize,
    pub commits: usize,
    /// Newline-joined faults captured since the previous snapshot
    pub exceptions: String,
}

impl StatusSnapshot {
    /// Elapsed active time as `HH:MM:SS`.
    pub fn elapsed_hms(&self) -> String {
        format_hms(self.elapsed)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}, Elapsed: {}, Files: {}, Revisions: {}, Changesets: {}",
            self.status,
            self.elapsed_hms(),
            self.files,
            self.revisions,
            self.changesets
        )
    }
}

pub fn format_hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn counters_are_visible_after_store() {
        let progress = Progress::default();
        progress.set_files(4);
        progress.inc_commits();
        progress.inc_commits();
        assert_eq!(progress.files(), 4);
        assert_eq!(progress.commits(), 2);
    }
}
