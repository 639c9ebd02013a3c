//! Shared fixtures for integration tests
//!
//! Builds revision streams and answers feedback requests without a
//! terminal.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use git2::{Oid, Repository, TreeWalkMode, TreeWalkResult};
use legacy2git::feedback::{FeedbackHandler, FeedbackRequest};
use legacy2git::{Action, FeedbackResult, MemorySource, Revision};

/// Epoch of every fixture stream
pub const BASE: i64 = 1_230_000_000;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE + secs, 0).unwrap()
}

pub fn rev(seq: u64, secs: i64, action: Action, item: &str, path: &str) -> Revision {
    Revision {
        sequence: seq,
        item: item.to_string(),
        version: 1,
        path: path.to_string(),
        action,
        timestamp: at(secs),
        author: "ann".to_string(),
        comment: Default::default(),
        target_path: None,
        label: None,
    }
}

pub fn by(mut r: Revision, author: &str) -> Revision {
    r.author = author.to_string();
    r
}

pub fn with_comment(mut r: Revision, comment: &str) -> Revision {
    r.comment = comment.into();
    r
}

pub fn version(mut r: Revision, v: u32) -> Revision {
    r.version = v;
    r
}

pub fn to(mut r: Revision, target: &str) -> Revision {
    r.target_path = Some(target.to_string());
    r
}

pub fn label(mut r: Revision, name: &str) -> Revision {
    r.label = Some(name.to_string());
    r
}

/// Six changesets exercising create, share, edit fan-out, label, delete,
/// rename and recover.
pub fn history() -> (Vec<Revision>, MemorySource) {
    let revs = vec![
        with_comment(rev(1, 0, Action::Created, "A", "$/Proj/a.txt"), "initial"),
        rev(2, 5, Action::Created, "B", "$/Proj/b.txt"),
        by(
            with_comment(to(rev(3, 100, Action::Shared, "A", "$/Proj/a.txt"), "$/Other/a.txt"), "share"),
            "bob",
        ),
        version(with_comment(rev(4, 200, Action::Edited, "A", "$/Proj/a.txt"), "edit"), 2),
        label(
            with_comment(rev(5, 205, Action::Labeled, "P", "$/Proj"), "first release"),
            "Release 1.0",
        ),
        rev(6, 1_000, Action::Deleted, "B", "$/Proj/b.txt"),
        to(rev(7, 2_000, Action::Renamed, "A", "$/Other/a.txt"), "$/Other/renamed.txt"),
        rev(8, 3_000, Action::Recovered, "B", "$/Proj/b.txt"),
    ];
    let source = MemorySource::new(revs.clone())
        .with_content("A", 1, "a1")
        .with_content("A", 2, "a2")
        .with_content("B", 1, "b1");
    (revs, source)
}

pub fn tree(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect()
}

/// Path to content of every blob in a commit's tree.
pub fn git_tree(repo: &Repository, commit: Oid) -> BTreeMap<String, String> {
    let tree = repo.find_commit(commit).unwrap().tree().unwrap();
    let mut out = BTreeMap::new();
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if let Ok(blob) = entry.to_object(repo).and_then(|o| o.peel_to_blob()) {
            let path = format!("{root}{}", entry.name().unwrap());
            out.insert(path, String::from_utf8_lossy(blob.content()).into_owned());
        }
        TreeWalkResult::Ok
    })
    .unwrap();
    out
}

/// Commits reachable from HEAD, oldest first.
pub fn git_history(repo: &Repository) -> Vec<Oid> {
    let mut oids = Vec::new();
    let mut next = repo.head().ok().and_then(|h| h.target());
    while let Some(oid) = next {
        oids.push(oid);
        let commit = repo.find_commit(oid).unwrap();
        assert!(commit.parent_count() <= 1, "history must be linear");
        next = commit.parent_id(0).ok();
    }
    oids.reverse();
    oids
}

/// Answers every request with a fixed result and counts the calls.
pub struct Answer {
    pub result: FeedbackResult,
    pub calls: AtomicUsize,
}

impl Answer {
    pub fn new(result: FeedbackResult) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeedbackHandler for Answer {
    fn handle(&self, _: &FeedbackRequest) -> FeedbackResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
    }
}
