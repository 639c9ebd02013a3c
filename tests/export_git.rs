//! End-to-end export into a real git repository.

mod common;

use common::*;
use git2::{ObjectType, Repository};
use legacy2git::{
    build_changesets, CancelToken, CommentEncoding, ExportOptions, FeedbackBroker, GitTarget,
    HistoryExporter, MergeWindows,
};
use std::path::Path;

fn export_into(dir: &Path, options: &ExportOptions) -> usize {
    let (revs, source) = history();
    let changesets =
        build_changesets(revs, MergeWindows::default(), &CancelToken::new(), |_| {}).unwrap();
    let mut target = GitTarget::create(dir, "refs/heads/master").unwrap();
    let broker = FeedbackBroker::unattended();
    let cancel = CancelToken::new();
    let summary = HistoryExporter::new(&source, &mut target, &broker, options, &cancel)
        .export(&changesets)
        .unwrap();
    summary.commits
}

fn options() -> ExportOptions {
    ExportOptions {
        email_domain: Some("example.com".to_string()),
        ..Default::default()
    }
}

#[test]
fn every_commit_snapshots_cumulative_tree() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(export_into(dir.path(), &options()), 6);

    let repo = Repository::open(dir.path()).unwrap();
    let commits = git_history(&repo);
    assert_eq!(commits.len(), 6);

    let trees: Vec<_> = commits.iter().map(|&oid| git_tree(&repo, oid)).collect();
    assert_eq!(
        trees[0],
        tree(&[("Proj/a.txt", "a1"), ("Proj/b.txt", "b1")])
    );
    assert_eq!(
        trees[1],
        tree(&[("Other/a.txt", "a1"), ("Proj/a.txt", "a1"), ("Proj/b.txt", "b1")])
    );
    // An edit on the original path shows through the share
    assert_eq!(
        trees[2],
        tree(&[("Other/a.txt", "a2"), ("Proj/a.txt", "a2"), ("Proj/b.txt", "b1")])
    );
    assert_eq!(trees[3], tree(&[("Other/a.txt", "a2"), ("Proj/a.txt", "a2")]));
    assert_eq!(
        trees[4],
        tree(&[("Other/renamed.txt", "a2"), ("Proj/a.txt", "a2")])
    );
    assert_eq!(
        trees[5],
        tree(&[("Other/renamed.txt", "a2"), ("Proj/a.txt", "a2"), ("Proj/b.txt", "b1")])
    );
}

#[test]
fn authorship_time_and_messages_follow_changesets() {
    let dir = tempfile::tempdir().unwrap();
    export_into(dir.path(), &options());
    let repo = Repository::open(dir.path()).unwrap();
    let commits = git_history(&repo);

    let first = repo.find_commit(commits[0]).unwrap();
    assert_eq!(first.author().name(), Some("ann"));
    assert_eq!(first.author().email(), Some("ann@example.com"));
    assert_eq!(first.author().when().seconds(), BASE);
    assert_eq!(first.committer().when().seconds(), BASE);
    assert_eq!(first.message(), Some("initial\n"));

    let second = repo.find_commit(commits[1]).unwrap();
    assert_eq!(second.author().email(), Some("bob@example.com"));
    assert_eq!(second.time().seconds(), BASE + 100);

    let third = repo.find_commit(commits[2]).unwrap();
    assert_eq!(third.message(), Some("edit\nfirst release\n"));
}

#[test]
fn labels_become_tags_on_their_changeset_commit() {
    let dir = tempfile::tempdir().unwrap();
    export_into(dir.path(), &options());
    let repo = Repository::open(dir.path()).unwrap();
    let commits = git_history(&repo);

    let reference = repo.find_reference("refs/tags/Release_1.0").unwrap();
    let tag = reference.peel_to_tag().unwrap();
    assert_eq!(tag.target_id(), commits[2]);
    assert_eq!(tag.target_type(), Some(ObjectType::Commit));
    assert_eq!(tag.message().map(str::trim_end), Some("first release"));
    assert_eq!(tag.tagger().unwrap().email(), Some("ann@example.com"));
}

#[test]
fn reruns_are_byte_identical() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    export_into(first.path(), &options());
    export_into(second.path(), &options());

    let a = Repository::open(first.path()).unwrap();
    let b = Repository::open(second.path()).unwrap();
    assert_eq!(git_history(&a), git_history(&b));
}

#[test]
fn raw_usernames_pass_through_without_domain() {
    let dir = tempfile::tempdir().unwrap();
    export_into(dir.path(), &ExportOptions::default());
    let repo = Repository::open(dir.path()).unwrap();
    let first = repo.find_commit(git_history(&repo)[0]).unwrap();
    assert_eq!(first.author().email(), Some("ann"));
}

#[test]
fn pass_through_comments_carry_encoding_header() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ExportOptions {
        comment_encoding: CommentEncoding::PassThrough {
            label: "ISO-8859-1".to_string(),
        },
        ..options()
    };
    export_into(dir.path(), &opts);
    let repo = Repository::open(dir.path()).unwrap();
    let first = repo.find_commit(git_history(&repo)[0]).unwrap();
    assert_eq!(first.message_encoding(), Some("ISO-8859-1"));
    assert_eq!(first.message_raw_bytes(), b"initial\n");
}

#[test]
fn working_copy_matches_migrated_tip() {
    let dir = tempfile::tempdir().unwrap();
    export_into(dir.path(), &options());
    let repo = Repository::open(dir.path()).unwrap();
    assert!(!repo.is_bare());

    let statuses = repo.statuses(None).unwrap();
    let dirty: Vec<_> = statuses
        .iter()
        .map(|entry| (entry.path().map(str::to_string), entry.status()))
        .collect();
    assert!(dirty.is_empty(), "unexpected status entries: {dirty:?}");

    let on_disk = |rel: &str| std::fs::read_to_string(dir.path().join(rel)).unwrap();
    assert_eq!(on_disk("Proj/a.txt"), "a2");
    assert_eq!(on_disk("Proj/b.txt"), "b1");
    assert_eq!(on_disk("Other/renamed.txt"), "a2");
    assert!(!dir.path().join("Other/a.txt").exists());
}
