//! Recoverable faults during export and the decisions that resolve them.

mod common;

use common::*;
use legacy2git::target::MemoryTarget;
use legacy2git::{
    build_changesets, Action, CancelToken, CommentEncoding, ExportError, ExportOptions,
    FeedbackBroker, FeedbackResult, HistoryExporter, MemorySource, MergeWindows, Revision,
};
use std::sync::Arc;

fn edit_stream() -> Vec<Revision> {
    vec![
        rev(1, 0, Action::Created, "A", "$/p/a.txt"),
        version(rev(2, 1_000, Action::Edited, "A", "$/p/a.txt"), 2),
        version(rev(3, 2_000, Action::Edited, "A", "$/p/a.txt"), 3),
    ]
}

fn run(
    source: &MemorySource,
    target: &mut MemoryTarget,
    broker: &FeedbackBroker,
    revs: Vec<Revision>,
) -> Result<usize, ExportError> {
    let changesets =
        build_changesets(revs, MergeWindows::default(), &CancelToken::new(), |_| {}).unwrap();
    let options = ExportOptions::default();
    let cancel = CancelToken::new();
    HistoryExporter::new(source, target, broker, &options, &cancel)
        .export(&changesets)
        .map(|summary| summary.commits)
}

fn contents(target: &MemoryTarget, idx: usize, path: &str) -> Option<String> {
    target.commits[idx]
        .tree
        .get(path)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

#[test]
fn ignore_keeps_last_known_content_and_continues() {
    let source = MemorySource::new(vec![])
        .with_content("A", 1, "one")
        .with_content("A", 3, "three");
    let mut target = MemoryTarget::new();
    let broker = FeedbackBroker::unattended();

    assert_eq!(run(&source, &mut target, &broker, edit_stream()).unwrap(), 3);
    assert_eq!(contents(&target, 0, "p/a.txt").as_deref(), Some("one"));
    assert_eq!(contents(&target, 1, "p/a.txt").as_deref(), Some("one"));
    assert_eq!(contents(&target, 2, "p/a.txt").as_deref(), Some("three"));
}

#[test]
fn ignored_creation_leaves_path_out_until_content_arrives() {
    let source = MemorySource::new(vec![]).with_content("A", 2, "two");
    let mut target = MemoryTarget::new();
    let broker = FeedbackBroker::unattended();

    run(&source, &mut target, &broker, edit_stream()[..2].to_vec()).unwrap();
    assert!(target.commits[0].tree.is_empty());
    assert_eq!(contents(&target, 1, "p/a.txt").as_deref(), Some("two"));
}

#[test]
fn retry_fetches_again() {
    let source = MemorySource::new(vec![])
        .with_content("A", 1, "one")
        .with_content("A", 2, "two")
        .with_content("A", 3, "three")
        .failing("A", 2, 2);
    let answer = Arc::new(Answer::new(FeedbackResult::Retry));
    let broker = FeedbackBroker::attended(answer.clone());
    let mut target = MemoryTarget::new();

    assert_eq!(run(&source, &mut target, &broker, edit_stream()).unwrap(), 3);
    assert_eq!(answer.calls(), 2);
    assert_eq!(contents(&target, 1, "p/a.txt").as_deref(), Some("two"));
}

#[test]
fn abort_stops_with_partial_history() {
    let source = MemorySource::new(vec![])
        .with_content("A", 1, "one")
        .with_content("A", 3, "three");
    let broker = FeedbackBroker::attended(Arc::new(Answer::new(FeedbackResult::Abort)));
    let mut target = MemoryTarget::new();

    let err = run(&source, &mut target, &broker, edit_stream()).unwrap_err();
    assert!(matches!(err, ExportError::Aborted { exported: 1 }));
    assert_eq!(target.commits.len(), 1);
    // The partial history is still finished
    assert_eq!(target.finished, 1);
}

#[test]
fn target_is_finished_once_after_last_commit() {
    let (revs, source) = history();
    let mut target = MemoryTarget::new();
    run(&source, &mut target, &FeedbackBroker::unattended(), revs).unwrap();
    assert_eq!(target.finished, 1);

    let mut empty = MemoryTarget::new();
    run(&source, &mut empty, &FeedbackBroker::unattended(), vec![]).unwrap();
    assert_eq!(empty.finished, 0);
}

#[test]
fn target_write_failure_is_retried_on_request() {
    let (revs, source) = history();
    let broker = FeedbackBroker::attended(Arc::new(Answer::new(FeedbackResult::Retry)));
    let mut target = MemoryTarget::new().failing_commits(2);

    assert_eq!(run(&source, &mut target, &broker, revs).unwrap(), 6);
    assert_eq!(target.commits.len(), 6);
}

#[test]
fn target_write_failure_is_never_ignored() {
    let (revs, source) = history();
    // Unattended answers RetryCancel with Cancel
    let broker = FeedbackBroker::unattended();
    let mut target = MemoryTarget::new().failing_commits(1);

    let err = run(&source, &mut target, &broker, revs).unwrap_err();
    assert!(matches!(err, ExportError::TargetWrite { exported: 0, .. }));
    assert!(target.commits.is_empty());
}

#[test]
fn commits_chain_linearly_with_tags_on_the_right_commit() {
    let (revs, source) = history();
    let broker = FeedbackBroker::unattended();
    let mut target = MemoryTarget::new();
    run(&source, &mut target, &broker, revs).unwrap();

    let parents: Vec<_> = target.commits.iter().map(|c| c.parent).collect();
    assert_eq!(parents, vec![None, Some(0), Some(1), Some(2), Some(3), Some(4)]);
    assert_eq!(target.tags.len(), 1);
    assert_eq!(target.tags[0].name, "Release_1.0");
    assert_eq!(target.tags[0].commit, 2);
}

#[test]
fn cancelled_export_keeps_only_complete_commits() {
    let (revs, source) = history();
    let changesets =
        build_changesets(revs, MergeWindows::default(), &CancelToken::new(), |_| {}).unwrap();
    let broker = FeedbackBroker::unattended();
    let options = ExportOptions::default();
    let cancel = CancelToken::new();
    let mut target = MemoryTarget::new();

    HistoryExporter::new(&source, &mut target, &broker, &options, &cancel)
        .export(&changesets[..2])
        .unwrap();
    cancel.cancel();
    let mut rest = MemoryTarget::new();
    let err = HistoryExporter::new(&source, &mut rest, &broker, &options, &cancel)
        .export(&changesets)
        .unwrap_err();
    assert!(matches!(err, ExportError::Cancelled { exported: 0 }));
    assert!(rest.commits.is_empty());
    assert_eq!(target.commits.len(), 2);
}

#[test]
fn comments_decode_with_the_configured_encoding() {
    let revs = vec![{
        let mut r = rev(1, 0, Action::Created, "A", "$/p/a.txt");
        r.comment = b"caf\xe9".to_vec().into();
        r
    }];
    let source = MemorySource::new(vec![]).with_content("A", 1, "x");
    let broker = FeedbackBroker::unattended();
    let cancel = CancelToken::new();
    let changesets =
        build_changesets(revs, MergeWindows::default(), &CancelToken::new(), |_| {}).unwrap();

    let mut transcoded = MemoryTarget::new();
    HistoryExporter::new(&source, &mut transcoded, &broker, &ExportOptions::default(), &cancel)
        .export(&changesets)
        .unwrap();
    assert_eq!(transcoded.commits[0].message, "caf\u{FFFD}".as_bytes());
    assert_eq!(transcoded.commits[0].encoding, None);

    let options = ExportOptions {
        comment_encoding: CommentEncoding::PassThrough {
            label: "windows-1252".to_string(),
        },
        ..Default::default()
    };
    let legacy = ExportOptions {
        comment_encoding: CommentEncoding::Transcode {
            from: encoding_rs::WINDOWS_1252,
        },
        ..Default::default()
    };
    let mut decoded = MemoryTarget::new();
    HistoryExporter::new(&source, &mut decoded, &broker, &legacy, &cancel)
        .export(&changesets)
        .unwrap();
    assert_eq!(decoded.commits[0].message, "café".as_bytes());
    assert_eq!(decoded.commits[0].encoding, None);

    let mut raw = MemoryTarget::new();
    HistoryExporter::new(&source, &mut raw, &broker, &options, &cancel)
        .export(&changesets)
        .unwrap();
    assert_eq!(raw.commits[0].message, b"caf\xe9");
    assert_eq!(raw.commits[0].encoding.as_deref(), Some("windows-1252"));
}
