//! Write side of the migration: the target history.
//!
//! The exporter never reads its own output back; it only needs to store
//! blobs, commit full tree snapshots with explicit identity and time, and
//! point tags at commits. [`GitTarget`] does that with libgit2.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{ObjectType, Oid, Repository, Signature, Time};
use tracing::{debug, info};

use crate::error::TargetError;

/// Author identity attached to commits and annotated tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

#[derive(Debug)]
pub struct CommitRequest<'a, B, C> {
    /// Full snapshot: repository-relative path to blob
    pub tree: &'a BTreeMap<String, B>,
    pub parent: Option<&'a C>,
    pub author: &'a Identity,
    pub time: DateTime<Utc>,
    pub message: &'a [u8],
    /// Set when the message bytes are not UTF-8
    pub encoding: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAnnotation {
    pub tagger: Identity,
    pub time: DateTime<Utc>,
    pub message: String,
}

pub trait TargetRepository {
    type Blob: Clone + Eq + fmt::Debug;
    type Commit: Clone + fmt::Debug;

    fn write_blob(&mut self, bytes: &[u8]) -> Result<Self::Blob, TargetError>;

    fn commit(
        &mut self,
        request: CommitRequest<'_, Self::Blob, Self::Commit>,
    ) -> Result<Self::Commit, TargetError>;

    /// Lightweight when `annotation` is `None`.
    fn tag(
        &mut self,
        name: &str,
        commit: &Self::Commit,
        annotation: Option<&TagAnnotation>,
    ) -> Result<(), TargetError>;

    /// Called once after the last commit of a run.
    fn finish(&mut self) -> Result<(), TargetError> {
        Ok(())
    }
}

/// Target backed by a git repository on disk.
pub struct GitTarget {
    repo: Repository,
    branch: String,
}

impl fmt::Debug for GitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitTarget")
            .field("path", &self.repo.path())
            .field("branch", &self.branch)
            .finish()
    }
}

impl GitTarget {
    /// Opens or initializes the repository at `path`.
    ///
    /// The branch must not exist yet: an interrupted migration is re-run
    /// into a fresh repository, never resumed.
    pub fn create(path: &Path, branch: &str) -> Result<Self, TargetError> {
        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(_) => {
                Repository::init(path).map_err(|err| TargetError::Open(path.to_path_buf(), err))?
            }
        };
        if !git2::Reference::is_valid_name(branch) || !branch.starts_with("refs/heads/") {
            return Err(TargetError::Rejected(format!("invalid branch name {branch}")));
        }
        if repo.find_reference(branch).is_ok() {
            return Err(TargetError::Rejected(format!(
                "{branch} already exists in {}",
                path.display()
            )));
        }
        repo.set_head(branch)
            .map_err(|err| TargetError::Open(path.to_path_buf(), err))?;
        info!(path = %path.display(), branch, "target repository ready");
        Ok(Self {
            repo,
            branch: branch.to_string(),
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    fn write_tree(&self, dir: &TreeDir) -> Result<Oid, TargetError> {
        let mut builder = self.repo.treebuilder(None).map_err(TargetError::BuildTree)?;
        for (name, oid) in &dir.files {
            builder
                .insert(name, *oid, 0o100644)
                .map_err(TargetError::BuildTree)?;
        }
        for (name, sub) in &dir.dirs {
            let oid = self.write_tree(sub)?;
            builder
                .insert(name, oid, 0o040000)
                .map_err(TargetError::BuildTree)?;
        }
        builder.write().map_err(TargetError::BuildTree)
    }
}

#[derive(Debug, Default)]
struct TreeDir {
    files: BTreeMap<String, Oid>,
    dirs: BTreeMap<String, TreeDir>,
}

fn nest(tree: &BTreeMap<String, Oid>) -> Result<TreeDir, TargetError> {
    let mut root = TreeDir::default();
    for (path, oid) in tree {
        let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some(file) = parts.pop() else {
            return Err(TargetError::Rejected(format!("empty path for blob {oid}")));
        };
        let mut dir = &mut root;
        for part in parts {
            if dir.files.contains_key(part) {
                return Err(TargetError::Rejected(format!(
                    "{path}: {part} is both a file and a directory"
                )));
            }
            dir = dir.dirs.entry(part.to_string()).or_default();
        }
        if dir.dirs.contains_key(file) {
            return Err(TargetError::Rejected(format!(
                "{path} is both a file and a directory"
            )));
        }
        dir.files.insert(file.to_string(), *oid);
    }
    Ok(root)
}

fn clean_identity_part(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '<' | '>' | '\n' | '\r' | '\0'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn signature_line(identity: &Identity, time: DateTime<Utc>) -> String {
    format!(
        "{} <{}> {} +0000",
        clean_identity_part(&identity.name),
        clean_identity_part(&identity.email),
        time.timestamp()
    )
}

/// Raw commit object; written by hand so pass-through messages keep their bytes.
fn commit_buffer(tree: Oid, parent: Option<Oid>, request: &CommitRequest<'_, Oid, Oid>) -> Vec<u8> {
    let sig = signature_line(request.author, request.time);
    let mut buf = Vec::with_capacity(256 + request.message.len());
    buf.extend_from_slice(format!("tree {tree}\n").as_bytes());
    if let Some(parent) = parent {
        buf.extend_from_slice(format!("parent {parent}\n").as_bytes());
    }
    buf.extend_from_slice(format!("author {sig}\ncommitter {sig}\n").as_bytes());
    if let Some(encoding) = request.encoding {
        buf.extend_from_slice(format!("encoding {encoding}\n").as_bytes());
    }
    buf.push(b'\n');
    buf.extend_from_slice(request.message);
    if !request.message.ends_with(b"\n") {
        buf.push(b'\n');
    }
    buf
}

impl TargetRepository for GitTarget {
    type Blob = Oid;
    type Commit = Oid;

    fn write_blob(&mut self, bytes: &[u8]) -> Result<Oid, TargetError> {
        self.repo.blob(bytes).map_err(TargetError::WriteBlob)
    }

    fn commit(&mut self, request: CommitRequest<'_, Oid, Oid>) -> Result<Oid, TargetError> {
        let tree = self.write_tree(&nest(request.tree)?)?;
        let parent = request.parent.copied();
        let buf = commit_buffer(tree, parent, &request);

        let odb = self.repo.odb().map_err(TargetError::Commit)?;
        let oid = odb
            .write(ObjectType::Commit, &buf)
            .map_err(TargetError::Commit)?;
        self.repo
            .reference(&self.branch, oid, true, "legacy2git: import")
            .map_err(TargetError::Commit)?;
        debug!(%oid, %tree, "commit written");
        Ok(oid)
    }

    fn tag(
        &mut self,
        name: &str,
        commit: &Oid,
        annotation: Option<&TagAnnotation>,
    ) -> Result<(), TargetError> {
        let to_err = |source| TargetError::Tag {
            name: name.to_string(),
            source,
        };
        match annotation {
            None => {
                self.repo
                    .reference(&format!("refs/tags/{name}"), *commit, false, "legacy2git: label")
                    .map_err(to_err)?;
            }
            Some(annotation) => {
                let target = self
                    .repo
                    .find_object(*commit, Some(ObjectType::Commit))
                    .map_err(to_err)?;
                let tagger = Signature::new(
                    &clean_identity_part(&annotation.tagger.name),
                    &clean_identity_part(&annotation.tagger.email),
                    &Time::new(annotation.time.timestamp(), 0),
                )
                .map_err(to_err)?;
                self.repo
                    .tag(name, &target, &tagger, &annotation.message, false)
                    .map_err(to_err)?;
            }
        }
        debug!(tag = name, %commit, "tag written");
        Ok(())
    }

    /// Checks the branch out so the working copy matches the migrated tip.
    fn finish(&mut self) -> Result<(), TargetError> {
        if self.repo.is_bare() {
            return Ok(());
        }
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo
            .checkout_head(Some(&mut checkout))
            .map_err(TargetError::Checkout)?;
        info!(branch = %self.branch, "working copy checked out");
        Ok(())
    }
}

/// Commit recorded by [`MemoryTarget`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCommit {
    pub parent: Option<usize>,
    pub tree: BTreeMap<String, Vec<u8>>,
    pub author: Identity,
    pub time: DateTime<Utc>,
    pub message: Vec<u8>,
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTag {
    pub name: String,
    pub commit: usize,
    pub annotation: Option<TagAnnotation>,
}

/// In-memory target, with optional fault injection on commit writes.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    blobs: Vec<Vec<u8>>,
    blob_ids: HashMap<Vec<u8>, usize>,
    pub commits: Vec<MemoryCommit>,
    pub tags: Vec<MemoryTag>,
    /// Times [`TargetRepository::finish`] was called
    pub finished: usize,
    fail_commits: usize,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` commit writes fail.
    pub fn failing_commits(mut self, n: usize) -> Self {
        self.fail_commits = n;
        self
    }
}

impl TargetRepository for MemoryTarget {
    type Blob = usize;
    type Commit = usize;

    fn write_blob(&mut self, bytes: &[u8]) -> Result<usize, TargetError> {
        if let Some(&id) = self.blob_ids.get(bytes) {
            return Ok(id);
        }
        let id = self.blobs.len();
        self.blobs.push(bytes.to_vec());
        self.blob_ids.insert(bytes.to_vec(), id);
        Ok(id)
    }

    fn commit(&mut self, request: CommitRequest<'_, usize, usize>) -> Result<usize, TargetError> {
        if self.fail_commits > 0 {
            self.fail_commits -= 1;
            return Err(TargetError::Rejected("injected commit failure".to_string()));
        }
        let tree = request
            .tree
            .iter()
            .map(|(path, &blob)| (path.clone(), self.blobs[blob].clone()))
            .collect();
        self.commits.push(MemoryCommit {
            parent: request.parent.copied(),
            tree,
            author: request.author.clone(),
            time: request.time,
            message: request.message.to_vec(),
            encoding: request.encoding.map(str::to_string),
        });
        Ok(self.commits.len() - 1)
    }

    fn tag(
        &mut self,
        name: &str,
        commit: &usize,
        annotation: Option<&TagAnnotation>,
    ) -> Result<(), TargetError> {
        if self.tags.iter().any(|t| t.name == name) {
            return Err(TargetError::Rejected(format!("tag {name} exists")));
        }
        self.tags.push(MemoryTag {
            name: name.to_string(),
            commit: *commit,
            annotation: annotation.cloned(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TargetError> {
        self.finished += 1;
        Ok(())
    }
}
