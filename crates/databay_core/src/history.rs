//! Commits, branches, drafts and ancestry.
//!
//! The commit graph is a parent-linked chain owned by the server. Nothing
//! here holds the graph in memory: ancestry questions are answered by walking
//! parent links through a [`CommitSource`], one lookup at a time.

use crate::error::{CoreError, CoreResult};
use crate::revision::{BranchName, CommitId, DraftNumber};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// An immutable node in a dataset's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    /// Commit ID.
    pub id: CommitId,
    /// Parent commit, `None` for the first commit of a dataset.
    pub parent: Option<CommitId>,
    /// Commit message.
    pub message: String,
    /// Who committed.
    pub committer: String,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

/// A mutable pointer to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    /// Branch name.
    pub name: BranchName,
    /// Head commit, `None` until the first commit lands on the branch.
    pub head: Option<CommitId>,
}

/// Lifecycle status of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftStatus {
    /// Open for edits.
    Open,
    /// Discarded without affecting history.
    Closed,
    /// Turned into a commit.
    Committed,
}

impl DraftStatus {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Open => "OPEN",
            DraftStatus::Closed => "CLOSED",
            DraftStatus::Committed => "COMMITTED",
        }
    }

    /// Returns true for the two terminal states.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DraftStatus::Open)
    }

    /// Returns true if a draft may move from `self` to `next`.
    pub fn can_transition_to(&self, next: DraftStatus) -> bool {
        matches!(
            (self, next),
            (DraftStatus::Open, DraftStatus::Closed) | (DraftStatus::Open, DraftStatus::Committed)
        )
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A working revision staged on top of a branch head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    /// Draft number.
    pub number: DraftNumber,
    /// Branch the draft will be committed to.
    pub branch: BranchName,
    /// Branch head at the time the draft was created.
    pub parent: Option<CommitId>,
    /// Title.
    pub title: String,
    /// Current status.
    pub status: DraftStatus,
}

impl Draft {
    /// Returns true if the draft is open.
    pub fn is_open(&self) -> bool {
        self.status == DraftStatus::Open
    }
}

/// Looks up commits by ID.
pub trait CommitSource {
    /// Error produced by the lookup.
    type Error;

    /// Returns the commit with the given ID.
    fn commit(&self, id: &CommitId) -> Result<Commit, Self::Error>;
}

impl<S: CommitSource + ?Sized> CommitSource for &S {
    type Error = S::Error;

    fn commit(&self, id: &CommitId) -> Result<Commit, Self::Error> {
        (**self).commit(id)
    }
}

/// An in-memory commit source.
#[derive(Debug, Clone, Default)]
pub struct MemoryCommits {
    commits: HashMap<CommitId, Commit>,
}

impl MemoryCommits {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a commit.
    pub fn insert(&mut self, commit: Commit) {
        self.commits.insert(commit.id.clone(), commit);
    }

    /// Returns the number of known commits.
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Returns true if no commits are known.
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

impl CommitSource for MemoryCommits {
    type Error = CoreError;

    fn commit(&self, id: &CommitId) -> CoreResult<Commit> {
        self.commits
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::CommitNotFound { id: id.to_string() })
    }
}

/// Returns true if `ancestor` is reachable from `descendant` by following
/// parent links. A commit is its own ancestor.
pub fn is_ancestor<S: CommitSource>(
    source: &S,
    ancestor: &CommitId,
    descendant: &CommitId,
) -> Result<bool, S::Error> {
    let mut seen = HashSet::new();
    let mut cursor = Some(descendant.clone());

    while let Some(id) = cursor {
        if &id == ancestor {
            return Ok(true);
        }
        if !seen.insert(id.clone()) {
            // A cycle can only come from a corrupt source; it never reaches the ancestor.
            return Ok(false);
        }
        cursor = source.commit(&id)?.parent;
    }

    Ok(false)
}

/// Relationship between a draft's base commit and its branch's head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lineage {
    /// The head is still the base.
    UpToDate,
    /// The head descends from the base (someone committed since).
    Advanced,
    /// The head does not descend from the base.
    Diverged,
}

impl Lineage {
    /// Returns true if committing on top of the base is safe.
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Lineage::UpToDate)
    }
}

/// Classifies `head` relative to `base`. `None` is the empty root and is an
/// ancestor of every commit.
pub fn lineage<S: CommitSource>(
    source: &S,
    base: Option<&CommitId>,
    head: Option<&CommitId>,
) -> Result<Lineage, S::Error> {
    match (base, head) {
        (None, None) => Ok(Lineage::UpToDate),
        (Some(b), Some(h)) if b == h => Ok(Lineage::UpToDate),
        (None, Some(_)) => Ok(Lineage::Advanced),
        (Some(_), None) => Ok(Lineage::Diverged),
        (Some(b), Some(h)) => {
            if is_ancestor(source, b, h)? {
                Ok(Lineage::Advanced)
            } else {
                Ok(Lineage::Diverged)
            }
        }
    }
}

/// Returns up to `limit` commits starting at `head`, newest first.
pub fn history<S: CommitSource>(
    source: &S,
    head: &CommitId,
    limit: usize,
) -> Result<Vec<Commit>, S::Error> {
    let mut log = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(head.clone());

    while let Some(id) = cursor {
        if log.len() >= limit || !seen.insert(id.clone()) {
            break;
        }
        let commit = source.commit(&id)?;
        cursor = commit.parent.clone();
        log.push(commit);
    }

    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(len: usize) -> (MemoryCommits, Vec<CommitId>) {
        let mut source = MemoryCommits::new();
        let mut ids: Vec<CommitId> = Vec::new();
        for i in 0..len {
            let id = CommitId::parse(&format!("{:032x}", i + 1)).unwrap();
            source.insert(Commit {
                id: id.clone(),
                parent: ids.last().cloned(),
                message: format!("c{i}"),
                committer: "tester".into(),
                timestamp: i as u64,
            });
            ids.push(id);
        }
        (source, ids)
    }

    #[test]
    fn ancestor_is_asymmetric() {
        let (source, ids) = chain(4);
        assert!(is_ancestor(&source, &ids[0], &ids[3]).unwrap());
        assert!(!is_ancestor(&source, &ids[3], &ids[0]).unwrap());
        assert!(is_ancestor(&source, &ids[2], &ids[2]).unwrap());
    }

    #[test]
    fn unrelated_commits_diverge() {
        let (mut source, ids) = chain(2);
        let stray = CommitId::parse(&format!("{:032x}", 99)).unwrap();
        source.insert(Commit {
            id: stray.clone(),
            parent: Some(ids[0].clone()),
            message: "side".into(),
            committer: "tester".into(),
            timestamp: 5,
        });

        assert_eq!(
            lineage(&source, Some(&ids[1]), Some(&stray)).unwrap(),
            Lineage::Diverged
        );
        assert_eq!(
            lineage(&source, Some(&ids[0]), Some(&stray)).unwrap(),
            Lineage::Advanced
        );
        assert_eq!(
            lineage(&source, Some(&ids[1]), Some(&ids[1])).unwrap(),
            Lineage::UpToDate
        );
    }

    #[test]
    fn root_lineage() {
        let (source, ids) = chain(1);
        assert_eq!(lineage(&source, None, None).unwrap(), Lineage::UpToDate);
        assert_eq!(
            lineage(&source, None, Some(&ids[0])).unwrap(),
            Lineage::Advanced
        );
        assert_eq!(
            lineage(&source, Some(&ids[0]), None).unwrap(),
            Lineage::Diverged
        );
    }

    #[test]
    fn missing_commit_surfaces_error() {
        let (source, ids) = chain(1);
        let unknown = CommitId::parse(&format!("{:032x}", 77)).unwrap();
        assert!(matches!(
            is_ancestor(&source, &ids[0], &unknown),
            Err(CoreError::CommitNotFound { .. })
        ));
    }

    #[test]
    fn history_is_newest_first() {
        let (source, ids) = chain(5);
        let log = history(&source, &ids[4], 3).unwrap();
        let messages: Vec<_> = log.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["c4", "c3", "c2"]);
    }

    #[test]
    fn draft_transitions() {
        assert!(DraftStatus::Open.can_transition_to(DraftStatus::Committed));
        assert!(DraftStatus::Open.can_transition_to(DraftStatus::Closed));
        assert!(!DraftStatus::Closed.can_transition_to(DraftStatus::Open));
        assert!(!DraftStatus::Committed.can_transition_to(DraftStatus::Closed));
        assert!(DraftStatus::Closed.is_terminal());
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&DraftStatus::Committed).unwrap(),
            "\"COMMITTED\""
        );
        assert_eq!(DraftStatus::Open.to_string(), "OPEN");
    }
}
