//! Revision identifiers.
//!
//! A revision string given by a user resolves to exactly one of three kinds:
//!
//! | Form | Kind |
//! |------|------|
//! | `commit:<id>` or 32 lowercase hex chars | commit |
//! | `draft:<n>` or `#<n>` | draft |
//! | `branch:<name>` or any other valid branch name | branch |
//!
//! A bare positive integer is both a valid draft number and a valid branch
//! name, so it is rejected as ambiguous. Branch names may not take the shape
//! of a commit ID, which keeps bare commit IDs unambiguous.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Name of the branch created together with every dataset.
pub const DEFAULT_BRANCH: &str = "main";

/// Length of a commit ID in hex characters.
const COMMIT_ID_LEN: usize = 32;

/// Maximum length of a branch name.
const MAX_BRANCH_LEN: usize = 128;

/// The three kinds of revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RevisionKind {
    /// An immutable commit.
    Commit,
    /// A mutable branch pointer.
    Branch,
    /// An open working revision.
    Draft,
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionKind::Commit => write!(f, "commit"),
            RevisionKind::Branch => write!(f, "branch"),
            RevisionKind::Draft => write!(f, "draft"),
        }
    }
}

/// Identifier of an immutable commit.
///
/// Commit IDs are 32 lowercase hex characters. IDs generated by
/// [`CommitId::generate`] are time-ordered.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitId(String);

impl CommitId {
    /// Parses a commit ID.
    pub fn parse(s: &str) -> CoreResult<Self> {
        if is_commit_shape(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(CoreError::invalid_reference(
                s,
                format!("commit ids are {COMMIT_ID_LEN} lowercase hex characters"),
            ))
        }
    }

    /// Generates a new time-ordered commit ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Returns the full ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the abbreviated form used in logs.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.short())
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CommitId {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::parse(&value)
    }
}

impl From<CommitId> for String {
    fn from(id: CommitId) -> Self {
        id.0
    }
}

impl FromStr for CommitId {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Self::parse(s)
    }
}

/// Name of a branch.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Validates and creates a branch name.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        match branch_name_problem(&name) {
            None => Ok(Self(name)),
            Some(reason) => Err(CoreError::invalid_reference(name, reason)),
        }
    }

    /// Returns the default branch name.
    #[must_use]
    pub fn default_branch() -> Self {
        Self(DEFAULT_BRANCH.to_string())
    }

    /// Returns the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchName({})", self.0)
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl FromStr for BranchName {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Self::new(s)
    }
}

/// Number of a draft within its dataset. Always positive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct DraftNumber(u64);

impl DraftNumber {
    /// Creates a draft number.
    pub fn new(number: u64) -> CoreResult<Self> {
        if number == 0 {
            Err(CoreError::invalid_reference(
                "0",
                "draft numbers start at 1",
            ))
        } else {
            Ok(Self(number))
        }
    }

    /// Returns the raw number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DraftNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DraftNumber({})", self.0)
    }
}

impl fmt::Display for DraftNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for DraftNumber {
    type Error = CoreError;

    fn try_from(value: u64) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<DraftNumber> for u64 {
    fn from(number: DraftNumber) -> Self {
        number.0
    }
}

/// A point in history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Revision {
    /// An immutable commit.
    Commit(CommitId),
    /// The head of a branch.
    Branch(BranchName),
    /// An open draft.
    Draft(DraftNumber),
}

impl Revision {
    /// Resolves a user-supplied revision string.
    ///
    /// Fails with `InvalidReference` when the string matches no kind and with
    /// `AmbiguousReference` when it matches more than one.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(CoreError::invalid_reference(input, "empty reference"));
        }

        if let Some(rest) = s.strip_prefix("commit:") {
            return CommitId::parse(rest).map(Revision::Commit);
        }
        if let Some(rest) = s.strip_prefix("branch:") {
            return BranchName::new(rest).map(Revision::Branch);
        }
        if let Some(rest) = s.strip_prefix("draft:").or_else(|| s.strip_prefix('#')) {
            return parse_draft_number(input, rest).map(Revision::Draft);
        }

        let mut candidates = Vec::new();
        if is_commit_shape(s) {
            candidates.push(RevisionKind::Commit);
        }
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            candidates.push(RevisionKind::Draft);
        }
        if branch_name_problem(s).is_none() {
            candidates.push(RevisionKind::Branch);
        }

        match candidates.as_slice() {
            [RevisionKind::Commit] => Ok(Revision::Commit(CommitId(s.to_string()))),
            [RevisionKind::Branch] => Ok(Revision::Branch(BranchName(s.to_string()))),
            [RevisionKind::Draft] => parse_draft_number(input, s).map(Revision::Draft),
            [] => Err(CoreError::invalid_reference(
                input,
                branch_name_problem(s).unwrap_or_else(|| "unrecognized reference".into()),
            )),
            _ => Err(CoreError::AmbiguousReference {
                reference: input.to_string(),
                candidates,
            }),
        }
    }

    /// Returns the kind of this revision.
    #[must_use]
    pub fn kind(&self) -> RevisionKind {
        match self {
            Revision::Commit(_) => RevisionKind::Commit,
            Revision::Branch(_) => RevisionKind::Branch,
            Revision::Draft(_) => RevisionKind::Draft,
        }
    }

    /// Returns true if content at this revision may be modified.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self, Revision::Draft(_))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Commit(id) => write!(f, "{id}"),
            Revision::Branch(name) if name.0.bytes().all(|b| b.is_ascii_digit()) => {
                write!(f, "branch:{name}")
            }
            Revision::Branch(name) => write!(f, "{name}"),
            Revision::Draft(number) => write!(f, "#{number}"),
        }
    }
}

impl FromStr for Revision {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Self::parse(s)
    }
}

impl From<CommitId> for Revision {
    fn from(id: CommitId) -> Self {
        Revision::Commit(id)
    }
}

impl From<BranchName> for Revision {
    fn from(name: BranchName) -> Self {
        Revision::Branch(name)
    }
}

impl From<DraftNumber> for Revision {
    fn from(number: DraftNumber) -> Self {
        Revision::Draft(number)
    }
}

fn is_commit_shape(s: &str) -> bool {
    s.len() == COMMIT_ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn parse_draft_number(input: &str, digits: &str) -> CoreResult<DraftNumber> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::invalid_reference(
            input,
            "draft numbers are positive integers",
        ));
    }
    let number = digits
        .parse::<u64>()
        .map_err(|_| CoreError::invalid_reference(input, "draft number out of range"))?;
    DraftNumber::new(number).map_err(|_| CoreError::invalid_reference(input, "draft numbers start at 1"))
}

fn branch_name_problem(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("branch name is empty".into());
    }
    if name.len() > MAX_BRANCH_LEN {
        return Some(format!("branch name exceeds {MAX_BRANCH_LEN} characters"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')))
    {
        return Some(format!("character {c:?} is not allowed in branch names"));
    }
    if name.starts_with('-') || name.starts_with('/') {
        return Some("branch name may not start with '-' or '/'".into());
    }
    if name.ends_with('/') || name.ends_with(".lock") {
        return Some("branch name may not end with '/' or '.lock'".into());
    }
    if name.contains("..") || name.contains("//") {
        return Some("branch name may not contain '..' or '//'".into());
    }
    if is_commit_shape(name) {
        return Some("branch name may not look like a commit id".into());
    }
    None
}
