//! Vote ledger types.
//!
//! One `ApprovalRecord` is kept per revision of a proposal. Records for
//! superseded revisions are left in place until the proposal closes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifies a proposal: repository full name plus pull request number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionKey {
    pub repo: String,
    pub number: u64,
}

impl RevisionKey {
    pub fn new(repo: impl Into<String>, number: u64) -> Self {
        Self {
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo, self.number)
    }
}

/// Newtype for the revision (commit SHA) a record tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionHash(pub String);

impl RevisionHash {
    /// Returns a truncated hash for display (first 7 characters).
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RevisionHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RevisionHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a GitHub user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Tracked vote state for one revision of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub revision_hash: RevisionHash,
    pub approval_count: u32,
    /// Users whose vote has already been counted for this revision.
    pub voters: BTreeSet<UserId>,
    pub creator_id: UserId,
}

impl ApprovalRecord {
    /// A fresh record: no approvals, nobody has voted.
    pub fn new(revision_hash: impl Into<RevisionHash>, creator_id: UserId) -> Self {
        Self {
            revision_hash: revision_hash.into(),
            approval_count: 0,
            voters: BTreeSet::new(),
            creator_id,
        }
    }

    pub fn is_creator(&self, user: UserId) -> bool {
        self.creator_id == user
    }

    pub fn has_voted(&self, user: UserId) -> bool {
        self.voters.contains(&user)
    }
}
