//! Outbound collaborators: commit status reporting and head lookup.

use anyhow::Result;
use async_trait::async_trait;
use commodus_core::{Decision, RevisionHash, Threshold};
use serde::Serialize;
use std::fmt;

/// Commit status states this service sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Success,
}

impl From<Decision> for StatusState {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Pending => StatusState::Pending,
            Decision::Pass => StatusState::Success,
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusState::Pending => write!(f, "pending"),
            StatusState::Success => write!(f, "success"),
        }
    }
}

/// One commit status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub repo: String,
    pub revision_hash: RevisionHash,
    pub state: StatusState,
    pub description: String,
    pub context: String,
}

impl StatusReport {
    pub fn new(
        repo: impl Into<String>,
        revision_hash: RevisionHash,
        approval_count: u32,
        threshold: Threshold,
        context: impl Into<String>,
    ) -> Self {
        let decision = Decision::evaluate(approval_count, threshold);
        Self {
            repo: repo.into(),
            revision_hash,
            state: decision.into(),
            description: describe(approval_count, threshold, decision),
            context: context.into(),
        }
    }
}

/// Human-readable status description.
pub fn describe(approval_count: u32, threshold: Threshold, decision: Decision) -> String {
    match decision {
        Decision::Pass => format!(
            "Required approvals ({}/{}) has been reached!",
            approval_count, threshold
        ),
        Decision::Pending => format!(
            "Required approvals ({}/{}) has yet to be reached.",
            approval_count, threshold
        ),
    }
}

/// Pushes decisions to the external status indicator.
///
/// Best effort: the ledger is the source of truth and failures are not retried.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, report: &StatusReport) -> Result<()>;
}

/// Resolves the current head revision of a pull request.
///
/// Needed for issue comments, whose payload does not say which revision
/// the comment was made against.
#[async_trait]
pub trait HeadResolver: Send + Sync {
    async fn head_sha(&self, repo: &str, number: u64) -> Result<RevisionHash>;
}
