//! Tally decision engine.
//!
//! `apply_vote` is a pure function from a record and a vote to either a no-op
//! or an updated record plus the recomputed decision. Persisting the record is
//! the caller's job.
//!
//! Rules:
//! - The proposal's creator never contributes.
//! - A user whose vote has been counted once for a revision never contributes
//!   again to that revision, including changes of heart.
//! - The count never drops below zero.
//! - The decision depends only on the current count and the threshold.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Threshold;
use crate::ledger::{ApprovalRecord, UserId};
use crate::signal::NetVote;

/// Outcome reported for a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pending,
    Pass,
}

impl Decision {
    pub fn evaluate(approval_count: u32, threshold: Threshold) -> Self {
        if approval_count >= threshold.get() {
            Decision::Pass
        } else {
            Decision::Pending
        }
    }

    pub fn is_pass(self) -> bool {
        matches!(self, Decision::Pass)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Pending => write!(f, "pending"),
            Decision::Pass => write!(f, "pass"),
        }
    }
}

/// Why a vote did not change the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// The voter opened the proposal.
    SelfVote,
    /// The voter already has a counted vote on this revision.
    AlreadyVoted,
    /// The comment or review carried no net signal.
    NoSignal,
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoOpReason::SelfVote => write!(f, "author cannot vote on own proposal"),
            NoOpReason::AlreadyVoted => write!(f, "voter already counted for this revision"),
            NoOpReason::NoSignal => write!(f, "no net vote"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyOutcome {
    /// Record unchanged, nothing to report.
    NoOp(NoOpReason),
    /// Vote counted; `record` must be persisted and `decision` reported.
    Counted {
        record: ApprovalRecord,
        decision: Decision,
    },
}

/// Merge one vote into a record.
pub fn apply_vote(
    record: &ApprovalRecord,
    voter: UserId,
    vote: NetVote,
    threshold: Threshold,
) -> TallyOutcome {
    if record.is_creator(voter) {
        return TallyOutcome::NoOp(NoOpReason::SelfVote);
    }
    if record.has_voted(voter) {
        return TallyOutcome::NoOp(NoOpReason::AlreadyVoted);
    }

    let approval_count = match vote {
        NetVote::Abstain => return TallyOutcome::NoOp(NoOpReason::NoSignal),
        NetVote::Approve => record.approval_count.saturating_add(1),
        NetVote::Reject => record.approval_count.saturating_sub(1),
    };

    let mut updated = record.clone();
    updated.approval_count = approval_count;
    updated.voters.insert(voter);

    TallyOutcome::Counted {
        decision: Decision::evaluate(updated.approval_count, threshold),
        record: updated,
    }
}
