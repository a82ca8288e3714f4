//! Lifecycle manager and event handling.
//!
//! `Gatekeeper` owns the ledger, the status reporter and the tally config.
//! Opening a proposal (or pushing a new head) creates a fresh record for that
//! revision and reports pending; closing deletes every record of the proposal;
//! comments and reviews are parsed, tallied and reported.
//!
//! Per revision: absent -> pending -> (pending <-> pass) -> absent.

use std::sync::Arc;

use commodus_core::{
    apply_vote, parse_comment, parse_review, ApprovalRecord, Decision, NetVote, NoOpReason,
    ProposalEvent, RevisionHash, RevisionKey, TallyConfig, TallyOutcome, Threshold, UserId,
};
use tracing::{debug, error, info};

use crate::ledger::Ledger;
use crate::reporter::{StatusReport, StatusReporter};
use crate::store::StoreError;

pub const DEFAULT_STATUS_CONTEXT: &str = "commodus/approvals";

/// Why an event changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No record for this revision: never opened through this service, or
    /// already closed.
    NotTracked,
    NoOpVote(NoOpReason),
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Opened {
        decision: Decision,
    },
    Closed {
        removed: usize,
    },
    Counted {
        approval_count: u32,
        threshold: Threshold,
        decision: Decision,
    },
    Ignored(IgnoreReason),
}

pub struct Gatekeeper {
    ledger: Ledger,
    reporter: Arc<dyn StatusReporter>,
    config: TallyConfig,
    context: String,
}

impl Gatekeeper {
    pub fn new(
        ledger: Ledger,
        reporter: Arc<dyn StatusReporter>,
        config: TallyConfig,
        context: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            reporter,
            config,
            context: context.into(),
        }
    }

    pub fn config(&self) -> &TallyConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Handle one normalized event with the threshold resolved for this request.
    ///
    /// Only ledger failures are returned as errors; the event should then be
    /// redelivered. Status reporting failures are logged and swallowed.
    pub async fn handle(
        &self,
        event: ProposalEvent,
        threshold: Threshold,
    ) -> Result<Handled, StoreError> {
        info!(
            "Handling {} for {} (threshold {})",
            event.log_summary(),
            event.key(),
            threshold
        );

        match event {
            ProposalEvent::Opened {
                key,
                revision_hash,
                creator_id,
            } => self.on_opened(&key, revision_hash, creator_id, threshold).await,
            ProposalEvent::Closed { key } => self.on_closed(&key).await,
            ProposalEvent::CommentPosted {
                key,
                revision_hash,
                author_id,
                body,
            } => {
                let vote = parse_comment(&body, &self.config.tokens);
                self.on_vote(&key, &revision_hash, author_id, vote, threshold)
                    .await
            }
            ProposalEvent::ReviewSubmitted {
                key,
                revision_hash,
                author_id,
                verdict,
            } => {
                let vote = parse_review(verdict);
                self.on_vote(&key, &revision_hash, author_id, vote, threshold)
                    .await
            }
        }
    }

    /// Start tracking a revision with zero approvals and report pending.
    pub async fn on_opened(
        &self,
        key: &RevisionKey,
        revision_hash: RevisionHash,
        creator_id: UserId,
        threshold: Threshold,
    ) -> Result<Handled, StoreError> {
        let guard = self.ledger.lock(key).await;
        let record = ApprovalRecord::new(revision_hash.clone(), creator_id);
        guard.put(record).await?;

        info!(
            "Tracking {} at {} (creator {})",
            key,
            revision_hash.short(),
            creator_id
        );

        self.report(key, revision_hash, 0, threshold).await;
        Ok(Handled::Opened {
            decision: Decision::evaluate(0, threshold),
        })
    }

    /// Stop tracking every revision of a proposal.
    pub async fn on_closed(&self, key: &RevisionKey) -> Result<Handled, StoreError> {
        let removed = self.ledger.lock(key).await.delete_all().await?;
        info!("Closed {}: removed {} tracked revision(s)", key, removed);
        Ok(Handled::Closed { removed })
    }

    /// Current record for a revision; `None` means the event should be ignored.
    pub async fn lookup(
        &self,
        key: &RevisionKey,
        revision_hash: &RevisionHash,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        self.ledger.lookup(key, revision_hash).await
    }

    async fn on_vote(
        &self,
        key: &RevisionKey,
        revision_hash: &RevisionHash,
        voter: UserId,
        vote: NetVote,
        threshold: Threshold,
    ) -> Result<Handled, StoreError> {
        let guard = self.ledger.lock(key).await;

        let Some(record) = guard.get(revision_hash).await? else {
            info!(
                "Ignoring vote on {} at {}: revision not tracked",
                key,
                revision_hash.short()
            );
            guard.release().await;
            return Ok(Handled::Ignored(IgnoreReason::NotTracked));
        };

        match apply_vote(&record, voter, vote, threshold) {
            TallyOutcome::NoOp(reason) => {
                debug!(
                    "Vote {} from {} on {} at {} ignored: {}",
                    vote,
                    voter,
                    key,
                    revision_hash.short(),
                    reason
                );
                Ok(Handled::Ignored(IgnoreReason::NoOpVote(reason)))
            }
            TallyOutcome::Counted { record, decision } => {
                let approval_count = record.approval_count;
                guard.put(record).await?;

                info!(
                    "Counted {} from {} on {} at {}: {}/{} ({})",
                    vote,
                    voter,
                    key,
                    revision_hash.short(),
                    approval_count,
                    threshold,
                    decision
                );

                // Reported while still holding the proposal lock so that
                // statuses for one proposal are sent in ledger order.
                self.report(key, revision_hash.clone(), approval_count, threshold)
                    .await;

                Ok(Handled::Counted {
                    approval_count,
                    threshold,
                    decision,
                })
            }
        }
    }

    async fn report(
        &self,
        key: &RevisionKey,
        revision_hash: RevisionHash,
        approval_count: u32,
        threshold: Threshold,
    ) {
        let report = StatusReport::new(
            key.repo.clone(),
            revision_hash,
            approval_count,
            threshold,
            self.context.clone(),
        );

        if let Err(e) = self.reporter.report(&report).await {
            error!(
                "Failed to report {} status for {} at {}: {:#}",
                report.state,
                key,
                report.revision_hash.short(),
                e
            );
        }
    }
}
