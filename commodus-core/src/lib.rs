//! Approval tally engine.
//!
//! Decides whether a pull request revision has collected enough independent
//! approvals. Pure and synchronous; storage, transport and status reporting
//! live in `commodus-server`.

pub mod config;
pub mod event;
pub mod ledger;
pub mod signal;
pub mod tally;

pub use config::{ConfigError, TallyConfig, Threshold, DEFAULT_THRESHOLD};
pub use event::ProposalEvent;
pub use ledger::{ApprovalRecord, RevisionHash, RevisionKey, UserId};
pub use signal::{parse_comment, parse_review, NetVote, ReviewVerdict, SignalTokens};
pub use tally::{apply_vote, Decision, NoOpReason, TallyOutcome};
