//! Normalized proposal events.
//!
//! The webhook layer turns GitHub payloads into these; the engine never sees
//! raw JSON.

use serde::{Deserialize, Serialize};

use crate::ledger::{RevisionHash, RevisionKey, UserId};
use crate::signal::ReviewVerdict;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalEvent {
    /// Pull request opened, reopened, or pushed to (new head revision).
    Opened {
        key: RevisionKey,
        revision_hash: RevisionHash,
        creator_id: UserId,
    },
    Closed {
        key: RevisionKey,
    },
    CommentPosted {
        key: RevisionKey,
        revision_hash: RevisionHash,
        author_id: UserId,
        body: String,
    },
    ReviewSubmitted {
        key: RevisionKey,
        revision_hash: RevisionHash,
        author_id: UserId,
        verdict: ReviewVerdict,
    },
}

impl ProposalEvent {
    pub fn key(&self) -> &RevisionKey {
        match self {
            ProposalEvent::Opened { key, .. }
            | ProposalEvent::Closed { key }
            | ProposalEvent::CommentPosted { key, .. }
            | ProposalEvent::ReviewSubmitted { key, .. } => key,
        }
    }

    /// Short description for logs; omits comment bodies.
    pub fn log_summary(&self) -> String {
        match self {
            ProposalEvent::Opened {
                revision_hash,
                creator_id,
                ..
            } => format!("Opened({}, creator {})", revision_hash.short(), creator_id),
            ProposalEvent::Closed { .. } => "Closed".to_string(),
            ProposalEvent::CommentPosted {
                revision_hash,
                author_id,
                ..
            } => format!(
                "CommentPosted({}, author {})",
                revision_hash.short(),
                author_id
            ),
            ProposalEvent::ReviewSubmitted {
                revision_hash,
                author_id,
                verdict,
                ..
            } => format!(
                "ReviewSubmitted({}, author {}, {:?})",
                revision_hash.short(),
                author_id,
                verdict
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_for_every_kind() {
        let key = RevisionKey::new("octo/widgets", 7);
        let events = vec![
            ProposalEvent::Opened {
                key: key.clone(),
                revision_hash: "abc".into(),
                creator_id: UserId(1),
            },
            ProposalEvent::Closed { key: key.clone() },
            ProposalEvent::CommentPosted {
                key: key.clone(),
                revision_hash: "abc".into(),
                author_id: UserId(2),
                body: "+1".to_string(),
            },
            ProposalEvent::ReviewSubmitted {
                key: key.clone(),
                revision_hash: "abc".into(),
                author_id: UserId(2),
                verdict: ReviewVerdict::Approved,
            },
        ];
        for event in &events {
            assert_eq!(event.key(), &key);
        }
    }

    #[test]
    fn test_log_summary_omits_body() {
        let event = ProposalEvent::CommentPosted {
            key: RevisionKey::new("octo/widgets", 7),
            revision_hash: "1234567890".into(),
            author_id: UserId(2),
            body: "secret text".to_string(),
        };
        let summary = event.log_summary();
        assert_eq!(summary, "CommentPosted(1234567, author 2)");
        assert!(!summary.contains("secret"));
    }

    #[test]
    fn test_tagged_serialization() {
        let event = ProposalEvent::Closed {
            key: RevisionKey::new("octo/widgets", 7),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "closed");
        assert_eq!(json["key"]["number"], 7);
    }
}
