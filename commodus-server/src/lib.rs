pub mod config;
pub mod github;
pub mod ledger;
pub mod lifecycle;
pub mod reporter;
pub mod status;
pub mod store;
pub mod webhook;

use std::sync::Arc;

pub use github::GitHubClient;
pub use ledger::Ledger;
pub use lifecycle::{Gatekeeper, Handled, IgnoreReason};
pub use reporter::{HeadResolver, StatusReport, StatusReporter, StatusState};
pub use store::{InMemoryStore, LedgerStore, SqliteStore, StoreError};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn get_version() -> String {
    // First check for git hash from Nix build environment
    let git_hash = option_env!("COMMODUS_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match git_hash {
        Some(hash) if hash.len() >= 8 => hash[..8].to_string(),
        Some(hash) => hash.to_string(),
        None => "unknown".to_string(),
    }
}

pub struct AppState {
    pub gatekeeper: Gatekeeper,
    pub head_resolver: Arc<dyn HeadResolver>,
    pub webhook_secret: String,
    pub status_auth_token: Option<String>,
}
