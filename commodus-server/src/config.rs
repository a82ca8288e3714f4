use anyhow::{anyhow, Context, Result};
use commodus_core::signal::{DEFAULT_APPROVE_TOKENS, DEFAULT_REJECT_TOKENS};
use commodus_core::{SignalTokens, TallyConfig, Threshold};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::github::DEFAULT_API_URL;
use crate::lifecycle::DEFAULT_STATUS_CONTEXT;

pub const LEDGER_DB_FILE: &str = "commodus-ledger.db";

/// Where approval records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Sqlite,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(LedgerBackend::Sqlite),
            "memory" => Ok(LedgerBackend::Memory),
            other => Err(anyhow!(
                "unknown ledger backend {:?} (expected \"sqlite\" or \"memory\")",
                other
            )),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub github_webhook_secret: String,
    pub github_token: String,
    pub github_api_url: String,
    pub tally: TallyConfig,
    pub status_context: String,
    pub port: u16,
    /// Directory for the SQLite ledger. Defaults to current working directory.
    pub state_dir: PathBuf,
    pub ledger_backend: LedgerBackend,
    /// Optional bearer token for /status endpoint authentication.
    /// If not set, /status endpoint is disabled.
    pub status_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_webhook_secret = env::var("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let github_token =
            env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable is required")?;

        let github_api_url =
            env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let threshold = match env::var("REQUIRED_APPROVALS") {
            Ok(raw) => raw
                .parse::<Threshold>()
                .context("REQUIRED_APPROVALS must be a number of at least 1")?,
            Err(_) => Threshold::default(),
        };

        let tokens = SignalTokens::new(
            parse_token_list(env::var("APPROVE_TOKENS").ok(), DEFAULT_APPROVE_TOKENS),
            parse_token_list(env::var("REJECT_TOKENS").ok(), DEFAULT_REJECT_TOKENS),
        );
        let tally =
            TallyConfig::new(threshold, tokens).context("Invalid APPROVE_TOKENS/REJECT_TOKENS")?;

        let status_context =
            env::var("STATUS_CONTEXT").unwrap_or_else(|_| DEFAULT_STATUS_CONTEXT.to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let ledger_backend = env::var("LEDGER_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_string())
            .parse::<LedgerBackend>()
            .context("Invalid LEDGER_BACKEND")?;

        let status_auth_token = parse_status_auth_token(env::var("STATUS_AUTH_TOKEN").ok());

        Ok(Config {
            github_webhook_secret,
            github_token,
            github_api_url,
            tally,
            status_context,
            port,
            state_dir,
            ledger_backend,
            status_auth_token,
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(LEDGER_DB_FILE)
    }
}

/// Parse a comma-separated token list; missing or blank falls back to `defaults`.
pub fn parse_token_list(value: Option<String>, defaults: &[&str]) -> Vec<String> {
    let parsed: Vec<String> = value
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    if parsed.is_empty() {
        defaults.iter().map(|t| t.to_string()).collect()
    } else {
        parsed
    }
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so an empty token can never grant unauthenticated access.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_auth_token_none() {
        assert_eq!(parse_status_auth_token(None), None);
    }

    #[test]
    fn test_parse_status_auth_token_blank() {
        assert_eq!(parse_status_auth_token(Some("".to_string())), None);
        assert_eq!(parse_status_auth_token(Some("   ".to_string())), None);
        assert_eq!(parse_status_auth_token(Some("\t\n".to_string())), None);
    }

    #[test]
    fn test_parse_status_auth_token_preserved_verbatim() {
        assert_eq!(
            parse_status_auth_token(Some("secret-token".to_string())),
            Some("secret-token".to_string())
        );
        assert_eq!(
            parse_status_auth_token(Some("  token  ".to_string())),
            Some("  token  ".to_string())
        );
    }

    #[test]
    fn test_parse_token_list_defaults() {
        assert_eq!(
            parse_token_list(None, &["+1", ":+1:"]),
            vec!["+1".to_string(), ":+1:".to_string()]
        );
        assert_eq!(
            parse_token_list(Some(" , ,".to_string()), &["+1"]),
            vec!["+1".to_string()]
        );
    }

    #[test]
    fn test_parse_token_list_custom() {
        assert_eq!(
            parse_token_list(Some("lgtm, ship it ,".to_string()), &["+1"]),
            vec!["lgtm".to_string(), "ship it".to_string()]
        );
    }

    #[test]
    fn test_ledger_backend_from_str() {
        assert_eq!("sqlite".parse::<LedgerBackend>().unwrap(), LedgerBackend::Sqlite);
        assert_eq!(" Memory ".parse::<LedgerBackend>().unwrap(), LedgerBackend::Memory);
        assert!("redis".parse::<LedgerBackend>().is_err());
    }
}
