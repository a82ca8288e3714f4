//! Tally configuration: the approval threshold and the vote tokens.
//!
//! Built once at startup and passed into the engine by value or reference.
//! A per-request threshold override produces a new `Threshold`, never a
//! mutation of the shared config.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::signal::SignalTokens;

pub const DEFAULT_THRESHOLD: u32 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("threshold must be at least 1, got {0}")]
    ZeroThreshold(u32),

    #[error("invalid threshold {value:?}: {reason}")]
    InvalidThreshold { value: String, reason: String },

    #[error("no approve tokens configured")]
    NoApproveTokens,

    #[error("token {0:?} is configured as both approve and reject")]
    AmbiguousToken(String),
}

/// Minimum approval count for a revision to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Threshold(u32);

impl Threshold {
    pub fn new(value: u32) -> Result<Self, ConfigError> {
        if value == 0 {
            return Err(ConfigError::ZeroThreshold(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Threshold {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidThreshold {
                value: s.to_string(),
                reason: e.to_string(),
            })?;
        Self::new(value)
    }
}

/// Immutable configuration consumed by the tally engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallyConfig {
    pub threshold: Threshold,
    pub tokens: SignalTokens,
}

impl TallyConfig {
    pub fn new(threshold: Threshold, tokens: SignalTokens) -> Result<Self, ConfigError> {
        if tokens.approve().is_empty() {
            return Err(ConfigError::NoApproveTokens);
        }
        if let Some(token) = tokens.approve().iter().find(|t| tokens.reject().contains(*t)) {
            return Err(ConfigError::AmbiguousToken(token.clone()));
        }
        Ok(Self { threshold, tokens })
    }

    /// Threshold to use for one request: the override if given, else the default.
    pub fn resolve_threshold(&self, requested: Option<Threshold>) -> Threshold {
        requested.unwrap_or(self.threshold)
    }
}
