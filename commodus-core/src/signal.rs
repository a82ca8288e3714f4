//! Vote extraction from comment bodies and review verdicts.
//!
//! A comment contributes at most one vote in either direction: every approve
//! token counts +1, every reject token counts -1, and the sum is clamped to
//! its sign. Quoted, heading and bullet lines are skipped so that replying to
//! someone else's "+1" does not count as a vote of your own. Tokens made of
//! letters or digits at either end only match as whole words.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The vote a single comment or review contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetVote {
    Reject,
    Abstain,
    Approve,
}

impl NetVote {
    /// Clamp a raw token balance to a single vote.
    pub fn from_net(net: i64) -> Self {
        match net.signum() {
            1 => NetVote::Approve,
            -1 => NetVote::Reject,
            _ => NetVote::Abstain,
        }
    }

    pub fn value(self) -> i32 {
        match self {
            NetVote::Reject => -1,
            NetVote::Abstain => 0,
            NetVote::Approve => 1,
        }
    }
}

impl fmt::Display for NetVote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetVote::Reject => write!(f, "-1"),
            NetVote::Abstain => write!(f, "0"),
            NetVote::Approve => write!(f, "+1"),
        }
    }
}

/// Verdict of a formal pull request review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
    #[serde(other)]
    Other,
}

impl From<&str> for ReviewVerdict {
    /// GitHub sends lowercase states in webhooks and uppercase in the REST API.
    fn from(state: &str) -> Self {
        if state.eq_ignore_ascii_case("approved") {
            ReviewVerdict::Approved
        } else if state.eq_ignore_ascii_case("changes_requested") {
            ReviewVerdict::ChangesRequested
        } else {
            ReviewVerdict::Other
        }
    }
}

/// Approve and reject tokens recognised in comment bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalTokens {
    approve: Vec<String>,
    reject: Vec<String>,
}

pub const DEFAULT_APPROVE_TOKENS: &[&str] = &["+1", ":+1:", ":thumbsup:", "\u{1F44D}"];
pub const DEFAULT_REJECT_TOKENS: &[&str] = &["-1", ":-1:", ":thumbsdown:", "\u{1F44E}"];

impl SignalTokens {
    /// Build a token set. Empty tokens are dropped.
    ///
    /// Callers that accept tokens from configuration should go through
    /// [`crate::TallyConfig::new`], which also rejects tokens listed as both
    /// approve and reject.
    pub fn new<A, R>(approve: A, reject: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            approve: normalize(approve),
            reject: normalize(reject),
        }
    }

    pub fn approve(&self) -> &[String] {
        &self.approve
    }

    pub fn reject(&self) -> &[String] {
        &self.reject
    }

    /// Longest token matching at the start of `text`, with its direction.
    /// `prev` is the character just before `text` on the same line.
    fn match_at(&self, prev: Option<char>, text: &str) -> Option<(usize, i64)> {
        let approve = longest_prefix(&self.approve, prev, text).map(|len| (len, 1));
        let reject = longest_prefix(&self.reject, prev, text).map(|len| (len, -1));
        match (approve, reject) {
            (Some(a), Some(r)) => Some(if r.0 > a.0 { r } else { a }),
            (a, r) => a.or(r),
        }
    }
}

impl Default for SignalTokens {
    fn default() -> Self {
        Self::new(
            DEFAULT_APPROVE_TOKENS.iter().copied(),
            DEFAULT_REJECT_TOKENS.iter().copied(),
        )
    }
}

fn normalize<I>(tokens: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut tokens: Vec<String> = tokens
        .into_iter()
        .map(Into::into)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    // Longest first so ":+1:" wins over "+1" at the same position.
    tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    tokens.dedup();
    tokens
}

fn longest_prefix(tokens: &[String], prev: Option<char>, text: &str) -> Option<usize> {
    tokens
        .iter()
        .find(|token| text.starts_with(token.as_str()) && is_bounded(token, prev, text))
        .map(|token| token.len())
}

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_ascii_alphanumeric())
}

/// Tokens that begin or end with a letter or digit (`+1`, `LGTM`) only count
/// as whole words, so `2024-10-01` or `i+1` do not vote. Shortcodes and
/// emoji match anywhere.
fn is_bounded(token: &str, prev: Option<char>, text: &str) -> bool {
    let wordy = is_word_char(token.chars().next()) || is_word_char(token.chars().next_back());
    if !wordy {
        return true;
    }
    let next = text[token.len()..].chars().next();
    !is_word_char(prev) && !is_word_char(next)
}

/// Whether a line is quote, heading (depth 1-4) or bullet markup.
fn is_markup_line(line: &str) -> bool {
    let trimmed = line.trim_start();

    if trimmed.starts_with('>') {
        return true;
    }

    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if (1..=4).contains(&hashes) {
        let rest = &trimmed[hashes..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return true;
        }
    }

    let mut chars = trimmed.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('-' | '*' | '+'), Some(c)) if c.is_whitespace()
    )
}

/// Token balance of one line: approvals minus rejections, non-overlapping.
fn line_balance(line: &str, tokens: &SignalTokens) -> i64 {
    let mut balance = 0;
    let mut pos = 0;

    while let Some(c) = line[pos..].chars().next() {
        let prev = line[..pos].chars().next_back();
        match tokens.match_at(prev, &line[pos..]) {
            Some((len, direction)) => {
                balance += direction;
                pos += len;
            }
            None => pos += c.len_utf8(),
        }
    }

    balance
}

/// Parse a comment body into a net vote.
pub fn parse_comment(body: &str, tokens: &SignalTokens) -> NetVote {
    let net: i64 = body
        .lines()
        .filter(|line| !is_markup_line(line))
        .map(|line| line_balance(line, tokens))
        .sum();

    NetVote::from_net(net)
}

/// Map a review verdict to a net vote.
pub fn parse_review(verdict: ReviewVerdict) -> NetVote {
    match verdict {
        ReviewVerdict::Approved => NetVote::Approve,
        ReviewVerdict::ChangesRequested => NetVote::Reject,
        ReviewVerdict::Other => NetVote::Abstain,
    }
}
