use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use commodus_core::{
    Decision, ProposalEvent, RevisionHash, RevisionKey, ReviewVerdict, Threshold, UserId,
};
use hmac::{Hmac, Mac};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::lifecycle::{Handled, IgnoreReason};
use crate::reporter::HeadResolver;
use crate::store::StoreError;
use crate::AppState;

/// Per-delivery id, attached by the signature middleware.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// The subset of a delivery that classification reads. Everything else
/// GitHub sends is ignored, so fields are only listed here when used.
#[derive(Debug, Deserialize)]
pub struct GitHubWebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PullRequest>,
    pub repository: Option<Repository>,
    pub comment: Option<Comment>,
    pub issue: Option<Issue>,
    pub review: Option<Review>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Comment {
    pub body: Option<String>,
    pub user: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub number: u64,
    /// Present only when the issue is a pull request.
    pub pull_request: Option<IgnoredAny>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub head: PullRequestHead,
    pub user: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestHead {
    pub sha: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Review {
    pub user: User,
    pub state: String,
    pub commit_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub full_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub id: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookQuery {
    /// Per-request threshold override.
    pub required_plus_ones: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

impl WebhookResponse {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            approval_count: None,
            threshold: None,
            decision: None,
        }
    }
}

impl From<Handled> for WebhookResponse {
    fn from(handled: Handled) -> Self {
        match handled {
            Handled::Opened { decision } => Self {
                decision: Some(decision),
                approval_count: Some(0),
                ..Self::message("Tracking revision")
            },
            Handled::Closed { removed } => {
                Self::message(format!("Stopped tracking {} revision(s)", removed))
            }
            Handled::Counted {
                approval_count,
                threshold,
                decision,
            } => Self {
                approval_count: Some(approval_count),
                threshold: Some(threshold.get()),
                decision: Some(decision),
                ..Self::message("Vote counted")
            },
            Handled::Ignored(IgnoreReason::NotTracked) => {
                Self::message("Ignored: revision not tracked")
            }
            Handled::Ignored(IgnoreReason::NoOpVote(reason)) => {
                Self::message(format!("Ignored: {}", reason))
            }
        }
    }
}

/// A payload that is missing something its event kind requires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("malformed JSON payload: {0}")]
    Malformed(String),

    #[error("{event} payload is missing {field}")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },
}

impl PayloadError {
    fn missing(event: &'static str, field: &'static str) -> Self {
        Self::MissingField { event, field }
    }
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to resolve head revision: {0:#}")]
    HeadLookup(anyhow::Error),
}

impl WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::Payload(_) => StatusCode::BAD_REQUEST,
            // Retryable: the delivery has not been processed.
            WebhookError::Store(_) | WebhookError::HeadLookup(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Result of classifying a delivery before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Event(ProposalEvent),
    /// An issue comment on a pull request; the payload does not carry the
    /// revision, so the current head must be looked up.
    CommentNeedsHead {
        key: RevisionKey,
        author_id: UserId,
        body: String,
    },
    Ignored(String),
}

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

fn verify_mac<M: Mac + hmac::digest::KeyInit>(secret: &str, payload: &[u8], hex_sig: &str) -> bool {
    let signature_bytes = match hex::decode(hex_sig) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match <M as hmac::digest::KeyInit>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Use constant-time verification
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Verify a GitHub signature header value (`sha256=<hex>` or `sha1=<hex>`).
pub fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if let Some(hex_sig) = signature.strip_prefix("sha256=") {
        verify_mac::<HmacSha256>(secret, payload, hex_sig)
    } else if let Some(hex_sig) = signature.strip_prefix("sha1=") {
        verify_mac::<HmacSha1>(secret, payload, hex_sig)
    } else {
        false
    }
}

/// Prefer the SHA-256 header; fall back to the legacy SHA-1 one.
fn signature_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-hub-signature-256")
        .or_else(|| headers.get("x-hub-signature"))
        .and_then(|h| h.to_str().ok())
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let Some(signature) = signature_header(&parts.headers) else {
        warn!("Webhook delivery without signature header rejected");
        return Err(StatusCode::UNAUTHORIZED);
    };

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(correlation_id);

    Ok(next.run(new_request).await)
}

/// Parse the threshold override; an invalid value falls back to the default.
pub fn requested_threshold(raw: Option<&str>) -> Option<Threshold> {
    let raw = raw?;
    match raw.parse::<Threshold>() {
        Ok(threshold) => Some(threshold),
        Err(e) => {
            warn!("Ignoring invalid required_plus_ones override: {}", e);
            None
        }
    }
}

fn repository_name(
    event: &'static str,
    payload: &GitHubWebhookPayload,
) -> Result<String, PayloadError> {
    payload
        .repository
        .as_ref()
        .map(|r| r.full_name.clone())
        .ok_or_else(|| PayloadError::missing(event, "repository"))
}

/// Map a delivery onto the event the engine understands.
pub fn classify(
    event_type: &str,
    payload: &GitHubWebhookPayload,
) -> Result<Classified, PayloadError> {
    let action = payload.action.as_deref().unwrap_or_default();

    match (event_type, action) {
        ("pull_request", "opened" | "reopened" | "synchronize") => {
            let pr = payload
                .pull_request
                .as_ref()
                .ok_or_else(|| PayloadError::missing("pull_request", "pull_request"))?;
            let repo = repository_name("pull_request", payload)?;
            Ok(Classified::Event(ProposalEvent::Opened {
                key: RevisionKey::new(repo, pr.number),
                revision_hash: RevisionHash(pr.head.sha.clone()),
                creator_id: UserId(pr.user.id),
            }))
        }
        ("pull_request", "closed") => {
            let pr = payload
                .pull_request
                .as_ref()
                .ok_or_else(|| PayloadError::missing("pull_request", "pull_request"))?;
            let repo = repository_name("pull_request", payload)?;
            Ok(Classified::Event(ProposalEvent::Closed {
                key: RevisionKey::new(repo, pr.number),
            }))
        }
        ("issue_comment", "created") => {
            let issue = payload
                .issue
                .as_ref()
                .ok_or_else(|| PayloadError::missing("issue_comment", "issue"))?;
            if issue.pull_request.is_none() {
                return Ok(Classified::Ignored(
                    "comment on an issue, not a pull request".to_string(),
                ));
            }
            let comment = payload
                .comment
                .as_ref()
                .ok_or_else(|| PayloadError::missing("issue_comment", "comment"))?;
            let repo = repository_name("issue_comment", payload)?;
            Ok(Classified::CommentNeedsHead {
                key: RevisionKey::new(repo, issue.number),
                author_id: UserId(comment.user.id),
                body: comment.body.clone().unwrap_or_default(),
            })
        }
        ("pull_request_review", "submitted") => {
            let review = payload
                .review
                .as_ref()
                .ok_or_else(|| PayloadError::missing("pull_request_review", "review"))?;
            let pr = payload
                .pull_request
                .as_ref()
                .ok_or_else(|| PayloadError::missing("pull_request_review", "pull_request"))?;
            let repo = repository_name("pull_request_review", payload)?;
            let revision = review
                .commit_id
                .clone()
                .unwrap_or_else(|| pr.head.sha.clone());
            Ok(Classified::Event(ProposalEvent::ReviewSubmitted {
                key: RevisionKey::new(repo, pr.number),
                revision_hash: RevisionHash(revision),
                author_id: UserId(review.user.id),
                verdict: ReviewVerdict::from(review.state.as_str()),
            }))
        }
        (event, action) => Ok(Classified::Ignored(format!(
            "unhandled event {}/{}",
            event,
            if action.is_empty() { "-" } else { action }
        ))),
    }
}

/// Complete a classification into an event, fetching the head if needed.
pub async fn resolve(
    classified: Classified,
    heads: &dyn HeadResolver,
) -> Result<Option<ProposalEvent>, WebhookError> {
    match classified {
        Classified::Event(event) => Ok(Some(event)),
        Classified::CommentNeedsHead {
            key,
            author_id,
            body,
        } => {
            let revision_hash = heads
                .head_sha(&key.repo, key.number)
                .await
                .map_err(WebhookError::HeadLookup)?;
            Ok(Some(ProposalEvent::CommentPosted {
                key,
                revision_hash,
                author_id,
                body,
            }))
        }
        Classified::Ignored(_) => Ok(None),
    }
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebhookQuery>,
    request: Request,
) -> Result<Json<WebhookResponse>, WebhookError> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "-".to_string());

    let event_type = request
        .headers()
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    info!(
        "Received {} webhook (delivery {})",
        if event_type.is_empty() { "untyped" } else { event_type.as_str() },
        correlation_id
    );

    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| PayloadError::Malformed(e.to_string()))?;

    let payload: GitHubWebhookPayload = serde_json::from_slice(&bytes)
        .map_err(|e| PayloadError::Malformed(e.to_string()))?;

    let classified = classify(&event_type, &payload).inspect_err(|e| {
        warn!("Rejecting delivery {}: {}", correlation_id, e);
    })?;

    if let Classified::Ignored(reason) = &classified {
        info!("Ignoring delivery {}: {}", correlation_id, reason);
        return Ok(Json(WebhookResponse::message(format!("Ignored: {}", reason))));
    }

    let Some(event) = resolve(classified, state.head_resolver.as_ref())
        .await
        .inspect_err(|e| error!("Delivery {} not processed: {}", correlation_id, e))?
    else {
        return Ok(Json(WebhookResponse::message("Ignored")));
    };

    let threshold = state
        .gatekeeper
        .config()
        .resolve_threshold(requested_threshold(query.required_plus_ones.as_deref()));

    let handled = state
        .gatekeeper
        .handle(event, threshold)
        .await
        .inspect_err(|e| error!("Delivery {} not processed: {}", correlation_id, e))?;

    Ok(Json(handled.into()))
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/hooks", post(github_webhook_handler))
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::lifecycle::{Gatekeeper, DEFAULT_STATUS_CONTEXT};
    use crate::reporter::test_support::{MockHeads, MockReporter};
    use crate::reporter::StatusState;
    use crate::store::{InMemoryStore, LedgerStore};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use commodus_core::{ApprovalRecord, TallyConfig};
    use serde_json::json;
    use tower::ServiceExt;

    const SECRET: &str = "It's a Secret to Everybody";
    const REPO: &str = "octo/widgets";
    const HEAD: &str = "0123456789abcdef0123456789abcdef01234567";

    fn sign256(body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn sign1(body: &[u8]) -> String {
        let mut mac = <HmacSha1 as hmac::digest::KeyInit>::new_from_slice(SECRET.as_bytes())
            .unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn app_state(reporter: Arc<MockReporter>, store: Arc<dyn LedgerStore>) -> Arc<AppState> {
        Arc::new(AppState {
            gatekeeper: Gatekeeper::new(
                Ledger::new(store),
                reporter,
                TallyConfig::default(),
                DEFAULT_STATUS_CONTEXT,
            ),
            head_resolver: Arc::new(MockHeads::with(REPO, 7, HEAD)),
            webhook_secret: SECRET.to_string(),
            status_auth_token: None,
        })
    }

    fn app(state: Arc<AppState>) -> Router {
        webhook_router(state.clone()).with_state(state)
    }

    fn signed_request(uri: &str, event: &str, payload: &serde_json::Value) -> Request<Body> {
        let body = serde_json::to_vec(payload).unwrap();
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-github-event", event)
            .header("x-hub-signature-256", sign256(&body))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn pr_payload(action: &str) -> serde_json::Value {
        json!({
            "action": action,
            "number": 7,
            "pull_request": {
                "number": 7,
                "head": {"sha": HEAD, "ref": "feature"},
                "base": {"sha": "base", "ref": "main"},
                "user": {"id": 1, "login": "author"}
            },
            "repository": {"full_name": REPO, "name": "widgets"},
            "sender": {"id": 1, "login": "author"}
        })
    }

    fn comment_payload(user_id: u64, body: &str) -> serde_json::Value {
        json!({
            "action": "created",
            "issue": {
                "number": 7,
                "pull_request": {"url": "https://api.github.com/repos/octo/widgets/pulls/7"}
            },
            "comment": {
                "id": 99,
                "body": body,
                "user": {"id": user_id, "login": format!("user{}", user_id)}
            },
            "repository": {"full_name": REPO},
            "sender": {"id": user_id, "login": format!("user{}", user_id)}
        })
    }

    fn review_payload(user_id: u64, state: &str) -> serde_json::Value {
        json!({
            "action": "submitted",
            "review": {
                "id": 5,
                "user": {"id": user_id, "login": "reviewer"},
                "state": state,
                "commit_id": HEAD
            },
            "pull_request": {
                "number": 7,
                "head": {"sha": HEAD, "ref": "feature"},
                "user": {"id": 1, "login": "author"}
            },
            "repository": {"full_name": REPO}
        })
    }

    #[test]
    fn test_verify_signature_sha256() {
        let body = b"Hello, World!";
        assert!(verify_github_signature(SECRET, body, &sign256(body)));
        assert!(!verify_github_signature(SECRET, b"tampered", &sign256(body)));
        assert!(!verify_github_signature("wrong", body, &sign256(body)));
    }

    #[test]
    fn test_verify_signature_known_vector() {
        // Example delivery from GitHub's webhook documentation.
        assert!(verify_github_signature(
            SECRET,
            b"Hello, World!",
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        ));
    }

    #[test]
    fn test_verify_signature_sha1() {
        let body = b"{\"action\":\"opened\"}";
        assert!(verify_github_signature(SECRET, body, &sign1(body)));
        assert!(!verify_github_signature(SECRET, b"{}", &sign1(body)));
    }

    #[test]
    fn test_verify_signature_rejects_bad_format() {
        assert!(!verify_github_signature(SECRET, b"x", "md5=abcd"));
        assert!(!verify_github_signature(SECRET, b"x", "sha256=not-hex"));
        assert!(!verify_github_signature(SECRET, b"x", ""));
    }

    #[test]
    fn test_requested_threshold() {
        assert_eq!(requested_threshold(None), None);
        assert_eq!(requested_threshold(Some("3")), Some(Threshold::new(3).unwrap()));
        assert_eq!(requested_threshold(Some("0")), None);
        assert_eq!(requested_threshold(Some("many")), None);
    }

    #[test]
    fn test_classify_pull_request_actions() {
        for action in ["opened", "reopened", "synchronize"] {
            let payload: GitHubWebhookPayload = serde_json::from_value(pr_payload(action)).unwrap();
            assert_eq!(
                classify("pull_request", &payload).unwrap(),
                Classified::Event(ProposalEvent::Opened {
                    key: RevisionKey::new(REPO, 7),
                    revision_hash: HEAD.into(),
                    creator_id: UserId(1),
                })
            );
        }

        let payload: GitHubWebhookPayload = serde_json::from_value(pr_payload("closed")).unwrap();
        assert_eq!(
            classify("pull_request", &payload).unwrap(),
            Classified::Event(ProposalEvent::Closed {
                key: RevisionKey::new(REPO, 7)
            })
        );

        let payload: GitHubWebhookPayload = serde_json::from_value(pr_payload("labeled")).unwrap();
        assert!(matches!(
            classify("pull_request", &payload).unwrap(),
            Classified::Ignored(_)
        ));
    }

    #[test]
    fn test_classify_comment_on_plain_issue_is_ignored() {
        let mut value = comment_payload(2, "+1");
        value["issue"] = json!({"number": 7});
        let payload: GitHubWebhookPayload = serde_json::from_value(value).unwrap();
        assert!(matches!(
            classify("issue_comment", &payload).unwrap(),
            Classified::Ignored(_)
        ));
    }

    #[test]
    fn test_classify_minimal_payloads() {
        let payload: GitHubWebhookPayload = serde_json::from_value(json!({
            "action": "created",
            "issue": {"number": 7, "pull_request": {}},
            "comment": {"body": "+1", "user": {"id": 2}},
            "repository": {"full_name": REPO}
        }))
        .unwrap();
        assert_eq!(
            classify("issue_comment", &payload).unwrap(),
            Classified::CommentNeedsHead {
                key: RevisionKey::new(REPO, 7),
                author_id: UserId(2),
                body: "+1".to_string(),
            }
        );

        let payload: GitHubWebhookPayload = serde_json::from_value(json!({
            "action": "submitted",
            "review": {"user": {"id": 3}, "state": "approved"},
            "pull_request": {"number": 7, "head": {"sha": HEAD}, "user": {"id": 1}},
            "repository": {"full_name": REPO}
        }))
        .unwrap();
        assert_eq!(
            classify("pull_request_review", &payload).unwrap(),
            Classified::Event(ProposalEvent::ReviewSubmitted {
                key: RevisionKey::new(REPO, 7),
                revision_hash: HEAD.into(),
                author_id: UserId(3),
                verdict: ReviewVerdict::Approved,
            })
        );
    }

    #[test]
    fn test_classify_missing_fields() {
        let payload: GitHubWebhookPayload =
            serde_json::from_value(json!({"action": "opened"})).unwrap();
        assert_eq!(
            classify("pull_request", &payload).unwrap_err(),
            PayloadError::missing("pull_request", "pull_request")
        );

        let mut value = review_payload(2, "approved");
        value.as_object_mut().unwrap().remove("repository");
        let payload: GitHubWebhookPayload = serde_json::from_value(value).unwrap();
        assert_eq!(
            classify("pull_request_review", &payload).unwrap_err(),
            PayloadError::missing("pull_request_review", "repository")
        );
    }

    #[test]
    fn test_classify_review_prefers_commit_id() {
        let mut value = review_payload(2, "APPROVED");
        value["review"]["commit_id"] = json!("reviewed-sha");
        let payload: GitHubWebhookPayload = serde_json::from_value(value).unwrap();
        assert_eq!(
            classify("pull_request_review", &payload).unwrap(),
            Classified::Event(ProposalEvent::ReviewSubmitted {
                key: RevisionKey::new(REPO, 7),
                revision_hash: "reviewed-sha".into(),
                author_id: UserId(2),
                verdict: ReviewVerdict::Approved,
            })
        );
    }

    #[tokio::test]
    async fn test_missing_signature_is_unauthorized() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter, Arc::new(InMemoryStore::new())));
        let request = Request::builder()
            .method("POST")
            .uri("/hooks")
            .header("x-github-event", "pull_request")
            .body(Body::from(serde_json::to_vec(&pr_payload("opened")).unwrap()))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter.clone(), Arc::new(InMemoryStore::new())));
        let request = Request::builder()
            .method("POST")
            .uri("/hooks")
            .header("x-github-event", "pull_request")
            .header("x-hub-signature-256", sign256(b"something else"))
            .body(Body::from(serde_json::to_vec(&pr_payload("opened")).unwrap()))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(reporter.taken().await.is_empty());
    }

    #[tokio::test]
    async fn test_legacy_sha1_signature_accepted() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter.clone(), Arc::new(InMemoryStore::new())));
        let body = serde_json::to_vec(&pr_payload("opened")).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-event", "pull_request")
            .header("x-hub-signature", sign1(&body))
            .body(Body::from(body))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reporter.taken().await.len(), 1);
    }

    #[tokio::test]
    async fn test_full_flow_open_comment_approve() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter.clone(), Arc::new(InMemoryStore::new())));

        let (status, body) = send(
            &app,
            signed_request("/hooks", "pull_request", &pr_payload("opened")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decision"], "pending");

        let (status, body) = send(
            &app,
            signed_request("/hooks", "issue_comment", &comment_payload(2, "LGTM :+1:")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["approval_count"], 1);
        assert_eq!(body["threshold"], 2);

        let (status, body) = send(
            &app,
            signed_request("/hooks", "pull_request_review", &review_payload(3, "approved")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["approval_count"], 2);
        assert_eq!(body["decision"], "pass");

        let reports = reporter.taken().await;
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].state, StatusState::Success);
        assert_eq!(reports[2].revision_hash.as_str(), HEAD);
        assert_eq!(reports[2].description, "Required approvals (2/2) has been reached!");
    }

    #[tokio::test]
    async fn test_query_threshold_override() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter.clone(), Arc::new(InMemoryStore::new())));

        send(
            &app,
            signed_request("/hooks?required_plus_ones=1", "pull_request", &pr_payload("opened")),
        )
        .await;
        let (_, body) = send(
            &app,
            signed_request(
                "/hooks?required_plus_ones=1",
                "issue_comment",
                &comment_payload(2, "+1"),
            ),
        )
        .await;
        assert_eq!(body["decision"], "pass");
        assert_eq!(body["threshold"], 1);

        // Invalid override falls back to the configured default.
        let (status, body) = send(
            &app,
            signed_request(
                "/hooks?required_plus_ones=zero",
                "issue_comment",
                &comment_payload(3, "+1"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["threshold"], 2);
        assert_eq!(body["approval_count"], 2);
    }

    #[tokio::test]
    async fn test_comment_on_untracked_pr_is_acknowledged() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter.clone(), Arc::new(InMemoryStore::new())));

        let (status, body) = send(
            &app,
            signed_request("/hooks", "issue_comment", &comment_payload(2, "+1")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Ignored: revision not tracked");
        assert!(reporter.taken().await.is_empty());
    }

    #[tokio::test]
    async fn test_head_lookup_failure_is_retryable() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter, Arc::new(InMemoryStore::new())));

        let mut value = comment_payload(2, "+1");
        value["issue"]["number"] = json!(8);
        let (status, body) = send(&app, signed_request("/hooks", "issue_comment", &value)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("failed to resolve head revision"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter, Arc::new(InMemoryStore::new())));

        let body = b"not json".to_vec();
        let request = Request::builder()
            .method("POST")
            .uri("/hooks")
            .header("x-github-event", "pull_request")
            .header("x-hub-signature-256", sign256(&body))
            .body(Body::from(body))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            signed_request("/hooks", "pull_request", &json!({"action": "opened"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "pull_request payload is missing pull_request");
    }

    #[tokio::test]
    async fn test_ping_is_acknowledged() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter, Arc::new(InMemoryStore::new())));
        let (status, body) = send(
            &app,
            signed_request("/hooks", "ping", &json!({"zen": "Keep it logically awesome."})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Ignored: unhandled event ping/-");
    }

    /// Store that fails every call.
    struct BrokenStore;

    #[async_trait]
    impl LedgerStore for BrokenStore {
        async fn get(
            &self,
            _key: &RevisionKey,
            _revision_hash: &RevisionHash,
        ) -> Result<Option<ApprovalRecord>, StoreError> {
            Err(StoreError::storage("get", "database is locked"))
        }

        async fn put(&self, _key: &RevisionKey, _record: ApprovalRecord) -> Result<(), StoreError> {
            Err(StoreError::storage("put", "database is locked"))
        }

        async fn delete_all(&self, _key: &RevisionKey) -> Result<usize, StoreError> {
            Err(StoreError::storage("delete_all", "database is locked"))
        }

        async fn get_all(&self) -> Result<Vec<(RevisionKey, ApprovalRecord)>, StoreError> {
            Err(StoreError::storage("get_all", "database is locked"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_retryable() {
        let reporter = Arc::new(MockReporter::default());
        let app = app(app_state(reporter.clone(), Arc::new(BrokenStore)));

        let (status, body) = send(
            &app,
            signed_request("/hooks", "pull_request", &pr_payload("opened")),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("database is locked"));
        assert!(reporter.taken().await.is_empty());
    }
}
