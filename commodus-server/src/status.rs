//! Status types and handler for the status endpoint.
//!
//! Lists every tracked revision with its current tally, so operators can see
//! what the service believes without reading the database.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use commodus_core::{ApprovalRecord, Decision, RevisionKey, Threshold};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::AppState;

/// Summary statistics for the status page.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub tracked_revisions: usize,
    pub pending: usize,
    pub pass: usize,
}

/// A revision entry for display on the status page.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct RevisionStatusEntry {
    pub repo: String,
    pub number: u64,
    pub revision: String,
    pub approval_count: u32,
    pub threshold: u32,
    pub decision: Decision,
    pub voters: usize,
}

/// Full status data for rendering.
#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: StatusSummary,
    pub revisions: Vec<RevisionStatusEntry>,
}

impl StatusData {
    /// Decisions are computed against the configured default threshold, since
    /// per-request overrides are not stored.
    pub fn from_records(
        records: Vec<(RevisionKey, ApprovalRecord)>,
        threshold: Threshold,
        version: String,
    ) -> Self {
        let mut summary = StatusSummary {
            tracked_revisions: records.len(),
            ..Default::default()
        };

        let mut revisions = Vec::with_capacity(records.len());

        for (key, record) in records {
            let decision = Decision::evaluate(record.approval_count, threshold);
            match decision {
                Decision::Pending => summary.pending += 1,
                Decision::Pass => summary.pass += 1,
            }

            revisions.push(RevisionStatusEntry {
                repo: key.repo,
                number: key.number,
                revision: record.revision_hash.short().to_string(),
                approval_count: record.approval_count,
                threshold: threshold.get(),
                decision,
                voters: record.voters.len(),
            });
        }

        Self {
            version,
            summary,
            revisions,
        }
    }
}

/// Validate the authorization header against the status auth token.
#[allow(clippy::result_large_err)]
pub fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), Response> {
    // If no auth token is configured, the endpoint is disabled
    let Some(expected_token) = auth_token else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Status endpoint is disabled (STATUS_AUTH_TOKEN not configured)",
        )
            .into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(provided_token) if provided_token == expected_token => Ok(()),
            Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
            None => Err((
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header format. Expected: Bearer <token>",
            )
                .into_response()),
        },
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

/// Handler: GET /status
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusData>, Response> {
    validate_auth(&headers, &state.status_auth_token)?;

    let records = state.gatekeeper.ledger().all().await.map_err(|e| {
        error!("Failed to list tracked revisions: {}", e);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Failed to query the ledger",
        )
            .into_response()
    })?;

    Ok(Json(StatusData::from_records(
        records,
        state.gatekeeper.config().threshold,
        crate::get_version(),
    )))
}
