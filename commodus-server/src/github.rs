use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use commodus_core::RevisionHash;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::reporter::{HeadResolver, StatusReport, StatusReporter};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimal GitHub REST client: commit statuses and pull request lookup.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Serialize)]
pub struct CreateStatusRequest<'a> {
    pub state: &'a str,
    pub description: &'a str,
    pub context: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestResponse {
    pub number: u64,
    pub head: PullRequestRefResponse,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRefResponse {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = create_github_client()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn status_url(&self, repo: &str, sha: &str) -> String {
        format!("{}/repos/{}/statuses/{}", self.api_url, repo, sha)
    }

    fn pull_request_url(&self, repo: &str, pr_number: u64) -> String {
        format!("{}/repos/{}/pulls/{}", self.api_url, repo, pr_number)
    }

    pub async fn create_status(&self, report: &StatusReport) -> Result<()> {
        let url = self.status_url(&report.repo, report.revision_hash.as_str());
        let state = report.state.to_string();
        let request = CreateStatusRequest {
            state: &state,
            description: &report.description,
            context: &report.context,
        };

        info!(
            "Setting {} status on {}@{}: {}",
            state,
            report.repo,
            report.revision_hash.short(),
            report.description
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .json(&request)
            .send()
            .await
            .context("Failed to send create status request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error creating status: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error creating status: {} - {}",
                status,
                error_text
            ));
        }

        Ok(())
    }

    pub async fn get_pull_request(&self, repo: &str, pr_number: u64) -> Result<PullRequestResponse> {
        let url = self.pull_request_url(repo, pr_number);

        info!("Fetching PR #{} from {}", pr_number, repo);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send get pull request request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error fetching PR: {} - {}", status, error_text);
            return Err(anyhow!(
                "GitHub API error fetching PR: {} - {}",
                status,
                error_text
            ));
        }

        let pr_response: PullRequestResponse = response
            .json()
            .await
            .context("Failed to parse pull request response")?;

        info!(
            "Fetched PR #{} (head: {} on {}, state: {})",
            pr_response.number, pr_response.head.sha, pr_response.head.ref_name, pr_response.state
        );

        Ok(pr_response)
    }
}

#[async_trait]
impl StatusReporter for GitHubClient {
    async fn report(&self, report: &StatusReport) -> Result<()> {
        self.create_status(report).await
    }
}

#[async_trait]
impl HeadResolver for GitHubClient {
    async fn head_sha(&self, repo: &str, number: u64) -> Result<RevisionHash> {
        let pr = self.get_pull_request(repo, number).await?;
        Ok(RevisionHash(pr.head.sha))
    }
}

pub fn create_github_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("commodus/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}
