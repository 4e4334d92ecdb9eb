//! Provider API client
//!
//! Reads queued work and runner counts from the GitHub Actions REST API and
//! requests runner registration tokens.

use reqwest::{Client, RequestBuilder};
use tcr_core::domain::fleet::{RegistrationToken, RunnerCounts};
use tcr_core::dto::fleet::{RunnersPage, WorkflowRunsPage};

use crate::error::{ClientError, Result};
use crate::{DEFAULT_API_TIMEOUT, handle_response, http_client};

/// Largest page size the provider accepts
const PER_PAGE: u32 = 100;

/// Connection settings for the provider API
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API base URL (e.g., "https://api.github.com")
    pub api_url: String,
    pub token: String,
    pub owner: String,
    pub repo: String,
}

impl ProviderConfig {
    /// Fails when any of token, owner or repo is missing
    pub fn ensure_complete(&self) -> Result<()> {
        if self.token.is_empty() || self.owner.is_empty() || self.repo.is_empty() {
            return Err(ClientError::NotConfigured(
                "provider token, owner and repo must all be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Client for the upstream provider API
#[derive(Debug, Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    client: Client,
}

impl ProviderClient {
    /// Create a provider client with the default 10s timeout
    pub fn new(mut config: ProviderConfig) -> Result<Self> {
        config.api_url = config.api_url.trim_end_matches('/').to_string();
        Ok(Self {
            config,
            client: http_client(DEFAULT_API_TIMEOUT)?,
        })
    }

    /// Web URL of the repository runners register against
    pub fn repository_url(&self) -> String {
        format!("https://github.com/{}/{}", self.config.owner, self.config.repo)
    }

    /// Number of workflow runs waiting for a runner
    pub async fn count_queued_runs(&self) -> Result<u32> {
        let url = self.repo_url("/actions/runs");
        let response = self
            .authorized(self.client.get(&url))?
            .query(&[("status", "queued")])
            .query(&[("per_page", PER_PAGE)])
            .send()
            .await?;

        let page: WorkflowRunsPage = handle_response(response).await?;
        tracing::debug!("Provider reports {} queued run(s)", page.total_count);
        Ok(page.total_count)
    }

    /// Total and idle self-hosted runners
    ///
    /// `total` is the provider's own count; idle runners are tallied across
    /// every page of the listing.
    pub async fn runner_counts(&self) -> Result<RunnerCounts> {
        let url = self.repo_url("/actions/runners");
        let mut counts = RunnerCounts::default();
        let mut seen = 0;

        for page_number in 1u32.. {
            let response = self
                .authorized(self.client.get(&url))?
                .query(&[("per_page", PER_PAGE), ("page", page_number)])
                .send()
                .await?;

            let page: RunnersPage = handle_response(response).await?;
            counts.total = page.total_count;
            counts.idle += page.idle_count();
            seen += page.runners.len() as u32;

            if !page.has_more(seen) {
                break;
            }
        }

        tracing::debug!("Provider reports {} runner(s), {} idle", counts.total, counts.idle);
        Ok(counts)
    }

    /// Request a registration token for a new runner
    pub async fn registration_token(&self) -> Result<RegistrationToken> {
        let url = self.repo_url("/actions/runners/registration-token");
        let response = self.authorized(self.client.post(&url))?.send().await?;

        let token: RegistrationToken = handle_response(response).await?;
        tracing::debug!("Received registration token (expires at {})", token.expires_at);
        Ok(token)
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.config.api_url, self.config.owner, self.config.repo, path
        )
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        self.config.ensure_complete()?;
        Ok(request
            .bearer_auth(&self.config.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json"))
    }
}
