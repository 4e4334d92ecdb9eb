//! Agent client
//!
//! The per-host agent turns a registration credential into a running runner
//! process. The controller only forwards credentials and scale requests.

use reqwest::Client;
use tcr_core::dto::fleet::{AgentRegistration, ScaleAction, ScaleCommand};

use crate::error::Result;
use crate::{DEFAULT_API_TIMEOUT, handle_empty_response, http_client};

/// Client for the per-host agent
#[derive(Debug, Clone)]
pub struct AgentClient {
    /// Endpoint that accepts registration credentials
    registration_url: String,
    /// Endpoint that accepts scale-down commands, if the agent exposes one
    scale_down_url: Option<String>,
    client: Client,
}

impl AgentClient {
    pub fn new(registration_url: impl Into<String>, scale_down_url: Option<String>) -> Result<Self> {
        Ok(Self {
            registration_url: registration_url.into(),
            scale_down_url,
            client: http_client(DEFAULT_API_TIMEOUT)?,
        })
    }

    pub fn registration_url(&self) -> &str {
        &self.registration_url
    }

    /// Forward a registration credential so the agent starts one runner
    pub async fn register(&self, registration: &AgentRegistration) -> Result<()> {
        let response = self
            .client
            .post(&self.registration_url)
            .json(registration)
            .send()
            .await?;

        handle_empty_response(response).await
    }

    /// Ask the agent to remove `count` idle runners
    ///
    /// Returns `Ok(false)` when no scale-down endpoint is configured.
    pub async fn scale_down(&self, count: u32) -> Result<bool> {
        let Some(url) = &self.scale_down_url else {
            return Ok(false);
        };

        let response = self
            .client
            .post(url)
            .json(&ScaleCommand {
                action: ScaleAction::Remove,
                count,
            })
            .send()
            .await?;

        handle_empty_response(response).await?;
        Ok(true)
    }
}
