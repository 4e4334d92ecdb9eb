//! Job dispatch to runners

use std::time::Duration;

use reqwest::Client;
use tcr_core::domain::job::Job;

use crate::error::Result;
use crate::{DEFAULT_DISPATCH_TIMEOUT, handle_empty_response, http_client};

/// Pushes jobs to runners
///
/// Runners are addressed per call since every runner has its own endpoint.
#[derive(Debug, Clone)]
pub struct RunnerClient {
    client: Client,
}

impl RunnerClient {
    /// Create a client with the default 8s dispatch timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_DISPATCH_TIMEOUT)
    }

    /// Create a client with a custom dispatch timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }

    /// POST the full job record to `{endpoint}/job`
    ///
    /// Any non-2xx answer counts as a rejected dispatch.
    pub async fn dispatch_job(&self, endpoint: &str, job: &Job) -> Result<()> {
        let url = job_url(endpoint);
        let response = self.client.post(&url).json(job).send().await?;

        handle_empty_response(response).await
    }
}

fn job_url(endpoint: &str) -> String {
    format!("{}/job", endpoint.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_url() {
        assert_eq!(job_url("http://10.0.0.5:8081"), "http://10.0.0.5:8081/job");
        assert_eq!(job_url("http://10.0.0.5:8081/"), "http://10.0.0.5:8081/job");
    }

    #[test]
    fn test_client_creation() {
        assert!(RunnerClient::with_timeout(Duration::from_millis(250)).is_ok());
    }
}
