//! TCR HTTP Clients
//!
//! Typed HTTP clients for everything the controller talks to:
//! - [`RunnerClient`]: pushes jobs to a runner's `/job` endpoint
//! - [`ProviderClient`]: reads demand/capacity from the GitHub Actions API and
//!   issues runner registration tokens
//! - [`AgentClient`]: forwards registration credentials and scale commands to
//!   the per-host agent
//!
//! Every client is built on a `reqwest::Client` with a bounded timeout.
//!
//! # Example
//!
//! ```no_run
//! use tcr_client::RunnerClient;
//! use tcr_core::domain::job::Job;
//!
//! #[tokio::main]
//! async fn main() -> tcr_client::Result<()> {
//!     let client = RunnerClient::new()?;
//!     let job = Job::new("j1", "queued", "octo", "repo", "build");
//!     client.dispatch_job("http://10.0.0.5:8081", &job).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod agent;
mod provider;
mod runner;

pub use agent::AgentClient;
pub use error::{ClientError, Result};
pub use provider::{ProviderClient, ProviderConfig};
pub use runner::RunnerClient;

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// Timeout for pushing a job to a runner
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Timeout for provider and agent calls
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a reqwest client with the given request timeout
fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tcr-controller/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(ClientError::from)
}

// =============================================================================
// Response Handlers
// =============================================================================

/// Check the status code and deserialize the JSON body
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Check the status code of a response whose body is ignored
async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(())
}
