//! Controller configuration
//!
//! Every setting can be given as a flag or through the environment; the
//! environment names match the ones the deployment scripts already export.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tcr_client::ProviderConfig;

use crate::service::autoscaler::ScalingPolicy;
use crate::service::dispatcher::DispatchConfig;

/// Mode value that turns the autoscaling poller on
pub const POLLING_MODE: &str = "polling";

/// Controller configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "towerd")]
#[command(about = "CI runner control plane", long_about = None)]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, env = "TOWER_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Operating mode; "polling" enables the autoscaler
    #[arg(long, env = "MODE", default_value = "")]
    pub mode: String,

    /// Autoscaler polling interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value_t = 30)]
    pub poll_interval_secs: u64,

    /// Most runners added or removed per autoscaler tick
    #[arg(long, env = "SCALE_STEP_MAX", default_value_t = 3)]
    pub scale_step_max: u32,

    /// Fleet size the autoscaler never exceeds
    #[arg(long, env = "MAX_RUNNERS_TOTAL", default_value_t = 20)]
    pub max_runners_total: u32,

    /// Agent endpoint that accepts registration tokens
    #[arg(
        long,
        env = "AGENT_REGISTRATION_ENDPOINT",
        default_value = "http://localhost:8081/register-hybrid"
    )]
    pub agent_registration_endpoint: String,

    /// Agent endpoint that accepts scale-down requests
    #[arg(long, env = "AGENT_SCALE_DOWN_ENDPOINT")]
    pub agent_scale_down_endpoint: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", default_value = "", hide_env_values = true)]
    pub github_token: String,

    #[arg(long, env = "GITHUB_OWNER", default_value = "")]
    pub github_owner: String,

    #[arg(long, env = "GITHUB_REPO", default_value = "")]
    pub github_repo: String,

    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// Seconds without a heartbeat after which a runner is no longer live
    #[arg(long, env = "HEARTBEAT_STALENESS_SECONDS", default_value_t = 30)]
    pub heartbeat_staleness_secs: u64,

    /// Dispatcher sweep interval in milliseconds
    #[arg(long, env = "DISPATCH_INTERVAL_MS", default_value_t = 500)]
    pub dispatch_interval_ms: u64,

    /// Timeout for one job send, in seconds
    #[arg(long, env = "DISPATCH_TIMEOUT_SECONDS", default_value_t = 8)]
    pub dispatch_timeout_secs: u64,

    /// Seconds a job may stay dispatched without the runner reporting on it
    #[arg(long, env = "DISPATCH_ACK_TIMEOUT_SECONDS", default_value_t = 120)]
    pub dispatch_ack_timeout_secs: u64,

    /// Dispatches per job before it is failed
    #[arg(long, env = "MAX_DISPATCH_ATTEMPTS", default_value_t = 3)]
    pub max_dispatch_attempts: u32,

    /// Reconciler interval in seconds
    #[arg(long, env = "RECONCILE_INTERVAL_SECONDS", default_value_t = 30)]
    pub reconcile_interval_secs: u64,

    /// Pause between scale-up units, in milliseconds
    #[arg(long, env = "SPAWN_SPACING_MS", default_value_t = 500)]
    pub spawn_spacing_ms: u64,
}

impl Config {
    /// Whether the autoscaling poller should run
    pub fn polling_enabled(&self) -> bool {
        self.mode == POLLING_MODE
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address '{}': {}", self.bind_addr, e))
    }

    pub fn heartbeat_staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_staleness_secs as i64)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn dispatch_ack_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dispatch_ack_timeout_secs as i64)
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            send_timeout: Duration::from_secs(self.dispatch_timeout_secs),
            max_attempts: self.max_dispatch_attempts,
        }
    }

    pub fn scaling_policy(&self) -> ScalingPolicy {
        ScalingPolicy {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_scale_step: self.scale_step_max,
            global_max_runners: self.max_runners_total,
            spawn_spacing: Duration::from_millis(self.spawn_spacing_ms),
        }
    }

    pub fn provider(&self) -> ProviderConfig {
        ProviderConfig {
            api_url: self.github_api_url.clone(),
            token: self.github_token.clone(),
            owner: self.github_owner.clone(),
            repo: self.github_repo.clone(),
        }
    }

    /// Validates the configuration
    ///
    /// Provider credentials are only required in polling mode; without them
    /// the manual registration endpoint reports the problem per request.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;

        if self.heartbeat_staleness_secs == 0 {
            anyhow::bail!("heartbeat staleness must be greater than 0");
        }

        if self.dispatch_interval_ms == 0 {
            anyhow::bail!("dispatch interval must be greater than 0");
        }

        if self.dispatch_timeout_secs == 0 {
            anyhow::bail!("dispatch timeout must be greater than 0");
        }

        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("reconcile interval must be greater than 0");
        }

        if self.max_dispatch_attempts == 0 {
            anyhow::bail!("max dispatch attempts must be greater than 0");
        }

        if !is_http_url(&self.agent_registration_endpoint) {
            anyhow::bail!("agent registration endpoint must start with http:// or https://");
        }

        if self
            .agent_scale_down_endpoint
            .as_deref()
            .is_some_and(|url| !is_http_url(url))
        {
            anyhow::bail!("agent scale-down endpoint must start with http:// or https://");
        }

        if self.polling_enabled() {
            if self.poll_interval_secs == 0 {
                anyhow::bail!("poll interval must be greater than 0");
            }
            if self.scale_step_max == 0 {
                anyhow::bail!("scale step must be greater than 0");
            }
            self.provider()
                .ensure_complete()
                .map_err(|e| anyhow::anyhow!("polling mode: {}", e))?;
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["towerd"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--mode", ""]);

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert!(!config.polling_enabled());
        assert_eq!(config.dispatch_interval(), Duration::from_millis(500));
        assert_eq!(config.dispatch().send_timeout, Duration::from_secs(8));
        assert_eq!(config.heartbeat_staleness(), chrono::Duration::seconds(30));
        assert_eq!(config.scaling_policy().max_scale_step, 3);
        assert_eq!(config.scaling_policy().global_max_runners, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_polling_requires_provider_credentials() {
        let mut config = parse(&["--mode", "polling"]);
        config.github_token = String::new();
        assert!(config.polling_enabled());
        assert!(config.validate().is_err());

        config.github_token = "secret".to_string();
        config.github_owner = "octo".to_string();
        config.github_repo = "repo".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = parse(&["--mode", ""]);

        config.bind_addr = "not-an-addr".to_string();
        assert!(config.validate().is_err());
        config.bind_addr = "127.0.0.1:9000".to_string();

        config.agent_registration_endpoint = "localhost:8081".to_string();
        assert!(config.validate().is_err());
        config.agent_registration_endpoint = "http://localhost:8081/register-hybrid".to_string();

        config.max_dispatch_attempts = 0;
        assert!(config.validate().is_err());
        config.max_dispatch_attempts = 1;

        assert!(config.validate().is_ok());
    }
}
