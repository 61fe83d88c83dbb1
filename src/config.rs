use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::rate_limit::LimiterConfig;

// Ten years
const MAX_BAN_SECS: u64 = 10 * 365 * 24 * 3600;

// CLI argument structure; every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "subscription-gateway")]
#[command(about = "Token-gated subscription endpoint with throttling and auth-failure bans")]
pub struct Args {
    /// Port to serve the subscription endpoint on
    #[arg(short, long, env = "GATEWAY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Separate port for /metrics and /health (disabled when unset)
    #[arg(long, env = "GATEWAY_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Secret clients must present as ?token=
    #[arg(long, env = "SUBSCRIBE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Directory holding one Base64 blob file per key
    #[arg(long, env = "BLOB_DIR")]
    pub blob_dir: Option<PathBuf>,

    /// Base64 blob passed directly (used when no blob dir is given)
    #[arg(long, env = "SUBSCRIPTION_BLOB", hide_env_values = true)]
    pub blob_value: Option<String>,

    /// Key of the subscription blob in the store
    #[arg(long, env = "BLOB_KEY", default_value = "subscription")]
    pub blob_key: String,

    /// Where to fetch traffic usage for the Subscription-Userinfo header
    #[arg(long, env = "USAGE_URL")]
    pub usage_url: Option<String>,

    /// Usage fetch timeout in seconds
    #[arg(long, env = "USAGE_TIMEOUT", default_value_t = 5)]
    pub usage_timeout: u64,

    /// Filename offered in Content-Disposition
    #[arg(long, env = "DOWNLOAD_FILENAME", default_value = "config")]
    pub filename: String,

    /// The only path that serves the subscription
    #[arg(long, env = "SUBSCRIBE_PATH", default_value = "/subscribe")]
    pub subscribe_path: String,

    /// Header carrying the client address, set by the edge in front of us
    #[arg(long, env = "CLIENT_IP_HEADER", default_value = "cf-connecting-ip")]
    pub client_ip_header: String,

    /// Requests allowed per client per traffic window
    #[arg(long, default_value_t = 30)]
    pub rate_limit: u32,

    /// Traffic window in seconds
    #[arg(long, default_value_t = 60)]
    pub rate_window: u64,

    /// Failed token attempts allowed per auth window before a ban
    #[arg(long, default_value_t = 5)]
    pub auth_fail_limit: u32,

    /// Auth failure window in seconds
    #[arg(long, default_value_t = 900)]
    pub auth_fail_window: u64,

    /// Ban duration in seconds
    #[arg(long, default_value_t = 1800, value_parser = clap::value_parser!(u64).range(1..=MAX_BAN_SECS))]
    pub ban_duration: u64,

    /// Minimum seconds between limiter sweeps
    #[arg(long, default_value_t = 60)]
    pub cleanup_interval: u64,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn traffic_limits(&self) -> LimiterConfig {
        LimiterConfig::new(Duration::from_secs(self.rate_window), self.rate_limit)
    }

    pub fn auth_failure_limits(&self) -> LimiterConfig {
        LimiterConfig::new(Duration::from_secs(self.auth_fail_window), self.auth_fail_limit)
    }

    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.ban_duration)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            token: self.token.clone().filter(|t| !t.is_empty()),
            blob_key: self.blob_key.clone(),
            usage_url: self.usage_url.clone().filter(|u| !u.is_empty()),
            filename: self.filename.clone(),
            subscribe_path: self.subscribe_path.clone(),
            client_ip_header: self.client_ip_header.to_ascii_lowercase(),
        }
    }
}

/// Request-time settings the pipeline reads.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    // None means misconfigured; every request then fails with 500
    pub token: Option<String>,
    pub blob_key: String,
    pub usage_url: Option<String>,
    pub filename: String,
    pub subscribe_path: String,
    pub client_ip_header: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            token: None,
            blob_key: "subscription".to_string(),
            usage_url: None,
            filename: "config".to_string(),
            subscribe_path: "/subscribe".to_string(),
            client_ip_header: "cf-connecting-ip".to_string(),
        }
    }
}
