use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::blob::{BlobStore, FileBlobStore, MemoryBlobStore, decode_subscription};
use crate::config::{Args, GatewaySettings};
use crate::rate_limit::RateLimiter;
use crate::usage::{HttpUsageFetcher, UsageFetcher};

// app's shared state, alive for the whole process
pub struct AppState {
    pub traffic_limiter: RateLimiter,
    pub auth_limiter: RateLimiter,
    pub ban_duration: Duration, // applied once auth_limiter denies
    pub settings: GatewaySettings,
    pub blob_store: Option<Arc<dyn BlobStore>>, // None when no store is configured
    pub usage_fetcher: Arc<dyn UsageFetcher>,
}

impl AppState {
    pub fn from_args(args: &Args) -> Self {
        let settings = args.settings();
        if settings.token.is_none() {
            warn!("no subscribe token configured, every request will fail");
        }

        let blob_store = blob_store_from_args(args, &settings);
        if blob_store.is_none() {
            warn!("no blob store configured, every request will fail");
        }

        let fetcher = HttpUsageFetcher::new(
            reqwest::Client::new(),
            Duration::from_secs(args.usage_timeout),
        );

        Self {
            traffic_limiter: RateLimiter::new("traffic", args.traffic_limits())
                .with_cleanup_interval(args.cleanup_interval()),
            auth_limiter: RateLimiter::new("auth_failures", args.auth_failure_limits())
                .with_cleanup_interval(args.cleanup_interval()),
            ban_duration: args.ban_duration(),
            settings,
            blob_store,
            usage_fetcher: Arc::new(fetcher),
        }
    }

    pub fn traffic_retry_after(&self) -> u64 {
        self.traffic_limiter.config().window.as_secs().max(1)
    }

    pub fn ban_retry_after(&self) -> u64 {
        self.ban_duration.as_secs().max(1)
    }
}

fn blob_store_from_args(args: &Args, settings: &GatewaySettings) -> Option<Arc<dyn BlobStore>> {
    if let Some(dir) = &args.blob_dir {
        return Some(Arc::new(FileBlobStore::new(dir.clone())));
    }
    let value = args.blob_value.as_deref().filter(|v| !v.is_empty())?;
    if decode_subscription(value).is_err() {
        warn!("SUBSCRIPTION_BLOB is not valid base64, requests will fail until fixed");
    }
    let store = MemoryBlobStore::new();
    store.insert(settings.blob_key.clone(), value);
    Some(Arc::new(store))
}
