use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

// In the source's 1000-based byte units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageInfo {
    pub upload: u64,
    pub download: u64,
    pub total: u64,
    pub expire_unix_seconds: Option<i64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageFormatError {
    #[error("unrecognized usage payload format")]
    Unrecognized,
}

#[derive(Debug, Error)]
enum UsageFetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("usage source answered {0}")]
    Status(reqwest::StatusCode),

    #[error(transparent)]
    Format(#[from] UsageFormatError),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UsagePayload {
    // {"upload": .., "download": .., "total": .., "expire": ..}
    Flat {
        upload: u64,
        download: u64,
        total: u64,
        #[serde(default)]
        expire: Option<i64>,
    },
    // {"data": {"u": .., "d": .., "transfer_enable": .., "expired_at": ..}}
    Panel { data: PanelUsage },
}

#[derive(Deserialize)]
struct PanelUsage {
    u: u64,
    d: u64,
    transfer_enable: u64,
    #[serde(default)]
    expired_at: Option<i64>,
}

pub fn parse_usage(value: &Value) -> Result<UsageInfo, UsageFormatError> {
    let payload = UsagePayload::deserialize(value).map_err(|_| UsageFormatError::Unrecognized)?;
    Ok(match payload {
        UsagePayload::Flat {
            upload,
            download,
            total,
            expire,
        } => UsageInfo {
            upload,
            download,
            total,
            expire_unix_seconds: expire,
        },
        UsagePayload::Panel { data } => UsageInfo {
            upload: data.u,
            download: data.d,
            total: data.transfer_enable,
            expire_unix_seconds: data.expired_at,
        },
    })
}

const BINARY_GB: u128 = 1024 * 1024 * 1024;
const DECIMAL_GB: u128 = 1000 * 1000 * 1000;

// x (1024/1000)^3 so clients assuming binary units show the decimal-GB figure
pub fn to_binary_units(bytes: u64) -> u64 {
    let scaled = (u128::from(bytes) * BINARY_GB + DECIMAL_GB / 2) / DECIMAL_GB;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

pub fn format_usage_header(usage: &UsageInfo) -> String {
    let mut parts = vec![
        format!("upload={}", to_binary_units(usage.upload)),
        format!("download={}", to_binary_units(usage.download)),
        format!("total={}", to_binary_units(usage.total)),
    ];
    if let Some(expire) = usage.expire_unix_seconds {
        parts.push(format!("expire={}", expire));
    }
    parts.join("; ")
}

#[async_trait]
pub trait UsageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<UsageInfo>;
}

pub struct HttpUsageFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpUsageFetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn try_fetch(&self, url: &str) -> Result<UsageInfo, UsageFetchError> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(UsageFetchError::Status(response.status()));
        }
        let body: Value = response.json().await?;
        Ok(parse_usage(&body)?)
    }
}

#[async_trait]
impl UsageFetcher for HttpUsageFetcher {
    async fn fetch(&self, url: &str) -> Option<UsageInfo> {
        match self.try_fetch(url).await {
            Ok(usage) => Some(usage),
            Err(e) => {
                warn!(error = %e, "usage fetch failed, omitting usage header");
                None
            }
        }
    }
}
