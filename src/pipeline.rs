use axum::{
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

use crate::auth::{token_fingerprint, verify_token};
use crate::blob::load_subscription;
use crate::error::GatewayError;
use crate::rate_limit::FailureOutcome;
use crate::state::AppState;
use crate::usage::format_usage_header;

pub const SUBSCRIPTION_USERINFO: HeaderName = HeaderName::from_static("subscription-userinfo");

#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub client_key: &'a str,
    pub method: &'a Method,
    pub path: &'a str,
    pub token: Option<&'a str>,
    // logged only
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub body: String,
    pub usage_header: Option<String>,
    pub filename: String,
}

// throttle -> ban -> config -> token -> routing -> fulfillment; first failure wins
pub async fn run(state: &AppState, req: &InboundRequest<'_>) -> Result<Subscription, GatewayError> {
    let client = req.client_key;

    if !state.traffic_limiter.check_and_increment(client) {
        warn!(client, "traffic limit exceeded");
        return Err(GatewayError::RateLimited {
            retry_after_secs: state.traffic_retry_after(),
        });
    }

    // Read-only: does not consume the auth failure window
    if state.auth_limiter.is_banned(client) {
        debug!(client, "request from banned client");
        return Err(GatewayError::Banned {
            retry_after_secs: state.ban_retry_after(),
        });
    }

    let expected = state
        .settings
        .token
        .as_deref()
        .ok_or(GatewayError::Misconfigured("subscribe token is not set"))?;
    let store = state
        .blob_store
        .as_deref()
        .ok_or(GatewayError::Misconfigured("blob store is not set"))?;

    if !verify_token(req.token, Some(expected)) {
        let outcome = state.auth_limiter.record_failure(client, state.ban_duration);
        let failures = state
            .auth_limiter
            .get_record(client)
            .map_or(0, |record| record.curr_count);
        warn!(
            client,
            failures,
            token = %req.token.map(token_fingerprint).unwrap_or_else(|| "none".to_string()),
            user_agent = req.user_agent.unwrap_or("-"),
            ?outcome,
            "rejected subscribe token"
        );
        return Err(match outcome {
            FailureOutcome::Banned => GatewayError::Banned {
                retry_after_secs: state.ban_retry_after(),
            },
            FailureOutcome::Counted => GatewayError::Unauthorized,
        });
    }
    // Forgive failures from before this success
    state.auth_limiter.clear(client);

    if *req.method != Method::GET || req.path != state.settings.subscribe_path {
        return Err(GatewayError::NotFound);
    }

    let body = load_subscription(store, &state.settings.blob_key).await?;
    let usage_header = match &state.settings.usage_url {
        Some(url) => state
            .usage_fetcher
            .fetch(url)
            .await
            .map(|usage| format_usage_header(&usage)),
        None => None,
    };

    info!(
        client,
        user_agent = req.user_agent.unwrap_or("-"),
        usage = usage_header.is_some(),
        "served subscription"
    );
    Ok(Subscription {
        body,
        usage_header,
        filename: state.settings.filename.clone(),
    })
}

impl IntoResponse for Subscription {
    fn into_response(self) -> Response {
        let mut response = (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (header::CACHE_CONTROL, "no-store".to_string()),
                (header::CONTENT_DISPOSITION, content_disposition(&self.filename)),
            ],
            self.body,
        )
            .into_response();

        if let Some(value) = self
            .usage_header
            .and_then(|usage| HeaderValue::from_str(&usage).ok())
        {
            response.headers_mut().insert(SUBSCRIPTION_USERINFO, value);
        }
        response
    }
}

// RFC 5987 ext-value so non-ASCII names survive
fn content_disposition(filename: &str) -> String {
    let mut encoded = String::with_capacity(filename.len());
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    format!("attachment; filename*=UTF-8''{}", encoded)
}
