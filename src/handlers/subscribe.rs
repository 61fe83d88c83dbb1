use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::{REQUEST_LATENCY, REQUEST_TOTAL, RESPONSES_TOTAL};
use crate::pipeline::{self, InboundRequest};
use crate::state::AppState;

// Only without a peer address, i.e. when not served with connect info
const UNKNOWN_CLIENT: &str = "unknown";

// The configured edge header is trusted, anything else the client sends is
// not: without it the key is the peer address.
fn client_key(headers: &HeaderMap, header_name: &str, peer: Option<SocketAddr>) -> String {
    let edge_value = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match (edge_value, peer) {
        (Some(value), _) => value.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => UNKNOWN_CLIENT.to_string(),
    }
}

pub async fn subscribe_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    REQUEST_TOTAL.inc();
    let start_time = Instant::now();

    let (parts, _body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(&parts.headers, &state.settings.client_ip_header, peer);

    // A malformed query is treated like a missing token
    let params = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(params)| params)
        .unwrap_or_default();

    let request = InboundRequest {
        client_key: &client,
        method: &parts.method,
        path: parts.uri.path(),
        token: params.get("token").map(String::as_str),
        user_agent: parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok()),
    };

    let response = match pipeline::run(&state, &request).await {
        Ok(subscription) => {
            RESPONSES_TOTAL.with_label_values(&["success"]).inc();
            subscription.into_response()
        }
        Err(e) => {
            RESPONSES_TOTAL.with_label_values(&[e.outcome()]).inc();
            e.into_response()
        }
    };

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::config::GatewaySettings;
    use crate::handlers::router;
    use crate::pipeline::SUBSCRIPTION_USERINFO;
    use crate::rate_limit::{LimiterConfig, RateLimiter};
    use crate::usage::{UsageFetcher, UsageInfo};
    use async_trait::async_trait;
    use axum::{body::Body, http::StatusCode};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    const TOKEN: &str = "correct-horse-battery";
    const CONFIG: &str = "mixed-port: 7890\nproxies: []\n";

    struct FixedUsage(Option<UsageInfo>);

    #[async_trait]
    impl UsageFetcher for FixedUsage {
        async fn fetch(&self, _url: &str) -> Option<UsageInfo> {
            self.0
        }
    }

    fn sample_usage() -> UsageInfo {
        UsageInfo {
            upload: 0,
            download: 1000,
            total: 500_000_000_000,
            expire_unix_seconds: Some(1_767_225_600),
        }
    }

    fn build_state(token: Option<&str>, with_store: bool, usage: Option<UsageInfo>) -> Arc<AppState> {
        let store = MemoryBlobStore::new();
        store.insert("subscription", STANDARD.encode(CONFIG));
        let blob_store: Option<Arc<dyn crate::blob::BlobStore>> = if with_store {
            Some(Arc::new(store))
        } else {
            None
        };

        Arc::new(AppState {
            traffic_limiter: RateLimiter::new(
                "traffic",
                LimiterConfig::new(Duration::from_secs(60), 30),
            ),
            auth_limiter: RateLimiter::new(
                "auth_failures",
                LimiterConfig::new(Duration::from_secs(900), 5),
            ),
            ban_duration: Duration::from_secs(1800),
            settings: GatewaySettings {
                token: token.map(str::to_string),
                usage_url: Some("http://usage.invalid/api".to_string()),
                ..GatewaySettings::default()
            },
            blob_store,
            usage_fetcher: Arc::new(FixedUsage(usage)),
        })
    }

    fn test_state() -> Arc<AppState> {
        build_state(Some(TOKEN), true, Some(sample_usage()))
    }

    async fn send(state: &Arc<AppState>, uri: &str, client: &str) -> Response {
        let request = Request::builder()
            .uri(uri)
            .header("cf-connecting-ip", client)
            .header("user-agent", "clash-verge/v2")
            .body(Body::empty())
            .unwrap();
        router(Arc::clone(state)).oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn good_uri() -> String {
        format!("/subscribe?token={}", TOKEN)
    }

    #[tokio::test]
    async fn serves_subscription_with_headers() {
        let state = test_state();
        let response = send(&state, &good_uri(), "203.0.113.7").await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
        assert_eq!(
            headers[SUBSCRIPTION_USERINFO],
            "upload=0; download=1074; total=536870912000; expire=1767225600"
        );
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename*=UTF-8''config"
        );
        assert_eq!(body_text(response).await, CONFIG);
    }

    #[tokio::test]
    async fn usage_failure_omits_header() {
        let state = build_state(Some(TOKEN), true, None);
        let response = send(&state, &good_uri(), "203.0.113.7").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SUBSCRIPTION_USERINFO).is_none());
        assert_eq!(body_text(response).await, CONFIG);
    }

    #[tokio::test]
    async fn thirty_first_request_is_rate_limited() {
        let state = test_state();
        for i in 0..30 {
            let response = send(&state, &good_uri(), "198.51.100.1").await;
            assert_eq!(response.status(), StatusCode::OK, "request {}", i + 1);
        }

        let response = send(&state, &good_uri(), "198.51.100.1").await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");

        // other clients are unaffected
        let response = send(&state, &good_uri(), "198.51.100.2").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sixth_wrong_token_bans_client() {
        let state = test_state();
        for i in 0..5 {
            let response = send(&state, "/subscribe?token=guess", "192.0.2.9").await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "attempt {}", i + 1);
        }

        let response = send(&state, "/subscribe?token=guess", "192.0.2.9").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1800");
        assert!(state.auth_limiter.is_banned("192.0.2.9"));

        // the right token does not get past an active ban
        let response = send(&state, &good_uri(), "192.0.2.9").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(&state, &good_uri(), "192.0.2.10").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn success_forgives_earlier_failures() {
        let state = test_state();
        for _ in 0..4 {
            send(&state, "/subscribe?token=guess", "192.0.2.20").await;
        }
        assert_eq!(
            state.auth_limiter.get_record("192.0.2.20").unwrap().curr_count,
            4
        );

        let response = send(&state, &good_uri(), "192.0.2.20").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.auth_limiter.get_record("192.0.2.20").is_none());

        let response = send(&state, "/subscribe?token=guess", "192.0.2.20").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            state.auth_limiter.get_record("192.0.2.20").unwrap().curr_count,
            1
        );
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let state = test_state();
        let response = send(&state, "/subscribe", "192.0.2.30").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            state.auth_limiter.get_record("192.0.2.30").unwrap().curr_count,
            1
        );
    }

    #[tokio::test]
    async fn routing_happens_after_authentication() {
        let state = test_state();

        let response = send(&state, &format!("/other?token={}", TOKEN), "192.0.2.40").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&state, "/other?token=guess", "192.0.2.40").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_get_method_is_not_found() {
        let state = test_state();
        let request = Request::builder()
            .method("POST")
            .uri(good_uri())
            .header("cf-connecting-ip", "192.0.2.41")
            .body(Body::empty())
            .unwrap();
        let response = router(Arc::clone(&state)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_bindings_are_misconfiguration() {
        let no_token = build_state(None, true, None);
        let response = send(&no_token, &good_uri(), "192.0.2.50").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // admission still ran first
        assert!(no_token.traffic_limiter.get_record("192.0.2.50").is_some());
        assert!(no_token.auth_limiter.get_record("192.0.2.50").is_none());

        let no_store = build_state(Some(TOKEN), false, None);
        let response = send(&no_store, &good_uri(), "192.0.2.50").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("not configured"));
    }

    #[tokio::test]
    async fn missing_blob_is_internal_error_with_detail() {
        let state = test_state();
        let mut settings = state.settings.clone();
        settings.blob_key = "absent".to_string();
        let state = Arc::new(AppState {
            traffic_limiter: RateLimiter::new("traffic", *state.traffic_limiter.config()),
            auth_limiter: RateLimiter::new("auth_failures", *state.auth_limiter.config()),
            ban_duration: state.ban_duration,
            settings,
            blob_store: state.blob_store.clone(),
            usage_fetcher: Arc::clone(&state.usage_fetcher),
        });

        let response = send(&state, &good_uri(), "192.0.2.60").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("'absent' not found"));
    }

    async fn send_from_peer(state: &Arc<AppState>, uri: &str, peer: &str, forwarded: &str) -> Response {
        let peer: SocketAddr = peer.parse().unwrap();
        let request = Request::builder()
            .uri(uri)
            .header("x-forwarded-for", forwarded)
            .extension(ConnectInfo(peer))
            .body(Body::empty())
            .unwrap();
        router(Arc::clone(state)).oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_evade_ban() {
        let state = test_state();
        let mut statuses = Vec::new();
        for i in 0..8 {
            let forwarded = format!("10.9.0.{}", i);
            let response =
                send_from_peer(&state, "/subscribe?token=guess", "198.51.100.77:40000", &forwarded).await;
            statuses.push(response.status());
        }

        assert!(statuses[..5].iter().all(|s| *s == StatusCode::UNAUTHORIZED));
        assert!(statuses[5..].iter().all(|s| *s == StatusCode::FORBIDDEN));
        assert!(state.auth_limiter.is_banned("198.51.100.77"));
    }

    #[tokio::test]
    async fn clients_without_edge_header_are_keyed_by_peer() {
        let state = test_state();
        for port in 0..6 {
            let peer = format!("198.51.100.80:{}", 50000 + port);
            send_from_peer(&state, "/subscribe?token=guess", &peer, "10.0.0.1").await;
        }

        let banned = send_from_peer(&state, &good_uri(), "198.51.100.80:50010", "10.0.0.1").await;
        assert_eq!(banned.status(), StatusCode::FORBIDDEN);

        // another header-less client shares nothing with the banned one
        let response = send_from_peer(&state, &good_uri(), "198.51.100.81:50000", "10.0.0.1").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn client_key_trusts_only_the_edge_header() {
        let peer: SocketAddr = "192.0.2.200:51234".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, "cf-connecting-ip", None), UNKNOWN_CLIENT);

        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(client_key(&headers, "cf-connecting-ip", Some(peer)), "192.0.2.200");

        headers.insert("cf-connecting-ip", "2001:db8::1".parse().unwrap());
        assert_eq!(client_key(&headers, "cf-connecting-ip", Some(peer)), "2001:db8::1");
    }
}
