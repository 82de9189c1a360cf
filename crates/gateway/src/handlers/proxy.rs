//! Credential-resolving proxy to the upstream service
//!
//! Every call resolves credentials, is counted against the caller's
//! fixed window, metered for the tenant, and forwarded with HTTP basic
//! auth to the resolved base URL.

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, State},
    http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, Uri},
    response::{IntoResponse, Response},
};

use std::net::{IpAddr, SocketAddr};

use crate::upstream::{build_url, default_content_type, forwardable_headers, OutboundRequest};
use crate::AppState;
use relaygate_common::{
    auth::{ResolvedCredential, SourceKind},
    config::PlanQuota,
    errors::{AppError, Result},
    metrics,
    rate::RateDecision,
};

const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Window applied to callers without a tenant
const ANONYMOUS_WINDOW_SECS: u64 = 60;

/// Client address recorded by the listener, when served with connect info
fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Rate subject and quota for a resolved caller. Inline callers are
/// keyed on their peer address since the identity header is theirs to pick.
async fn quota_for(
    state: &AppState,
    credential: &ResolvedCredential,
    peer: Option<IpAddr>,
) -> Result<(String, PlanQuota)> {
    match credential.tenant_id {
        Some(tenant_id) => {
            let quota = state.limits.limits(tenant_id).await?;
            Ok((format!("tenant:{}", tenant_id), quota))
        }
        None => {
            let quota = PlanQuota {
                requests_per_window: state.config.rate_limit.anonymous_requests_per_window,
                window_secs: ANONYMOUS_WINDOW_SECS,
                max_connections: 0,
            };
            let subject = match credential.source {
                SourceKind::Fallback => "fallback".to_string(),
                _ => match peer {
                    Some(ip) => format!("inline:{}", ip),
                    None => "inline:unknown".to_string(),
                },
            };
            Ok((subject, quota))
        }
    }
}

/// Count the request; `None` when accounting is disabled or failed open
async fn account(
    state: &AppState,
    credential: &ResolvedCredential,
    peer: Option<IpAddr>,
) -> Result<Option<RateDecision>> {
    if !state.config.rate_limit.enabled {
        return Ok(None);
    }

    let (subject, quota) = quota_for(state, credential, peer).await?;
    match state.rate.consume_window(&subject, &quota).await {
        Ok(decision) => {
            metrics::record_rate_limit(if decision.allowed { "allowed" } else { "denied" });
            Ok(Some(decision))
        }
        Err(e) if state.config.rate_limit.fail_open => {
            tracing::warn!(subject = %subject, error = %e, "Rate store unavailable, failing open");
            metrics::record_rate_limit("fail_open");
            Ok(None)
        }
        Err(e) => {
            tracing::error!(subject = %subject, error = %e, "Rate store unavailable, failing closed");
            metrics::record_rate_limit("fail_closed");
            Err(AppError::ServiceUnavailable {
                message: "Rate accounting unavailable".to_string(),
            })
        }
    }
}

fn decorate(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining()));
    headers.insert(HEADER_RESET, HeaderValue::from(decision.reset_after_secs));
}

fn rate_limited(decision: RateDecision) -> Response {
    let mut response = AppError::RateLimited {
        limit: decision.limit,
        window_secs: decision.window_secs,
    }
    .into_response();
    let headers = response.headers_mut();
    decorate(headers, &decision);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.reset_after_secs.max(1)));
    response
}

/// Forward any method under `/proxy/` to the upstream service
pub async fn forward(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    uri: Uri,
    extensions: Extensions,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let credential = state.resolver.resolve(&headers).await?;

    let decision = account(&state, &credential, peer_ip(&extensions)).await?;
    if let Some(decision) = decision.filter(|d| !d.allowed) {
        tracing::info!(
            tenant_id = ?credential.tenant_id,
            source = credential.source.as_str(),
            count = decision.count,
            limit = decision.limit,
            "Rate limit exceeded"
        );
        return Ok(rate_limited(decision));
    }

    if let Some(tenant_id) = credential.tenant_id {
        if let Err(e) = state.usage.record(tenant_id).await {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "Failed to meter usage");
        }
    }

    let url = build_url(&credential.base_url, &path, uri.query());
    tracing::debug!(
        method = %method,
        url = %url,
        source = credential.source.as_str(),
        "Forwarding upstream"
    );

    let upstream = state
        .upstream
        .forward(OutboundRequest {
            method,
            url,
            identity: credential.identity,
            secret: credential.secret,
            aux_secret: credential.aux_secret,
            headers: forwardable_headers(&headers),
            body,
        })
        .await?;

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    default_content_type(response.headers_mut());
    if let Some(decision) = decision {
        decorate(response.headers_mut(), &decision);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{harness, harness_with, test_config, Harness};
    use axum::http::StatusCode;
    use relaygate_common::connections::NewConnection;
    use relaygate_common::rate::CounterStore;
    use std::sync::Arc;
    use uuid::Uuid;

    fn inline_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-upstream-user", HeaderValue::from_static("alice"));
        headers.insert("x-upstream-secret", HeaderValue::from_static("s3cret"));
        headers
    }

    async fn call(h: &Harness, path: &str, headers: HeaderMap) -> Result<Response> {
        call_from(h, path, headers, Extensions::new()).await
    }

    async fn call_from(h: &Harness, path: &str, headers: HeaderMap, extensions: Extensions) -> Result<Response> {
        forward(
            State(h.state.clone()),
            Path(path.to_string()),
            Method::GET,
            Uri::from_static("/v1/proxy/items?page=2"),
            extensions,
            headers,
            Bytes::new(),
        )
        .await
    }

    fn from_peer(ip: [u8; 4]) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from((ip, 40_000))));
        extensions
    }

    async fn tenant_with_key(h: &Harness) -> (Uuid, String) {
        let tenant = h
            .state
            .tenants
            .signup("Acme", "ops@acme.test", "correct horse battery")
            .await
            .unwrap();
        let connection = h
            .state
            .connections
            .create(
                tenant.id,
                NewConnection {
                    name: "primary".to_string(),
                    base_url: "https://api.acme.test/".to_string(),
                    identity: "acme-bot".to_string(),
                    secret: "upstream-secret".to_string(),
                    aux_secret: Some("image-key".to_string()),
                },
            )
            .await
            .unwrap();
        let created = h.state.api_keys.create(tenant.id, connection.id, "ci").await.unwrap();
        (tenant.id, created.plaintext)
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let h = harness();
        let err = call(&h, "items", HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NoCredentials));
        assert!(h.upstream.requests().is_empty());
    }

    #[tokio::test]
    async fn test_inline_credentials_forwarded_with_basic_auth() {
        let h = harness();
        let response = call(&h, "items", inline_headers()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-ratelimit-limit"));

        let seen = h.upstream.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, "https://upstream.example.com/items?page=2");
        assert_eq!(seen[0].identity, "alice");
        assert_eq!(seen[0].secret, "s3cret");
        assert!(!seen[0].headers.contains_key("x-upstream-secret"));
    }

    #[tokio::test]
    async fn test_api_key_uses_stored_connection_and_meters_usage() {
        let h = harness();
        let (tenant_id, key) = tenant_with_key(&h).await;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&key).unwrap());
        let response = call(&h, "/v2/things", headers).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = h.upstream.requests();
        assert_eq!(seen[0].url, "https://api.acme.test/v2/things?page=2");
        assert_eq!(seen[0].identity, "acme-bot");
        assert_eq!(seen[0].secret, "upstream-secret");
        assert_eq!(seen[0].aux_secret.as_deref(), Some("image-key"));

        assert_eq!(h.state.usage.current(tenant_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_api_key_is_rejected() {
        let h = harness();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_static("rgk_0000000000000000000000000000000000000000000000000000000000000000"),
        );
        let err = call(&h, "items", headers).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_anonymous_window_exhaustion_returns_429() {
        let mut config = test_config();
        config.rate_limit.anonymous_requests_per_window = 2;
        let h = harness_with(config);

        for _ in 0..2 {
            let response = call(&h, "items", inline_headers()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = call(&h, "items", inline_headers()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(h.upstream.requests().len(), 2);

        h.clock.advance(std::time::Duration::from_secs(61));
        let response = call(&h, "items", inline_headers()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rotating_inline_identity_shares_peer_window() {
        let mut config = test_config();
        config.rate_limit.anonymous_requests_per_window = 2;
        let h = harness_with(config);

        for user in ["alice", "bob", "carol"] {
            let mut headers = inline_headers();
            headers.insert("x-upstream-user", HeaderValue::from_str(user).unwrap());
            let response = call_from(&h, "items", headers, from_peer([203, 0, 113, 7])).await.unwrap();
            let expected = if user == "carol" {
                StatusCode::TOO_MANY_REQUESTS
            } else {
                StatusCode::OK
            };
            assert_eq!(response.status(), expected);
        }

        let response = call_from(&h, "items", inline_headers(), from_peer([198, 51, 100, 9]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_disabled_rate_limit_skips_accounting() {
        let mut config = test_config();
        config.rate_limit.enabled = false;
        config.rate_limit.anonymous_requests_per_window = 0;
        let h = harness_with(config);

        let response = call(&h, "items", inline_headers()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }

    struct BrokenCounters;

    #[async_trait::async_trait]
    impl CounterStore for BrokenCounters {
        async fn increment(&self, _key: &str, _window_secs: u64) -> Result<u64> {
            Err(AppError::CacheError {
                message: "connection refused".to_string(),
            })
        }

        async fn current(&self, _key: &str) -> Result<u64> {
            Err(AppError::CacheError {
                message: "connection refused".to_string(),
            })
        }
    }

    fn with_broken_counters(h: &mut Harness) {
        let clock: Arc<dyn relaygate_common::Clock> = Arc::new(h.clock.clone());
        h.state.rate = relaygate_common::rate::RateAccountant::new(Arc::new(BrokenCounters), clock);
    }

    #[tokio::test]
    async fn test_counter_outage_fails_open() {
        let mut h = harness();
        with_broken_counters(&mut h);

        let response = call(&h, "items", inline_headers()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_counter_outage_fails_closed_when_configured() {
        let mut config = test_config();
        config.rate_limit.fail_open = false;
        let mut h = harness_with(config);
        with_broken_counters(&mut h);

        let err = call(&h, "items", inline_headers()).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable { .. }));
        assert!(h.upstream.requests().is_empty());
    }
}
