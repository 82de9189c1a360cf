//! Forwarding to the wrapped upstream service

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use relaygate_common::{
    auth::resolver::{HEADER_API_KEY, HEADER_UPSTREAM_SECRET, HEADER_UPSTREAM_URL, HEADER_UPSTREAM_USER},
    errors::{AppError, Result},
    metrics,
};

/// Header carrying the connection's auxiliary secret upstream
pub const HEADER_AUX_SECRET: &str = "x-upstream-aux-secret";

/// Request headers never passed through: hop-by-hop headers and the
/// caller's own credentials
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "authorization",
    "host",
    "connection",
    "keep-alive",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    HEADER_API_KEY,
    HEADER_UPSTREAM_USER,
    HEADER_UPSTREAM_SECRET,
    HEADER_UPSTREAM_URL,
    HEADER_AUX_SECRET,
];

const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "upgrade",
];

/// A fully resolved call to make upstream
#[derive(Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub identity: String,
    pub secret: String,
    pub aux_secret: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl std::fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn forward(&self, request: OutboundRequest) -> Result<UpstreamResponse>;
}

/// Join a base URL, a path and an optional query string
pub fn build_url(base_url: &str, path: &str, query: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let mut url = if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    };
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Copy the headers that may travel upstream
pub fn forwardable_headers(incoming: &HeaderMap) -> HeaderMap {
    filter_headers(incoming, STRIPPED_REQUEST_HEADERS)
}

fn filter_headers(headers: &HeaderMap, stripped: &[&str]) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !stripped.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// reqwest-backed client using HTTP basic auth
#[derive(Clone)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    async fn forward(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        let start = Instant::now();

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .basic_auth(&request.identity, Some(&request.secret))
            .body(request.body);
        if let Some(aux) = &request.aux_secret {
            builder = builder.header(HeaderName::from_static(HEADER_AUX_SECRET), aux.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(error = %e, "Upstream request failed");
            AppError::Upstream {
                message: if e.is_timeout() {
                    "Upstream timed out".to_string()
                } else {
                    "Upstream unreachable".to_string()
                },
            }
        })?;

        let status = response.status();
        let headers = filter_headers(response.headers(), STRIPPED_RESPONSE_HEADERS);
        let body = response.bytes().await.map_err(|e| AppError::Upstream {
            message: format!("Failed to read upstream body: {}", e),
        })?;

        metrics::record_upstream(start.elapsed().as_secs_f64(), status.as_u16());

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Content type to report when upstream sent none
pub fn default_content_type(headers: &mut HeaderMap) {
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/octet-stream"),
        );
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_build_url_joins_slashes() {
        assert_eq!(
            build_url("https://api.example.com/", "/v2/items", None),
            "https://api.example.com/v2/items"
        );
        assert_eq!(
            build_url("https://api.example.com", "items", Some("page=2")),
            "https://api.example.com/items?page=2"
        );
        assert_eq!(build_url("https://api.example.com/", "", Some("")), "https://api.example.com");
    }

    #[test]
    fn test_credentials_are_not_forwarded() {
        let mut incoming = HeaderMap::new();
        incoming.insert("authorization", HeaderValue::from_static("Bearer abc"));
        incoming.insert("x-api-key", HeaderValue::from_static("rgk_123"));
        incoming.insert("x-upstream-secret", HeaderValue::from_static("s"));
        incoming.insert("accept", HeaderValue::from_static("application/json"));

        let forwarded = forwardable_headers(&incoming);
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded.contains_key("accept"));
    }

    #[test]
    fn test_debug_hides_secret() {
        let request = OutboundRequest {
            method: Method::GET,
            url: "https://api.example.com".to_string(),
            identity: "user".to_string(),
            secret: "hunter2".to_string(),
            aux_secret: Some("aux".to_string()),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("hunter2"));
    }
}
