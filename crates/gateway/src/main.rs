//! Relaygate Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Tenant signup and session authentication
//! - Upstream connections, API keys and custom domains
//! - Credential resolution, rate limiting and forwarding
//! - Observability (logging, metrics)

mod handlers;
mod middleware;
mod state;
mod tasks;
mod upstream;

use axum::{
    routing::{any, delete, get, post, put},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use relaygate_common::{
    cache::Cache,
    clock::{Clock, SystemClock},
    config::AppConfig,
    db::{DbPool, Repository},
    domains::{ImmediateProvisioner, SystemTxtResolver},
    metrics,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::watch};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub use state::AppState;
use state::{Backends, Probes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    let config = Arc::new(config);

    init_tracing(&config);
    info!(
        service = %config.observability.service_name,
        "Starting Relaygate gateway v{}",
        relaygate_common::VERSION
    );

    // Initialize metrics
    init_metrics(&config)?;
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }
    let repository = Repository::new(db);

    info!("Connecting to Redis...");
    let cache = Arc::new(Cache::new(&config.redis).await?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = Backends::production(
        repository.clone(),
        cache.clone(),
        Arc::new(SystemTxtResolver::new(Duration::from_secs(config.domains.dns_timeout_secs))),
        Arc::new(ImmediateProvisioner::new(
            config.domains.certificate_validity_days,
            clock.clone(),
        )),
        &config,
        clock,
    )?;
    let probes = Probes {
        database: Some(repository),
        cache: Some(cache),
    };

    // Create app state
    let state = AppState::assemble(config.clone(), backends, probes)?;

    // Background work
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tasks::spawn_domain_poller(
        state.domains.clone(),
        Duration::from_secs(config.domains.poll_interval_secs.max(1)),
        shutdown_rx.clone(),
    );
    let purge = tasks::spawn_audit_purge(
        state.audit.clone(),
        config.audit.retention_days,
        Duration::from_secs(config.audit.purge_interval_secs.max(1)),
        shutdown_rx,
    );

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let drain = async {
        let _ = poller.await;
        let _ = purge.await;
    };
    if tokio::time::timeout(config.shutdown_timeout(), drain).await.is_err() {
        error!("Background tasks did not stop within the shutdown timeout");
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(config: &AppConfig) -> anyhow::Result<()> {
    if config.observability.metrics_port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            metrics::LATENCY_BUCKETS,
        )?
        .install()?;

    info!(port = config.observability.metrics_port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let limiter = middleware::rate_limit::create_rate_limiter(
        state.config.rate_limit.global_requests_per_second,
        state.config.rate_limit.global_burst,
    );
    let request_timeout = state.config.request_timeout();

    // API routes
    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Tenant endpoints
        .route("/tenants", post(handlers::tenants::signup))
        .route("/tenants/me", get(handlers::tenants::me))
        .route("/auth/login", post(handlers::tenants::login))

        // Connection endpoints
        .route(
            "/connections",
            get(handlers::connections::list_connections).post(handlers::connections::create_connection),
        )
        .route(
            "/connections/{id}",
            get(handlers::connections::get_connection).delete(handlers::connections::delete_connection),
        )
        .route("/connections/{id}/secret", put(handlers::connections::replace_secret))
        .route("/connections/{id}/tokens", post(handlers::connections::issue_token))

        // API key endpoints
        .route(
            "/api-keys",
            get(handlers::api_keys::list_api_keys).post(handlers::api_keys::create_api_key),
        )
        .route("/api-keys/{id}", delete(handlers::api_keys::revoke_api_key))

        // Domain endpoints
        .route(
            "/domains",
            get(handlers::domains::list_domains).post(handlers::domains::create_domain),
        )
        .route(
            "/domains/{id}",
            get(handlers::domains::get_domain).delete(handlers::domains::delete_domain),
        )
        .route("/domains/{id}/verify", post(handlers::domains::verify_domain))

        // Operator endpoints
        .route("/admin/domains/{id}/suspend", post(handlers::domains::suspend_domain))

        // Audit endpoints
        .route("/audit/export", get(handlers::audit::export_audit))

        // Proxy
        .route("/proxy/{*path}", any(handlers::proxy::forward));

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::metrics::track_metrics))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{harness, harness_with, test_config, Harness};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(h: &Harness, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = create_router(h.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn session_token(h: &Harness) -> String {
        let (status, _) = send(
            h,
            "POST",
            "/v1/tenants",
            None,
            Some(json!({ "name": "Acme", "email": "ops@acme.test", "password": "correct horse battery" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            h,
            "POST",
            "/v1/auth/login",
            None,
            Some(json!({ "email": "ops@acme.test", "password": "correct horse battery" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_route() {
        let h = harness();
        let (status, body) = send(&h, "GET", "/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_management_routes_require_session() {
        let h = harness();
        let (status, body) = send(&h, "GET", "/v1/domains", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"]["code"].is_string());

        let (status, _) = send(&h, "GET", "/v1/domains", Some("not-a-token"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let h = harness();
        session_token(&h).await;
        let (status, _) = send(
            &h,
            "POST",
            "/v1/auth/login",
            None,
            Some(json!({ "email": "ops@acme.test", "password": "wrong password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_domain_lifecycle_over_http() {
        let h = harness();
        let token = session_token(&h).await;

        let (status, created) = send(
            &h,
            "POST",
            "/v1/domains",
            Some(&token),
            Some(json!({ "hostname": "HTTPS://Api.Customer.com/" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["hostname"], "api.customer.com");
        assert_eq!(created["status"], "pending_verification");
        let id = created["id"].as_str().unwrap().to_string();
        let record_name = created["txt_record"]["name"].as_str().unwrap().to_string();
        let record_value = created["txt_record"]["value"].as_str().unwrap().to_string();

        let verify_uri = format!("/v1/domains/{}/verify", id);
        let (status, outcome) = send(&h, "POST", &verify_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["verified"], false);
        assert_eq!(outcome["status"], "pending_verification");

        let strict_uri = format!("{}?strict=true", verify_uri);
        let (status, body) = send(&h, "POST", &strict_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"]["message"].as_str().unwrap().contains(&record_name));

        h.dns.publish(&record_name, vec![record_value]);
        let (status, outcome) = send(&h, "POST", &verify_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["verified"], true);
        assert_eq!(outcome["status"], "active");

        let (status, listed) = send(&h, "GET", "/v1/domains", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, _) = send(&h, "DELETE", &format!("/v1/domains/{}", id), Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&h, "GET", &format!("/v1/domains/{}", id), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_operator_suspends_domain() {
        let mut config = test_config();
        config.security.admin_token = Some("operator-token".to_string());
        let h = harness_with(config);
        let token = session_token(&h).await;

        let (_, created) = send(
            &h,
            "POST",
            "/v1/domains",
            Some(&token),
            Some(json!({ "hostname": "api.customer.com" })),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();
        let suspend_uri = format!("/v1/admin/domains/{}/suspend", id);

        let (status, _) = send(&h, "POST", &suspend_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&h, "POST", &suspend_uri, Some("operator-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "suspended");

        let (_, fetched) = send(&h, "GET", &format!("/v1/domains/{}", id), Some(&token), None).await;
        assert_eq!(fetched["status"], "suspended");

        let (status, _) = send(&h, "POST", &suspend_uri, Some("operator-token"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_routes_disabled_without_token() {
        let h = harness();
        let uri = format!("/v1/admin/domains/{}/suspend", uuid::Uuid::new_v4());
        let (status, _) = send(&h, "POST", &uri, Some("anything"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_connection_key_and_proxy_over_http() {
        let h = harness();
        let token = session_token(&h).await;

        let (status, connection) = send(
            &h,
            "POST",
            "/v1/connections",
            Some(&token),
            Some(json!({
                "name": "primary",
                "base_url": "https://api.acme.test",
                "identity": "acme-bot",
                "secret": "upstream-secret"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(connection.get("secret").is_none());
        let connection_id = connection["id"].as_str().unwrap().to_string();

        let (status, key) = send(
            &h,
            "POST",
            "/v1/api-keys",
            Some(&token),
            Some(json!({ "connection_id": connection_id, "name": "ci" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(key.get("key_digest").is_none());
        let plaintext = key["plaintext"].as_str().unwrap().to_string();

        let request = Request::builder()
            .method("POST")
            .uri("/v1/proxy/orders")
            .header("x-api-key", &plaintext)
            .body(Body::from("{}"))
            .unwrap();
        let response = create_router(h.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let forwarded = h.upstream.requests();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].url, "https://api.acme.test/orders");
        assert_eq!(forwarded[0].identity, "acme-bot");

        let key_id = key["id"].as_str().unwrap().to_string();
        let (status, revoked) = send(&h, "DELETE", &format!("/v1/api-keys/{}", key_id), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(revoked["status"], "revoked");

        let request = Request::builder()
            .uri("/v1/proxy/orders")
            .header("x-api-key", &plaintext)
            .body(Body::empty())
            .unwrap();
        let response = create_router(h.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let (status, export) = send(
            &h,
            "GET",
            "/v1/audit/export?from=2000-01-01&to=2100-01-01",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let actions: Vec<&str> = export["entries"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["action"].as_str())
            .collect();
        assert!(actions.contains(&"connection.create"));
        assert!(actions.contains(&"api_key.revoke"));
    }
}
