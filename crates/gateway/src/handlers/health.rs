//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::AppState;
use relaygate_common::errors::Result;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub redis: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn is_healthy(&self) -> bool {
        self.status != "down"
    }
}

async fn probe<F>(check: Option<F>) -> CheckResult
where
    F: Future<Output = Result<()>>,
{
    let Some(check) = check else {
        return CheckResult {
            status: "not_configured".to_string(),
            latency_ms: None,
            error: None,
        };
    };

    let start = Instant::now();
    match check.await {
        Ok(_) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: relaygate_common::VERSION,
    })
}

/// Readiness probe - checks the database and Redis
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let (database, redis) = futures::join!(
        probe(state.probes.database.as_ref().map(|db| db.ping())),
        probe(state.probes.cache.as_ref().map(|cache| cache.ping())),
    );

    let all_healthy = database.is_healthy() && redis.is_healthy();
    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks { database, redis },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::harness;

    #[tokio::test]
    async fn test_health_reports_version() {
        let Json(body) = health().await;
        assert_eq!(body.status, "healthy");
        assert_eq!(body.version, relaygate_common::VERSION);
    }

    #[tokio::test]
    async fn test_ready_without_probes() {
        let h = harness();
        let (status, Json(body)) = ready(State(h.state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.checks.database.status, "not_configured");
        assert_eq!(body.checks.redis.status, "not_configured");
    }
}
