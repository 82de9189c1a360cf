//! Session and operator authentication for management routes

use axum::{extract::FromRequestParts, http::request::Parts};
use relaygate_common::{
    audit::Actor,
    auth::{digest_of, extract_bearer},
    db::models::Tenant,
    errors::{AppError, Result},
};
use uuid::Uuid;

use crate::AppState;

/// Tenant authenticated by a `session`-scoped bearer token
#[derive(Debug, Clone)]
pub struct TenantSession {
    pub tenant: Tenant,
}

impl TenantSession {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant.id
    }

    pub fn actor(&self) -> Actor {
        Actor::tenant(self.tenant.id)
    }
}

impl FromRequestParts<AppState> for TenantSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing bearer session token".to_string(),
            })?;

        let tenant = state.tenants.authenticate_session(token).await?;

        tracing::debug!(tenant_id = %tenant.id, "Session authenticated");

        Ok(Self { tenant })
    }
}

/// Operator presenting `security.admin_token` as a bearer token
#[derive(Debug, Clone, Copy)]
pub struct OperatorSession;

impl FromRequestParts<AppState> for OperatorSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let expected = state
            .config
            .security
            .admin_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Forbidden {
                message: "Administrative routes are disabled".to_string(),
            })?;

        let presented = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing bearer operator token".to_string(),
            })?;

        // Compare fixed-length digests
        if digest_of(presented) != digest_of(expected) {
            tracing::warn!("Rejected operator token");
            return Err(AppError::Unauthorized {
                message: "Invalid operator token".to_string(),
            });
        }

        Ok(Self)
    }
}
