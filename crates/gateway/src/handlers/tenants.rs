//! Tenant signup and login handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validate;
use crate::middleware::TenantSession;
use crate::AppState;
use relaygate_common::{errors::Result, tenants::Session};

/// Request to create a tenant
#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 256))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub email: String,

    #[validate(length(min = 1))]
    pub password: String,
}

/// Tenant as returned to its owner
#[derive(Debug, Serialize)]
pub struct TenantResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub plan: String,
    pub status: String,
    pub created_at: String,
}

impl From<relaygate_common::db::models::Tenant> for TenantResponse {
    fn from(t: relaygate_common::db::models::Tenant) -> Self {
        Self {
            id: t.id,
            name: t.name,
            email: t.email,
            plan: t.plan,
            status: t.status,
            created_at: t.created_at.to_rfc3339(),
        }
    }
}

/// Create a tenant
pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<TenantResponse>)> {
    validate(&request)?;

    let tenant = state
        .tenants
        .signup(&request.name, &request.email, &request.password)
        .await?;

    tracing::info!(tenant_id = %tenant.id, "Tenant created");

    Ok((StatusCode::CREATED, Json(tenant.into())))
}

/// Exchange email and password for a session token
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<Session>> {
    validate(&request)?;

    let session = state.tenants.login(&request.email, &request.password).await?;
    Ok(Json(session))
}

/// The authenticated tenant
pub async fn me(session: TenantSession) -> Json<TenantResponse> {
    Json(session.tenant.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::harness;
    use relaygate_common::errors::AppError;

    #[tokio::test]
    async fn test_signup_then_login() {
        let h = harness();
        let (status, Json(created)) = signup(
            State(h.state.clone()),
            Json(SignupRequest {
                name: "Acme".to_string(),
                email: "Owner@Acme.test".to_string(),
                password: "correct horse battery".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.email, "owner@acme.test");

        let Json(session) = login(
            State(h.state.clone()),
            Json(LoginRequest {
                email: "owner@acme.test".to_string(),
                password: "correct horse battery".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(session.tenant_id, created.id);
    }

    #[tokio::test]
    async fn test_signup_rejects_short_password() {
        let h = harness();
        let err = signup(
            State(h.state),
            Json(SignupRequest {
                name: "Acme".to_string(),
                email: "owner@acme.test".to_string(),
                password: "short".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
