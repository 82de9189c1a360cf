//! API key handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validate;
use crate::middleware::TenantSession;
use crate::AppState;
use relaygate_common::{auth::CreatedApiKey, db::models::ApiKey, errors::Result};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    pub connection_id: Uuid,

    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

/// Key metadata; the digest stays server-side
#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub status: String,
    pub last_used_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(k: ApiKey) -> Self {
        Self {
            id: k.id,
            connection_id: k.connection_id,
            name: k.name,
            key_prefix: k.key_prefix,
            status: k.status,
            last_used_at: k.last_used_at.map(|t| t.to_rfc3339()),
            revoked_at: k.revoked_at.map(|t| t.to_rfc3339()),
            created_at: k.created_at.to_rfc3339(),
        }
    }
}

/// Create a key; the plaintext appears in this response only
pub async fn create_api_key(
    State(state): State<AppState>,
    session: TenantSession,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreatedApiKey>)> {
    validate(&request)?;

    let created = state
        .api_keys
        .create(session.tenant_id(), request.connection_id, &request.name)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    session: TenantSession,
) -> Result<Json<Vec<ApiKeyResponse>>> {
    let keys = state.api_keys.list(session.tenant_id()).await?;
    Ok(Json(keys.into_iter().map(Into::into).collect()))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    session: TenantSession,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiKeyResponse>> {
    let key = state.api_keys.revoke(session.tenant_id(), id).await?;
    Ok(Json(key.into()))
}
