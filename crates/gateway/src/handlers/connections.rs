//! Upstream connection handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::validate;
use crate::middleware::TenantSession;
use crate::AppState;
use relaygate_common::{
    connections::{ConnectionView, IssuedToken, NewConnection},
    errors::Result,
};

/// Request to store a credential set for the upstream service
#[derive(Debug, Deserialize, Validate)]
pub struct CreateConnectionRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[validate(length(min = 1, max = 2048))]
    pub base_url: String,

    #[validate(length(min = 1, max = 512))]
    pub identity: String,

    #[validate(length(min = 1, max = 4096))]
    pub secret: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 4096))]
    pub aux_secret: Option<String>,
}

/// Full replacement of a connection's secrets
#[derive(Debug, Deserialize, Validate)]
pub struct ReplaceSecretRequest {
    #[validate(length(min = 1, max = 4096))]
    pub secret: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 4096))]
    pub aux_secret: Option<String>,
}

pub async fn create_connection(
    State(state): State<AppState>,
    session: TenantSession,
    Json(request): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionView>)> {
    validate(&request)?;

    let view = state
        .connections
        .create(
            session.tenant_id(),
            NewConnection {
                name: request.name,
                base_url: request.base_url,
                identity: request.identity,
                secret: request.secret,
                aux_secret: request.aux_secret,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn list_connections(
    State(state): State<AppState>,
    session: TenantSession,
) -> Result<Json<Vec<ConnectionView>>> {
    Ok(Json(state.connections.list(session.tenant_id()).await?))
}

pub async fn get_connection(
    State(state): State<AppState>,
    session: TenantSession,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionView>> {
    Ok(Json(state.connections.get(session.tenant_id(), id).await?))
}

pub async fn replace_secret(
    State(state): State<AppState>,
    session: TenantSession,
    Path(id): Path<Uuid>,
    Json(request): Json<ReplaceSecretRequest>,
) -> Result<StatusCode> {
    validate(&request)?;

    state
        .connections
        .replace_secret(session.tenant_id(), id, &request.secret, request.aux_secret.as_deref())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_connection(
    State(state): State<AppState>,
    session: TenantSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.connections.delete(session.tenant_id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Issue an `upstream`-scoped token bound to one connection
pub async fn issue_token(
    State(state): State<AppState>,
    session: TenantSession,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<IssuedToken>)> {
    let token = state.connections.issue_token(session.tenant_id(), id).await?;
    Ok((StatusCode::CREATED, Json(token)))
}
