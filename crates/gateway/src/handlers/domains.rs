//! Custom domain handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validate;
use crate::middleware::{OperatorSession, TenantSession};
use crate::AppState;
use relaygate_common::{
    db::models::CustomDomain,
    domains::{DomainService, VerificationOutcome},
    errors::Result,
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDomainRequest {
    #[validate(length(min = 1, max = 300))]
    pub hostname: String,
}

/// DNS record the tenant must publish
#[derive(Debug, Serialize)]
pub struct TxtRecord {
    pub record_type: &'static str,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct DomainResponse {
    pub id: Uuid,
    pub hostname: String,
    pub status: String,
    pub ssl_status: String,
    pub txt_record: TxtRecord,
    pub instructions: String,
    pub check_count: i32,
    pub last_check_at: Option<String>,
    pub verified_at: Option<String>,
    pub ssl_expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: String,
}

impl DomainResponse {
    fn build(domain: CustomDomain, service: &DomainService) -> Self {
        let instructions = service.instructions(&domain);
        Self {
            id: domain.id,
            txt_record: TxtRecord {
                record_type: "TXT",
                name: domain.txt_record_name,
                value: domain.verification_token,
            },
            hostname: domain.hostname,
            status: domain.status,
            ssl_status: domain.ssl_status,
            instructions,
            check_count: domain.check_count,
            last_check_at: domain.last_check_at.map(|t| t.to_rfc3339()),
            verified_at: domain.verified_at.map(|t| t.to_rfc3339()),
            ssl_expires_at: domain.ssl_expires_at.map(|t| t.to_rfc3339()),
            last_error: domain.last_error,
            created_at: domain.created_at.to_rfc3339(),
        }
    }
}

/// Register a hostname; it starts in `pending_verification`
pub async fn create_domain(
    State(state): State<AppState>,
    session: TenantSession,
    Json(request): Json<CreateDomainRequest>,
) -> Result<(StatusCode, Json<DomainResponse>)> {
    validate(&request)?;

    let domain = state.domains.create(session.tenant_id(), &request.hostname).await?;

    Ok((StatusCode::CREATED, Json(DomainResponse::build(domain, &state.domains))))
}

pub async fn list_domains(
    State(state): State<AppState>,
    session: TenantSession,
) -> Result<Json<Vec<DomainResponse>>> {
    let domains = state.domains.list(session.tenant_id()).await?;
    Ok(Json(
        domains
            .into_iter()
            .map(|d| DomainResponse::build(d, &state.domains))
            .collect(),
    ))
}

pub async fn get_domain(
    State(state): State<AppState>,
    session: TenantSession,
    Path(id): Path<Uuid>,
) -> Result<Json<DomainResponse>> {
    let domain = state.domains.get(session.tenant_id(), id).await?;
    Ok(Json(DomainResponse::build(domain, &state.domains)))
}

pub async fn delete_domain(
    State(state): State<AppState>,
    session: TenantSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.domains.delete(session.tenant_id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Operator suspension of any tenant's domain
pub async fn suspend_domain(
    State(state): State<AppState>,
    _operator: OperatorSession,
    Path(id): Path<Uuid>,
) -> Result<Json<DomainResponse>> {
    let domain = state.domains.suspend(id).await?;
    Ok(Json(DomainResponse::build(domain, &state.domains)))
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    /// Answer 422 instead of 200 when ownership is not yet proven
    #[serde(default)]
    pub strict: bool,
}

/// Check the TXT record now; a miss is reported in the body, not as an
/// error, unless `?strict=true`
pub async fn verify_domain(
    State(state): State<AppState>,
    session: TenantSession,
    Path(id): Path<Uuid>,
    Query(params): Query<VerifyParams>,
) -> Result<Json<VerificationOutcome>> {
    let outcome = state
        .domains
        .verify(session.tenant_id(), &session.actor(), id)
        .await?;
    if params.strict {
        return outcome.into_result().map(Json);
    }
    Ok(Json(outcome))
}
