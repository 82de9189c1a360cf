//! Audit export handler

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::TenantSession;
use crate::AppState;
use relaygate_common::{
    db::models::AuditEntry,
    errors::{AppError, Result},
};

/// `from` and `to` accept RFC 3339 timestamps or `YYYY-MM-DD` dates;
/// a date bound covers the whole day
#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct AuditEntryResponse {
    pub id: Uuid,
    pub actor_id: String,
    pub actor_kind: String,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub detail: Option<serde_json::Value>,
    pub created_at: String,
}

impl From<AuditEntry> for AuditEntryResponse {
    fn from(e: AuditEntry) -> Self {
        Self {
            id: e.id,
            actor_id: e.actor_id,
            actor_kind: e.actor_kind,
            action: e.action,
            resource_type: e.resource_type,
            resource_id: e.resource_id,
            detail: e.detail,
            created_at: e.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub count: usize,
    pub entries: Vec<AuditEntryResponse>,
}

fn parse_bound(raw: &str, field: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| AppError::Validation {
        message: format!("'{}' must be an RFC 3339 timestamp or YYYY-MM-DD date", field),
        field: Some(field.to_string()),
    })?;
    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        Some(NaiveTime::MIN)
    }
    .ok_or_else(|| AppError::Internal {
        message: "invalid time of day".to_string(),
    })?;

    Ok(date.and_time(time).and_utc())
}

/// Export the caller's audit trail, oldest first
pub async fn export_audit(
    State(state): State<AppState>,
    session: TenantSession,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportResponse>> {
    let from = parse_bound(&query.from, "from", false)?;
    let to = parse_bound(&query.to, "to", true)?;

    let entries = state.audit.export(session.tenant_id(), from, to).await?;

    Ok(Json(ExportResponse {
        from,
        to,
        count: entries.len(),
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}
