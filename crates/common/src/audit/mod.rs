//! Audit trail.
//!
//! Recording is best-effort: a failing sink is logged and counted inside
//! [`AuditRecorder::record`] and never reaches the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::clock::{span_secs, Clock};
use crate::db::models::AuditEntry;
use crate::errors::Result;
use crate::metrics;
use crate::store::AuditSink;

/// Who performed an audited action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Tenant,
    Automation,
    System,
}

impl From<String> for ActorKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "tenant" => ActorKind::Tenant,
            "automation" => ActorKind::Automation,
            _ => ActorKind::System,
        }
    }
}

impl From<ActorKind> for String {
    fn from(kind: ActorKind) -> Self {
        match kind {
            ActorKind::Tenant => "tenant".to_string(),
            ActorKind::Automation => "automation".to_string(),
            ActorKind::System => "system".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub kind: ActorKind,
}

impl Actor {
    pub fn tenant(tenant_id: Uuid) -> Self {
        Self {
            id: tenant_id.to_string(),
            kind: ActorKind::Tenant,
        }
    }

    /// API-key or upstream-token driven calls
    pub fn automation(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActorKind::Automation,
        }
    }

    /// Background jobs and administrative actions
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            kind: ActorKind::System,
        }
    }
}

/// Resource an action touched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: &'static str,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: &'static str, id: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

/// Action tags
pub mod actions {
    pub const TENANT_SIGNUP: &str = "tenant.signup";
    pub const TENANT_LOGIN: &str = "tenant.login";
    pub const CONNECTION_CREATE: &str = "connection.create";
    pub const CONNECTION_SECRET_REPLACE: &str = "connection.secret_replace";
    pub const CONNECTION_DELETE: &str = "connection.delete";
    pub const CONNECTION_TOKEN_ISSUE: &str = "connection.token_issue";
    pub const API_KEY_CREATE: &str = "api_key.create";
    pub const API_KEY_REVOKE: &str = "api_key.revoke";
    pub const DOMAIN_CREATE: &str = "domain.create";
    pub const DOMAIN_VERIFY: &str = "domain.verify";
    pub const DOMAIN_TRANSITION: &str = "domain.transition";
    pub const DOMAIN_SUSPEND: &str = "domain.suspend";
    pub const DOMAIN_DELETE: &str = "domain.delete";
}

#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Append an entry. Never fails.
    pub async fn record(
        &self,
        tenant_id: Uuid,
        actor: &Actor,
        action: &str,
        resource: Option<ResourceRef>,
        detail: Option<serde_json::Value>,
    ) {
        let entry = AuditEntry {
            id: Uuid::now_v7(),
            tenant_id,
            actor_id: actor.id.clone(),
            actor_kind: actor.kind.into(),
            action: action.to_string(),
            resource_type: resource.as_ref().map(|r| r.kind.to_string()),
            resource_id: resource.map(|r| r.id),
            detail,
            created_at: self.clock.now().into(),
        };

        if let Err(e) = self.sink.append_audit(entry).await {
            warn!(
                tenant_id = %tenant_id,
                action = %action,
                error = %e,
                "Audit write failed; entry dropped"
            );
            metrics::record_audit_write_failure(action);
        }
    }

    /// Delete entries older than `cutoff`, returning how many went
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let purged = self.sink.purge_audit_before(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "Purged audit entries");
        }
        Ok(purged)
    }

    /// Purge according to a retention period in days
    pub async fn purge_retention(&self, retention_days: i64) -> Result<u64> {
        let cutoff = self.clock.now() - span_secs(retention_days.saturating_mul(86_400));
        self.purge_older_than(cutoff).await
    }

    /// Tenant entries within `[from, to]`, oldest first
    pub async fn export(
        &self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        if from > to {
            return Err(crate::errors::AppError::Validation {
                message: "'from' must not be after 'to'".to_string(),
                field: Some("from".to_string()),
            });
        }
        self.sink.export_audit(tenant_id, from, to).await
    }
}
