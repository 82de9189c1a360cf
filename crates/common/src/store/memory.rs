//! In-memory store for tests and single-node development.
//!
//! State lives behind one `std::sync::Mutex`; no method awaits while
//! holding it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{ApiKeyStore, AuditSink, ConnectionStore, DomainStore, TenantStore};
use crate::db::models::{ApiKey, ApiKeyStatus, AuditEntry, CustomDomain, Tenant, UpstreamConnection};
use crate::domains::{DomainPatch, DomainStatus};
use crate::errors::{AppError, Result};

#[derive(Default)]
struct State {
    tenants: HashMap<Uuid, Tenant>,
    connections: HashMap<Uuid, UpstreamConnection>,
    api_keys: HashMap<Uuid, ApiKey>,
    domains: HashMap<Uuid, CustomDomain>,
    audit: Vec<AuditEntry>,
    fail_audit: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every subsequent audit append fail
    pub fn fail_audit_writes(&self, fail: bool) {
        self.state().fail_audit = fail;
    }

    /// Number of stored audit entries
    pub fn audit_len(&self) -> usize {
        self.state().audit.len()
    }
}

fn sorted_by_created<T: Clone>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl TenantStore for InMemoryStore {
    async fn insert_tenant(&self, tenant: Tenant) -> Result<Tenant> {
        let mut state = self.state();
        if state.tenants.values().any(|t| t.email == tenant.email) {
            return Err(AppError::Duplicate {
                message: "A tenant with this email already exists".to_string(),
            });
        }
        state.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        Ok(self.state().tenants.get(&id).cloned())
    }

    async fn find_tenant_by_email(&self, email: &str) -> Result<Option<Tenant>> {
        Ok(self.state().tenants.values().find(|t| t.email == email).cloned())
    }
}

#[async_trait]
impl ConnectionStore for InMemoryStore {
    async fn insert_connection(&self, connection: UpstreamConnection) -> Result<UpstreamConnection> {
        self.state().connections.insert(connection.id, connection.clone());
        Ok(connection)
    }

    async fn find_connection(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<UpstreamConnection>> {
        Ok(self
            .state()
            .connections
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_connections(&self, tenant_id: Uuid) -> Result<Vec<UpstreamConnection>> {
        let state = self.state();
        Ok(sorted_by_created(
            state.connections.values().filter(|c| c.tenant_id == tenant_id).cloned(),
            |c| c.created_at.with_timezone(&Utc),
        ))
    }

    async fn count_connections(&self, tenant_id: Uuid) -> Result<u64> {
        Ok(self
            .state()
            .connections
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .count() as u64)
    }

    async fn replace_connection_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_ciphertext: String,
        aux_secret_ciphertext: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state();
        match state.connections.get_mut(&id).filter(|c| c.tenant_id == tenant_id) {
            Some(connection) => {
                connection.secret_ciphertext = secret_ciphertext;
                connection.aux_secret_ciphertext = aux_secret_ciphertext;
                connection.updated_at = at.into();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_connection(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let mut state = self.state();
        let owned = state.connections.get(&id).is_some_and(|c| c.tenant_id == tenant_id);
        if owned {
            state.connections.remove(&id);
            state.api_keys.retain(|_, k| k.connection_id != id);
        }
        Ok(owned)
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryStore {
    async fn insert_api_key(&self, key: ApiKey) -> Result<ApiKey> {
        let mut state = self.state();
        if state.api_keys.values().any(|k| k.key_digest == key.key_digest) {
            return Err(AppError::Duplicate {
                message: "API key digest collision".to_string(),
            });
        }
        state.api_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn find_api_key_by_digest(&self, digest: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .state()
            .api_keys
            .values()
            .find(|k| k.key_digest == digest)
            .cloned())
    }

    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>> {
        let state = self.state();
        Ok(sorted_by_created(
            state.api_keys.values().filter(|k| k.tenant_id == tenant_id).cloned(),
            |k| k.created_at.with_timezone(&Utc),
        ))
    }

    async fn revoke_api_key(&self, tenant_id: Uuid, id: Uuid, at: DateTime<Utc>) -> Result<Option<ApiKey>> {
        let mut state = self.state();
        let Some(key) = state.api_keys.get_mut(&id).filter(|k| k.tenant_id == tenant_id) else {
            return Ok(None);
        };
        if key.is_active() {
            key.status = ApiKeyStatus::Revoked.into();
            key.revoked_at = Some(at.into());
        }
        Ok(Some(key.clone()))
    }

    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(key) = self.state().api_keys.get_mut(&id) {
            key.last_used_at = Some(at.into());
        }
        Ok(())
    }
}

#[async_trait]
impl DomainStore for InMemoryStore {
    async fn insert_domain(&self, domain: CustomDomain) -> Result<CustomDomain> {
        let mut state = self.state();
        if state.domains.values().any(|d| d.hostname == domain.hostname) {
            return Err(AppError::DomainAlreadyRegistered {
                hostname: domain.hostname,
            });
        }
        state.domains.insert(domain.id, domain.clone());
        Ok(domain)
    }

    async fn find_domain(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<CustomDomain>> {
        Ok(self
            .state()
            .domains
            .get(&id)
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_domain_by_id(&self, id: Uuid) -> Result<Option<CustomDomain>> {
        Ok(self.state().domains.get(&id).cloned())
    }

    async fn find_domain_by_hostname(&self, hostname: &str) -> Result<Option<CustomDomain>> {
        Ok(self
            .state()
            .domains
            .values()
            .find(|d| d.hostname == hostname)
            .cloned())
    }

    async fn list_domains(&self, tenant_id: Uuid) -> Result<Vec<CustomDomain>> {
        let state = self.state();
        Ok(sorted_by_created(
            state.domains.values().filter(|d| d.tenant_id == tenant_id).cloned(),
            |d| d.created_at.with_timezone(&Utc),
        ))
    }

    async fn list_domains_due(&self, status: DomainStatus, limit: u64) -> Result<Vec<CustomDomain>> {
        let state = self.state();
        let mut domains: Vec<CustomDomain> = state
            .domains
            .values()
            .filter(|d| d.domain_status() == status)
            .cloned()
            .collect();
        domains.sort_by_key(|d| (d.last_check_at.map(|at| at.with_timezone(&Utc)), d.created_at.with_timezone(&Utc)));
        domains.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(domains)
    }

    async fn list_expired_domains(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<CustomDomain>> {
        let state = self.state();
        let mut domains = sorted_by_created(
            state
                .domains
                .values()
                .filter(|d| d.domain_status() == DomainStatus::Active)
                .filter(|d| d.ssl_expires_at.is_some_and(|at| at.with_timezone(&Utc) <= now))
                .cloned(),
            |d| d.created_at.with_timezone(&Utc),
        );
        domains.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(domains)
    }

    async fn stamp_domain_poll(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(domain) = self.state().domains.get_mut(&id) {
            domain.last_check_at = Some(at.into());
        }
        Ok(())
    }

    async fn record_domain_check(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<CustomDomain>> {
        let mut state = self.state();
        Ok(state.domains.get_mut(&id).map(|domain| {
            domain.check_count = domain.check_count.saturating_add(1);
            domain.last_check_at = Some(at.into());
            domain.updated_at = at.into();
            domain.clone()
        }))
    }

    async fn apply_domain_transition(
        &self,
        id: Uuid,
        expected: DomainStatus,
        patch: &DomainPatch,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state();
        match state.domains.get_mut(&id) {
            Some(domain) if domain.domain_status() == expected => {
                patch.apply_to(domain, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_domain(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let mut state = self.state();
        let owned = state.domains.get(&id).is_some_and(|d| d.tenant_id == tenant_id);
        if owned {
            state.domains.remove(&id);
        }
        Ok(owned)
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        let mut state = self.state();
        if state.fail_audit {
            return Err(AppError::AuditWriteFailed {
                message: "audit sink unavailable".to_string(),
            });
        }
        state.audit.push(entry);
        Ok(())
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state();
        let before = state.audit.len();
        state.audit.retain(|e| e.created_at.with_timezone(&Utc) >= cutoff);
        Ok((before - state.audit.len()) as u64)
    }

    async fn export_audit(
        &self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        let state = self.state();
        Ok(sorted_by_created(
            state
                .audit
                .iter()
                .filter(|e| e.tenant_id == tenant_id)
                .filter(|e| {
                    let at = e.created_at.with_timezone(&Utc);
                    at >= from && at <= to
                })
                .cloned(),
            |e| e.created_at.with_timezone(&Utc),
        ))
    }
}
