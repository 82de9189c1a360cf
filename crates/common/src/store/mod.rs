//! Persistence seams.
//!
//! Every tenant-owned read and write takes the tenant ID and filters by
//! it. The SeaORM [`Repository`](crate::db::Repository) implements these
//! traits for production; [`InMemoryStore`] backs tests and local runs.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{ApiKey, AuditEntry, CustomDomain, Tenant, UpstreamConnection};
use crate::domains::{DomainPatch, DomainStatus};
use crate::errors::Result;

#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Insert a tenant; a taken email yields `AppError::Duplicate`
    async fn insert_tenant(&self, tenant: Tenant) -> Result<Tenant>;

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>>;

    async fn find_tenant_by_email(&self, email: &str) -> Result<Option<Tenant>>;
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn insert_connection(&self, connection: UpstreamConnection) -> Result<UpstreamConnection>;

    async fn find_connection(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<UpstreamConnection>>;

    async fn list_connections(&self, tenant_id: Uuid) -> Result<Vec<UpstreamConnection>>;

    async fn count_connections(&self, tenant_id: Uuid) -> Result<u64>;

    /// Replace the stored secret wholesale; false when no such connection
    async fn replace_connection_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_ciphertext: String,
        aux_secret_ciphertext: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn delete_connection(&self, tenant_id: Uuid, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_api_key(&self, key: ApiKey) -> Result<ApiKey>;

    /// Lookup across all tenants; the digest is globally unique
    async fn find_api_key_by_digest(&self, digest: &str) -> Result<Option<ApiKey>>;

    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>>;

    /// Move an active key to revoked. Returns the key as stored afterwards,
    /// or `None` when the tenant owns no such key.
    async fn revoke_api_key(&self, tenant_id: Uuid, id: Uuid, at: DateTime<Utc>) -> Result<Option<ApiKey>>;

    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Insert a domain; a taken hostname yields
    /// `AppError::DomainAlreadyRegistered` whatever its owner or state
    async fn insert_domain(&self, domain: CustomDomain) -> Result<CustomDomain>;

    async fn find_domain(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<CustomDomain>>;

    /// Unscoped lookup for administrative and background paths
    async fn find_domain_by_id(&self, id: Uuid) -> Result<Option<CustomDomain>>;

    async fn find_domain_by_hostname(&self, hostname: &str) -> Result<Option<CustomDomain>>;

    async fn list_domains(&self, tenant_id: Uuid) -> Result<Vec<CustomDomain>>;

    /// Domains in `status`, least recently checked first (never-checked
    /// before any other)
    async fn list_domains_due(&self, status: DomainStatus, limit: u64) -> Result<Vec<CustomDomain>>;

    /// Active domains whose certificate expires at or before `now`
    async fn list_expired_domains(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<CustomDomain>>;

    /// Stamp `last_check_at` without counting a verification attempt
    async fn stamp_domain_poll(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Atomically increment `check_count` and stamp `last_check_at`,
    /// returning the updated record
    async fn record_domain_check(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<CustomDomain>>;

    /// Apply `patch` only if the stored status still equals `expected`.
    /// Returns whether the write happened.
    async fn apply_domain_transition(
        &self,
        id: Uuid,
        expected: DomainStatus,
        patch: &DomainPatch,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn delete_domain(&self, tenant_id: Uuid, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_audit(&self, entry: AuditEntry) -> Result<()>;

    /// Delete entries created strictly before `cutoff`
    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Entries with `from <= created_at <= to`, oldest first
    async fn export_audit(
        &self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>>;
}
