//! Repository pattern for database operations
//!
//! Implements the store traits over SeaORM. Reads go to the replica when
//! one is configured; writes and compare-and-set updates always hit the
//! primary.

use crate::db::models::*;
use crate::db::DbPool;
use crate::domains::{DomainPatch, DomainStatus};
use crate::errors::{AppError, Result};
use crate::store::{ApiKeyStore, AuditSink, ConnectionStore, DomainStore, TenantStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, NullOrdering};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, SqlErr,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn stamp(at: DateTime<Utc>) -> DateTimeWithTimeZone {
    at.into()
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

// ============================================================================
// Tenant Operations
// ============================================================================

#[async_trait]
impl TenantStore for Repository {
    async fn insert_tenant(&self, tenant: Tenant) -> Result<Tenant> {
        TenantActiveModel::from(tenant)
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Duplicate {
                        message: "A tenant with this email already exists".to_string(),
                    }
                } else {
                    e.into()
                }
            })
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        TenantEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_tenant_by_email(&self, email: &str) -> Result<Option<Tenant>> {
        TenantEntity::find()
            .filter(TenantColumn::Email.eq(email))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

// ============================================================================
// Upstream Connection Operations
// ============================================================================

#[async_trait]
impl ConnectionStore for Repository {
    async fn insert_connection(&self, connection: UpstreamConnection) -> Result<UpstreamConnection> {
        UpstreamConnectionActiveModel::from(connection)
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_connection(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<UpstreamConnection>> {
        UpstreamConnectionEntity::find()
            .filter(UpstreamConnectionColumn::TenantId.eq(tenant_id))
            .filter(UpstreamConnectionColumn::Id.eq(id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_connections(&self, tenant_id: Uuid) -> Result<Vec<UpstreamConnection>> {
        UpstreamConnectionEntity::find()
            .filter(UpstreamConnectionColumn::TenantId.eq(tenant_id))
            .order_by_asc(UpstreamConnectionColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn count_connections(&self, tenant_id: Uuid) -> Result<u64> {
        UpstreamConnectionEntity::find()
            .filter(UpstreamConnectionColumn::TenantId.eq(tenant_id))
            .count(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn replace_connection_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_ciphertext: String,
        aux_secret_ciphertext: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = UpstreamConnectionEntity::update_many()
            .col_expr(UpstreamConnectionColumn::SecretCiphertext, Expr::value(secret_ciphertext))
            .col_expr(UpstreamConnectionColumn::AuxSecretCiphertext, Expr::value(aux_secret_ciphertext))
            .col_expr(UpstreamConnectionColumn::UpdatedAt, Expr::value(stamp(at)))
            .filter(UpstreamConnectionColumn::TenantId.eq(tenant_id))
            .filter(UpstreamConnectionColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn delete_connection(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let result = UpstreamConnectionEntity::delete_many()
            .filter(UpstreamConnectionColumn::TenantId.eq(tenant_id))
            .filter(UpstreamConnectionColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }
}

// ============================================================================
// API Key Operations
// ============================================================================

#[async_trait]
impl ApiKeyStore for Repository {
    async fn insert_api_key(&self, key: ApiKey) -> Result<ApiKey> {
        ApiKeyActiveModel::from(key)
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Duplicate {
                        message: "API key digest collision".to_string(),
                    }
                } else {
                    e.into()
                }
            })
    }

    async fn find_api_key_by_digest(&self, digest: &str) -> Result<Option<ApiKey>> {
        ApiKeyEntity::find()
            .filter(ApiKeyColumn::KeyDigest.eq(digest))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>> {
        ApiKeyEntity::find()
            .filter(ApiKeyColumn::TenantId.eq(tenant_id))
            .order_by_asc(ApiKeyColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn revoke_api_key(&self, tenant_id: Uuid, id: Uuid, at: DateTime<Utc>) -> Result<Option<ApiKey>> {
        ApiKeyEntity::update_many()
            .col_expr(ApiKeyColumn::Status, Expr::value(String::from(ApiKeyStatus::Revoked)))
            .col_expr(ApiKeyColumn::RevokedAt, Expr::value(Some(stamp(at))))
            .filter(ApiKeyColumn::TenantId.eq(tenant_id))
            .filter(ApiKeyColumn::Id.eq(id))
            .filter(ApiKeyColumn::Status.eq(String::from(ApiKeyStatus::Active)))
            .exec(self.write_conn())
            .await?;

        ApiKeyEntity::find()
            .filter(ApiKeyColumn::TenantId.eq(tenant_id))
            .filter(ApiKeyColumn::Id.eq(id))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        ApiKeyEntity::update_many()
            .col_expr(ApiKeyColumn::LastUsedAt, Expr::value(Some(stamp(at))))
            .filter(ApiKeyColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }
}

// ============================================================================
// Custom Domain Operations
// ============================================================================

#[async_trait]
impl DomainStore for Repository {
    async fn insert_domain(&self, domain: CustomDomain) -> Result<CustomDomain> {
        let hostname = domain.hostname.clone();
        CustomDomainActiveModel::from(domain)
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::DomainAlreadyRegistered { hostname }
                } else {
                    e.into()
                }
            })
    }

    async fn find_domain(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<CustomDomain>> {
        CustomDomainEntity::find()
            .filter(CustomDomainColumn::TenantId.eq(tenant_id))
            .filter(CustomDomainColumn::Id.eq(id))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_domain_by_id(&self, id: Uuid) -> Result<Option<CustomDomain>> {
        CustomDomainEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_domain_by_hostname(&self, hostname: &str) -> Result<Option<CustomDomain>> {
        CustomDomainEntity::find()
            .filter(CustomDomainColumn::Hostname.eq(hostname))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_domains(&self, tenant_id: Uuid) -> Result<Vec<CustomDomain>> {
        CustomDomainEntity::find()
            .filter(CustomDomainColumn::TenantId.eq(tenant_id))
            .order_by_asc(CustomDomainColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_domains_due(&self, status: DomainStatus, limit: u64) -> Result<Vec<CustomDomain>> {
        CustomDomainEntity::find()
            .filter(CustomDomainColumn::Status.eq(String::from(status)))
            .order_by_with_nulls(CustomDomainColumn::LastCheckAt, Order::Asc, NullOrdering::First)
            .order_by_asc(CustomDomainColumn::CreatedAt)
            .limit(limit)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_expired_domains(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<CustomDomain>> {
        CustomDomainEntity::find()
            .filter(CustomDomainColumn::Status.eq(String::from(DomainStatus::Active)))
            .filter(CustomDomainColumn::SslExpiresAt.lte(stamp(now)))
            .order_by_asc(CustomDomainColumn::SslExpiresAt)
            .limit(limit)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn stamp_domain_poll(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        CustomDomainEntity::update_many()
            .col_expr(CustomDomainColumn::LastCheckAt, Expr::value(Some(stamp(at))))
            .filter(CustomDomainColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    async fn record_domain_check(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<CustomDomain>> {
        let result = CustomDomainEntity::update_many()
            .col_expr(
                CustomDomainColumn::CheckCount,
                Expr::col(CustomDomainColumn::CheckCount).add(1),
            )
            .col_expr(CustomDomainColumn::LastCheckAt, Expr::value(Some(stamp(at))))
            .col_expr(CustomDomainColumn::UpdatedAt, Expr::value(stamp(at)))
            .filter(CustomDomainColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.find_domain_by_id(id).await
    }

    async fn apply_domain_transition(
        &self,
        id: Uuid,
        expected: DomainStatus,
        patch: &DomainPatch,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut update = CustomDomainEntity::update_many()
            .col_expr(CustomDomainColumn::UpdatedAt, Expr::value(stamp(at)))
            .filter(CustomDomainColumn::Id.eq(id))
            .filter(CustomDomainColumn::Status.eq(String::from(expected)));

        if let Some(status) = patch.status {
            update = update.col_expr(CustomDomainColumn::Status, Expr::value(String::from(status)));
        }
        if let Some(ssl_status) = patch.ssl_status {
            update = update.col_expr(CustomDomainColumn::SslStatus, Expr::value(String::from(ssl_status)));
        }
        if let Some(verified_at) = patch.verified_at {
            update = update.col_expr(CustomDomainColumn::VerifiedAt, Expr::value(Some(stamp(verified_at))));
        }
        if let Some(requested_at) = patch.ssl_requested_at {
            update = update.col_expr(CustomDomainColumn::SslRequestedAt, Expr::value(Some(stamp(requested_at))));
        }
        if let Some(issued_at) = patch.ssl_issued_at {
            update = update.col_expr(CustomDomainColumn::SslIssuedAt, Expr::value(Some(stamp(issued_at))));
        }
        if let Some(expires_at) = patch.ssl_expires_at {
            update = update.col_expr(CustomDomainColumn::SslExpiresAt, Expr::value(Some(stamp(expires_at))));
        }
        if let Some(last_error) = &patch.last_error {
            update = update.col_expr(CustomDomainColumn::LastError, Expr::value(last_error.clone()));
        }

        let result = update.exec(self.write_conn()).await?;
        Ok(result.rows_affected == 1)
    }

    async fn delete_domain(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let result = CustomDomainEntity::delete_many()
            .filter(CustomDomainColumn::TenantId.eq(tenant_id))
            .filter(CustomDomainColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }
}

// ============================================================================
// Audit Operations
// ============================================================================

#[async_trait]
impl AuditSink for Repository {
    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        AuditLogActiveModel::from(entry)
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(|e| AppError::AuditWriteFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = AuditLogEntity::delete_many()
            .filter(AuditLogColumn::CreatedAt.lt(stamp(cutoff)))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }

    async fn export_audit(
        &self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        AuditLogEntity::find()
            .filter(AuditLogColumn::TenantId.eq(tenant_id))
            .filter(AuditLogColumn::CreatedAt.gte(stamp(from)))
            .filter(AuditLogColumn::CreatedAt.lte(stamp(to)))
            .order_by_asc(AuditLogColumn::CreatedAt)
            .order_by_asc(AuditLogColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}
