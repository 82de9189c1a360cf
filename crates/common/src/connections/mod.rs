//! Upstream connections: a tenant's stored credential sets.
//!
//! Secrets are sealed with the master key before they reach the store and
//! are only ever replaced wholesale.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::ValidateUrl;

use crate::audit::{actions, Actor, AuditRecorder, ResourceRef};
use crate::auth::token::{issue_token, GatewayClaims, TokenSecret};
use crate::clock::Clock;
use crate::crypto::{decrypt, encrypt, MasterKey};
use crate::db::models::UpstreamConnection;
use crate::errors::{AppError, Result};
use crate::store::ConnectionStore;
use crate::tenants::PlanLimits;

/// Input for a new connection
#[derive(Clone)]
pub struct NewConnection {
    pub name: String,
    pub base_url: String,
    pub identity: String,
    pub secret: String,
    pub aux_secret: Option<String>,
}

/// Connection as shown to its tenant; never carries secret material
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub identity: String,
    pub has_aux_secret: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UpstreamConnection> for ConnectionView {
    fn from(c: UpstreamConnection) -> Self {
        Self {
            id: c.id,
            name: c.name,
            base_url: c.base_url,
            identity: c.identity,
            has_aux_secret: c.aux_secret_ciphertext.is_some(),
            created_at: c.created_at.with_timezone(&Utc),
            updated_at: c.updated_at.with_timezone(&Utc),
        }
    }
}

/// Upstream-scoped token bound to one connection
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub connection_id: Uuid,
}

/// Decrypted secrets of a stored connection
pub struct OpenedSecrets {
    pub secret: String,
    pub aux_secret: Option<String>,
}

/// Decrypt a connection's secrets
pub fn open_secrets(connection: &UpstreamConnection, key: &MasterKey) -> Result<OpenedSecrets> {
    let secret = decrypt(&connection.secret_ciphertext, key)?;
    let aux_secret = connection
        .aux_secret_ciphertext
        .as_deref()
        .map(|envelope| decrypt(envelope, key))
        .transpose()?;
    Ok(OpenedSecrets { secret, aux_secret })
}

/// Canonical upstream base URL without trailing slash
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let scheme_ok = trimmed.starts_with("https://") || trimmed.starts_with("http://");
    if !scheme_ok || !trimmed.validate_url() {
        return Err(AppError::Validation {
            message: "base_url must be an absolute http(s) URL".to_string(),
            field: Some("base_url".to_string()),
        });
    }
    Ok(trimmed.to_string())
}

#[derive(Clone)]
pub struct ConnectionService {
    store: Arc<dyn ConnectionStore>,
    limits: Arc<dyn PlanLimits>,
    master_key: MasterKey,
    token_secret: TokenSecret,
    upstream_token_ttl_secs: i64,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
}

impl ConnectionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        limits: Arc<dyn PlanLimits>,
        master_key: MasterKey,
        token_secret: TokenSecret,
        upstream_token_ttl_secs: i64,
        audit: AuditRecorder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            limits,
            master_key,
            token_secret,
            upstream_token_ttl_secs,
            audit,
            clock,
        }
    }

    pub async fn create(&self, tenant_id: Uuid, input: NewConnection) -> Result<ConnectionView> {
        let quota = self.limits.limits(tenant_id).await?;
        let existing = self.store.count_connections(tenant_id).await?;
        if existing >= quota.max_connections {
            return Err(AppError::PlanLimitExceeded {
                message: format!("plan allows {} connection(s)", quota.max_connections),
            });
        }

        let base_url = normalize_base_url(&input.base_url)?;
        let now = self.clock.now();
        let connection = UpstreamConnection {
            id: Uuid::new_v4(),
            tenant_id,
            name: input.name.trim().to_string(),
            base_url,
            identity: input.identity,
            secret_ciphertext: encrypt(&input.secret, &self.master_key)?,
            aux_secret_ciphertext: input
                .aux_secret
                .as_deref()
                .map(|aux| encrypt(aux, &self.master_key))
                .transpose()?,
            created_at: now.into(),
            updated_at: now.into(),
        };

        let connection = self.store.insert_connection(connection).await?;
        info!(tenant_id = %tenant_id, connection_id = %connection.id, "Upstream connection created");

        self.audit
            .record(
                tenant_id,
                &Actor::tenant(tenant_id),
                actions::CONNECTION_CREATE,
                Some(ResourceRef::new("connection", connection.id)),
                Some(serde_json::json!({ "base_url": connection.base_url })),
            )
            .await;

        Ok(connection.into())
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<ConnectionView>> {
        Ok(self
            .store
            .list_connections(tenant_id)
            .await?
            .into_iter()
            .map(ConnectionView::from)
            .collect())
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<ConnectionView> {
        self.find(tenant_id, id).await.map(ConnectionView::from)
    }

    async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<UpstreamConnection> {
        self.store
            .find_connection(tenant_id, id)
            .await?
            .ok_or_else(|| AppError::ConnectionNotFound { id: id.to_string() })
    }

    /// Replace both secrets; an absent aux secret clears the stored one
    pub async fn replace_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret: &str,
        aux_secret: Option<&str>,
    ) -> Result<()> {
        let secret_ciphertext = encrypt(secret, &self.master_key)?;
        let aux_ciphertext = aux_secret
            .map(|aux| encrypt(aux, &self.master_key))
            .transpose()?;

        let replaced = self
            .store
            .replace_connection_secret(tenant_id, id, secret_ciphertext, aux_ciphertext, self.clock.now())
            .await?;
        if !replaced {
            return Err(AppError::ConnectionNotFound { id: id.to_string() });
        }

        info!(tenant_id = %tenant_id, connection_id = %id, "Upstream secret replaced");
        self.audit
            .record(
                tenant_id,
                &Actor::tenant(tenant_id),
                actions::CONNECTION_SECRET_REPLACE,
                Some(ResourceRef::new("connection", id)),
                None,
            )
            .await;
        Ok(())
    }

    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<()> {
        if !self.store.delete_connection(tenant_id, id).await? {
            return Err(AppError::ConnectionNotFound { id: id.to_string() });
        }

        info!(tenant_id = %tenant_id, connection_id = %id, "Upstream connection deleted");
        self.audit
            .record(
                tenant_id,
                &Actor::tenant(tenant_id),
                actions::CONNECTION_DELETE,
                Some(ResourceRef::new("connection", id)),
                None,
            )
            .await;
        Ok(())
    }

    /// Issue an upstream-scoped token for one connection
    pub async fn issue_token(&self, tenant_id: Uuid, id: Uuid) -> Result<IssuedToken> {
        let connection = self.find(tenant_id, id).await?;
        let token = issue_token(
            &GatewayClaims::upstream(tenant_id, connection.id),
            &self.token_secret,
            self.upstream_token_ttl_secs,
        )?;

        self.audit
            .record(
                tenant_id,
                &Actor::tenant(tenant_id),
                actions::CONNECTION_TOKEN_ISSUE,
                Some(ResourceRef::new("connection", id)),
                None,
            )
            .await;

        Ok(IssuedToken {
            token,
            token_type: "Bearer",
            expires_in: self.upstream_token_ttl_secs,
            connection_id: connection.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::config::PlanQuota;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    struct FixedLimits(u64);

    #[async_trait]
    impl PlanLimits for FixedLimits {
        async fn limits(&self, _tenant_id: Uuid) -> Result<PlanQuota> {
            Ok(PlanQuota {
                requests_per_window: 100,
                window_secs: 60,
                max_connections: self.0,
            })
        }
    }

    fn service(max_connections: u64) -> (ConnectionService, InMemoryStore, MasterKey) {
        let store = InMemoryStore::new();
        let clock: Arc<dyn Clock> = Arc::new(MockClock::default());
        let key = MasterKey::generate();
        let audit = AuditRecorder::new(Arc::new(store.clone()), clock.clone());
        let service = ConnectionService::new(
            Arc::new(store.clone()),
            Arc::new(FixedLimits(max_connections)),
            key.clone(),
            TokenSecret::new("connection-test-secret-0123456789ab").unwrap(),
            600,
            audit,
            clock,
        );
        (service, store, key)
    }

    fn input() -> NewConnection {
        NewConnection {
            name: "blog".into(),
            base_url: "https://blog.example.com/".into(),
            identity: "admin".into(),
            secret: "app-password".into(),
            aux_secret: Some("consumer-secret".into()),
        }
    }

    #[tokio::test]
    async fn test_secrets_are_sealed() {
        let (service, store, key) = service(5);
        let tenant = Uuid::new_v4();
        let view = service.create(tenant, input()).await.unwrap();
        assert_eq!(view.base_url, "https://blog.example.com");
        assert!(view.has_aux_secret);

        let stored = store.find_connection(tenant, view.id).await.unwrap().unwrap();
        assert!(stored.secret_ciphertext.starts_with("v1."));
        assert_ne!(stored.secret_ciphertext, "app-password");

        let opened = open_secrets(&stored, &key).unwrap();
        assert_eq!(opened.secret, "app-password");
        assert_eq!(opened.aux_secret.as_deref(), Some("consumer-secret"));
    }

    #[tokio::test]
    async fn test_plan_connection_limit() {
        let (service, _, _) = service(1);
        let tenant = Uuid::new_v4();
        service.create(tenant, input()).await.unwrap();
        let err = service.create(tenant, input()).await.unwrap_err();
        assert!(matches!(err, AppError::PlanLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_replace_secret_wholesale() {
        let (service, store, key) = service(5);
        let tenant = Uuid::new_v4();
        let view = service.create(tenant, input()).await.unwrap();

        service.replace_secret(tenant, view.id, "rotated", None).await.unwrap();
        let stored = store.find_connection(tenant, view.id).await.unwrap().unwrap();
        let opened = open_secrets(&stored, &key).unwrap();
        assert_eq!(opened.secret, "rotated");
        assert!(opened.aux_secret.is_none());

        let err = service
            .replace_secret(Uuid::new_v4(), view.id, "x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConnectionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let (service, _, _) = service(5);
        let tenant = Uuid::new_v4();
        let view = service.create(tenant, input()).await.unwrap();

        assert!(service.get(Uuid::new_v4(), view.id).await.is_err());
        assert!(service.delete(Uuid::new_v4(), view.id).await.is_err());
        assert!(service.list(Uuid::new_v4()).await.unwrap().is_empty());
        service.delete(tenant, view.id).await.unwrap();
        assert!(service.list(tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_issue_upstream_token() {
        let (service, _, _) = service(5);
        let tenant = Uuid::new_v4();
        let view = service.create(tenant, input()).await.unwrap();
        let issued = service.issue_token(tenant, view.id).await.unwrap();
        assert_eq!(issued.connection_id, view.id);
        assert_eq!(issued.token.split('.').count(), 3);
    }

    #[test]
    fn test_base_url_validation() {
        assert!(normalize_base_url("ftp://example.com").is_err());
        assert!(normalize_base_url("example.com").is_err());
        assert_eq!(
            normalize_base_url(" http://localhost:8081/ ").unwrap(),
            "http://localhost:8081"
        );
    }
}
