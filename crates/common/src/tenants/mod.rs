//! Tenant accounts, dashboard sessions and plan limits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{actions, Actor, AuditRecorder, ResourceRef};
use crate::auth::token::{issue_token, verify_token, GatewayClaims, TokenScope, TokenSecret};
use crate::clock::Clock;
use crate::config::{PlanQuota, PlansConfig};
use crate::crypto::{hash_password, verify_password};
use crate::db::models::Tenant;
use crate::errors::{AppError, Result};
use crate::store::TenantStore;

/// Subscription plan
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Pro,
    Enterprise,
}

impl From<String> for PlanTier {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pro" => PlanTier::Pro,
            "enterprise" => PlanTier::Enterprise,
            _ => PlanTier::Free,
        }
    }
}

impl From<PlanTier> for String {
    fn from(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => "free".to_string(),
            PlanTier::Pro => "pro".to_string(),
            PlanTier::Enterprise => "enterprise".to_string(),
        }
    }
}

/// Account status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl From<String> for TenantStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => TenantStatus::Active,
            "deleted" => TenantStatus::Deleted,
            _ => TenantStatus::Suspended,
        }
    }
}

impl From<TenantStatus> for String {
    fn from(status: TenantStatus) -> Self {
        match status {
            TenantStatus::Active => "active".to_string(),
            TenantStatus::Suspended => "suspended".to_string(),
            TenantStatus::Deleted => "deleted".to_string(),
        }
    }
}

/// Source of per-tenant quotas
#[async_trait]
pub trait PlanLimits: Send + Sync {
    async fn limits(&self, tenant_id: Uuid) -> Result<PlanQuota>;
}

/// Reads the tenant's plan and maps it to configured quotas
pub struct ConfigPlanLimits {
    tenants: Arc<dyn TenantStore>,
    plans: PlansConfig,
}

impl ConfigPlanLimits {
    pub fn new(tenants: Arc<dyn TenantStore>, plans: PlansConfig) -> Self {
        Self { tenants, plans }
    }
}

#[async_trait]
impl PlanLimits for ConfigPlanLimits {
    async fn limits(&self, tenant_id: Uuid) -> Result<PlanQuota> {
        let tenant = self
            .tenants
            .find_tenant(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "tenant".to_string(),
                id: tenant_id.to_string(),
            })?;
        Ok(self.plans.quota(tenant.plan_tier()).clone())
    }
}

/// Session issued on login
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub tenant_id: Uuid,
}

#[derive(Clone)]
pub struct TenantService {
    store: Arc<dyn TenantStore>,
    secret: TokenSecret,
    session_ttl_secs: i64,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hash verified when the email is unknown, so both paths cost one
/// Argon2 verification
fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password("relaygate-dummy-password").unwrap_or_default())
}

impl TenantService {
    pub fn new(
        store: Arc<dyn TenantStore>,
        secret: TokenSecret,
        session_ttl_secs: i64,
        audit: AuditRecorder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            secret,
            session_ttl_secs,
            audit,
            clock,
        }
    }

    /// Create a tenant on the free plan
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<Tenant> {
        let email = normalize_email(email);
        if self.store.find_tenant_by_email(&email).await?.is_some() {
            return Err(AppError::Duplicate {
                message: "A tenant with this email already exists".to_string(),
            });
        }

        let now = self.clock.now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            email,
            password_hash: hash_password(password)?,
            plan: PlanTier::Free.into(),
            status: TenantStatus::Active.into(),
            created_at: now.into(),
            updated_at: now.into(),
        };

        let tenant = self.store.insert_tenant(tenant).await?;
        info!(tenant_id = %tenant.id, "Tenant created");

        self.audit
            .record(
                tenant.id,
                &Actor::tenant(tenant.id),
                actions::TENANT_SIGNUP,
                Some(ResourceRef::new("tenant", tenant.id)),
                None,
            )
            .await;

        Ok(tenant)
    }

    /// Exchange email and password for a session token
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let email = normalize_email(email);
        let tenant = match self.store.find_tenant_by_email(&email).await? {
            Some(tenant) => tenant,
            None => {
                verify_password(password, dummy_hash());
                return Err(AppError::InvalidCredentials);
            }
        };

        if !verify_password(password, &tenant.password_hash) {
            warn!(tenant_id = %tenant.id, "Login rejected");
            return Err(AppError::InvalidCredentials);
        }

        if !tenant.is_active() {
            return Err(AppError::TenantInactive);
        }

        let token = issue_token(&GatewayClaims::session(tenant.id), &self.secret, self.session_ttl_secs)?;

        self.audit
            .record(tenant.id, &Actor::tenant(tenant.id), actions::TENANT_LOGIN, None, None)
            .await;

        Ok(Session {
            token,
            token_type: "Bearer",
            expires_in: self.session_ttl_secs,
            tenant_id: tenant.id,
        })
    }

    /// Resolve a session token to its active tenant
    pub async fn authenticate_session(&self, token: &str) -> Result<Tenant> {
        let verified = verify_token::<GatewayClaims>(token, &self.secret).ok_or(AppError::TokenInvalid)?;
        if verified.claims.scope != TokenScope::Session {
            return Err(AppError::TokenInvalid);
        }

        let tenant = self
            .store
            .find_tenant(verified.claims.sub)
            .await?
            .ok_or(AppError::TokenInvalid)?;

        if !tenant.is_active() {
            return Err(AppError::TenantInactive);
        }
        Ok(tenant)
    }

    pub async fn get(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        self.store.find_tenant(tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::InMemoryStore;

    fn service() -> (TenantService, InMemoryStore) {
        let store = InMemoryStore::new();
        let clock: Arc<dyn Clock> = Arc::new(MockClock::default());
        let audit = AuditRecorder::new(Arc::new(store.clone()), clock.clone());
        let secret = TokenSecret::new("tenant-test-secret-0123456789abcdef").unwrap();
        let service = TenantService::new(Arc::new(store.clone()), secret, 3600, audit, clock);
        (service, store)
    }

    #[tokio::test]
    async fn test_signup_hashes_password() {
        let (service, _) = service();
        let tenant = service.signup("Acme", " Ops@Acme.io ", "correct horse").await.unwrap();
        assert_eq!(tenant.email, "ops@acme.io");
        assert_ne!(tenant.password_hash, "correct horse");
        assert!(tenant.password_hash.starts_with("$argon2id$"));
        assert_eq!(tenant.plan_tier(), PlanTier::Free);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (service, _) = service();
        service.signup("Acme", "ops@acme.io", "pw-123456").await.unwrap();
        let err = service.signup("Acme 2", "OPS@acme.io", "pw-123456").await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_login_and_session() {
        let (service, _) = service();
        let tenant = service.signup("Acme", "ops@acme.io", "pw-123456").await.unwrap();

        let session = service.login("ops@acme.io", "pw-123456").await.unwrap();
        assert_eq!(session.tenant_id, tenant.id);

        let resolved = service.authenticate_session(&session.token).await.unwrap();
        assert_eq!(resolved.id, tenant.id);
    }

    #[tokio::test]
    async fn test_login_failures_are_uniform() {
        let (service, _) = service();
        service.signup("Acme", "ops@acme.io", "pw-123456").await.unwrap();

        let wrong_pw = service.login("ops@acme.io", "nope").await.unwrap_err();
        let unknown = service.login("nobody@acme.io", "pw-123456").await.unwrap_err();
        assert!(matches!(wrong_pw, AppError::InvalidCredentials));
        assert!(matches!(unknown, AppError::InvalidCredentials));
        assert_eq!(wrong_pw.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_upstream_token_is_not_a_session() {
        let (service, _) = service();
        let tenant = service.signup("Acme", "ops@acme.io", "pw-123456").await.unwrap();
        let secret = TokenSecret::new("tenant-test-secret-0123456789abcdef").unwrap();
        let token = issue_token(&GatewayClaims::upstream(tenant.id, Uuid::new_v4()), &secret, 60).unwrap();

        assert!(matches!(
            service.authenticate_session(&token).await,
            Err(AppError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_config_plan_limits() {
        let (service, store) = service();
        let tenant = service.signup("Acme", "ops@acme.io", "pw-123456").await.unwrap();
        let limits = ConfigPlanLimits::new(Arc::new(store), PlansConfig::default());

        let quota = limits.limits(tenant.id).await.unwrap();
        assert_eq!(quota.requests_per_window, PlansConfig::default().free.requests_per_window);
        assert!(limits.limits(Uuid::new_v4()).await.is_err());
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(PlanTier::from("enterprise".to_string()), PlanTier::Enterprise);
        assert_eq!(String::from(TenantStatus::Deleted), "deleted");
        assert_eq!(TenantStatus::from("unknown".to_string()), TenantStatus::Suspended);
    }
}
