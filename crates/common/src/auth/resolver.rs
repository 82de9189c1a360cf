//! Tenant credential resolution.
//!
//! Maps an incoming request to the upstream credentials it may use. The
//! candidate sources are tried in a fixed order:
//!
//! 1. inline headers (`X-Upstream-User` + `X-Upstream-Secret`)
//! 2. an API key or upstream token (`X-Api-Key` or `Authorization: Bearer`)
//! 3. the configured single-tenant fallback, only if nothing was presented
//!
//! Once an identity is presented, any failure is `InvalidCredentials`
//! with the same message whatever stage failed; there is no silent
//! fallback past a bad credential.

use axum::http::{header, HeaderMap};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::api_key::{digest_of, looks_like_api_key};
use crate::auth::token::{extract_bearer, verify_token, GatewayClaims, TokenScope, TokenSecret};
use crate::clock::Clock;
use crate::config::{FallbackCredentialConfig, SecurityConfig};
use crate::connections::{normalize_base_url, open_secrets};
use crate::crypto::MasterKey;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::store::{ApiKeyStore, ConnectionStore, TenantStore};

pub const HEADER_UPSTREAM_USER: &str = "x-upstream-user";
pub const HEADER_UPSTREAM_SECRET: &str = "x-upstream-secret";
pub const HEADER_UPSTREAM_URL: &str = "x-upstream-url";
pub const HEADER_API_KEY: &str = "x-api-key";

/// Where a credential came from, in precedence order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Inline,
    ApiKey,
    Bearer,
    Fallback,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Inline => "inline",
            SourceKind::ApiKey => "api_key",
            SourceKind::Bearer => "bearer",
            SourceKind::Fallback => "fallback",
        }
    }
}

/// A credential candidate found on a request
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Inline {
        base_url: Option<String>,
        identity: String,
        secret: String,
    },
    ApiKey(String),
    Bearer(String),
    Fallback,
}

impl CredentialSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            CredentialSource::Inline { .. } => SourceKind::Inline,
            CredentialSource::ApiKey(_) => SourceKind::ApiKey,
            CredentialSource::Bearer(_) => SourceKind::Bearer,
            CredentialSource::Fallback => SourceKind::Fallback,
        }
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialSource::{}", self.kind().as_str())
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Pick the highest-precedence credential present on a request.
///
/// `Fallback` is returned only when nothing was presented at all; whether
/// a fallback is configured is the resolver's concern.
pub fn select_source(headers: &HeaderMap) -> CredentialSource {
    let user = header_value(headers, HEADER_UPSTREAM_USER);
    let secret = header_value(headers, HEADER_UPSTREAM_SECRET);
    if let (Some(identity), Some(secret)) = (user, secret) {
        return CredentialSource::Inline {
            base_url: header_value(headers, HEADER_UPSTREAM_URL).map(str::to_string),
            identity: identity.to_string(),
            secret: secret.to_string(),
        };
    }

    if let Some(key) = header_value(headers, HEADER_API_KEY) {
        return CredentialSource::ApiKey(key.to_string());
    }

    if let Some(presented) = header_value(headers, header::AUTHORIZATION.as_str()) {
        return match extract_bearer(presented) {
            Some(value) if looks_like_api_key(value) => CredentialSource::ApiKey(value.to_string()),
            Some(value) => CredentialSource::Bearer(value.to_string()),
            // A non-bearer Authorization header is still a presented identity
            None => CredentialSource::Bearer(String::new()),
        };
    }

    CredentialSource::Fallback
}

/// Upstream credentials for one request
#[derive(Clone)]
pub struct ResolvedCredential {
    /// Owning tenant; `None` for inline and fallback credentials
    pub tenant_id: Option<Uuid>,
    pub connection_id: Option<Uuid>,
    pub source: SourceKind,
    pub base_url: String,
    pub identity: String,
    pub secret: String,
    pub aux_secret: Option<String>,
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("tenant_id", &self.tenant_id)
            .field("connection_id", &self.connection_id)
            .field("source", &self.source)
            .field("base_url", &self.base_url)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Resolver settings taken from configuration
#[derive(Clone)]
pub struct ResolverSettings {
    pub default_base_url: Option<String>,
    pub fallback: Option<FallbackCredentialConfig>,
}

impl ResolverSettings {
    pub fn new(security: &SecurityConfig, default_base_url: Option<String>) -> Self {
        Self {
            default_base_url,
            fallback: security.fallback.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CredentialResolver {
    tenants: Arc<dyn TenantStore>,
    connections: Arc<dyn ConnectionStore>,
    api_keys: Arc<dyn ApiKeyStore>,
    master_key: MasterKey,
    token_secret: TokenSecret,
    settings: ResolverSettings,
    clock: Arc<dyn Clock>,
}

impl CredentialResolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        connections: Arc<dyn ConnectionStore>,
        api_keys: Arc<dyn ApiKeyStore>,
        master_key: MasterKey,
        token_secret: TokenSecret,
        settings: ResolverSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tenants,
            connections,
            api_keys,
            master_key,
            token_secret,
            settings,
            clock,
        }
    }

    /// Resolve the credentials a request may use upstream
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<ResolvedCredential> {
        let source = select_source(headers);
        let kind = source.kind();

        let result = match source {
            CredentialSource::Inline {
                base_url,
                identity,
                secret,
            } => self.resolve_inline(base_url, identity, secret),
            CredentialSource::ApiKey(key) => self.resolve_api_key(&key).await,
            CredentialSource::Bearer(token) => self.resolve_bearer(&token).await,
            CredentialSource::Fallback => self.resolve_fallback(),
        };

        metrics::record_credential_resolution(kind.as_str(), result.is_ok());
        match &result {
            Ok(resolved) => debug!(
                source = kind.as_str(),
                tenant_id = ?resolved.tenant_id,
                connection_id = ?resolved.connection_id,
                "Credential resolved"
            ),
            Err(e) => debug!(source = kind.as_str(), error = %e, "Credential rejected"),
        }
        result
    }

    fn resolve_inline(
        &self,
        base_url: Option<String>,
        identity: String,
        secret: String,
    ) -> Result<ResolvedCredential> {
        let base_url = base_url
            .or_else(|| self.settings.default_base_url.clone())
            .ok_or(AppError::InvalidCredentials)?;
        let base_url = normalize_base_url(&base_url).map_err(|_| AppError::InvalidCredentials)?;

        Ok(ResolvedCredential {
            tenant_id: None,
            connection_id: None,
            source: SourceKind::Inline,
            base_url,
            identity,
            secret,
            aux_secret: None,
        })
    }

    async fn resolve_api_key(&self, key: &str) -> Result<ResolvedCredential> {
        let record = self
            .api_keys
            .find_api_key_by_digest(&digest_of(key))
            .await?
            .filter(|k| k.is_active())
            .ok_or(AppError::InvalidCredentials)?;

        let resolved = self
            .resolve_connection(record.tenant_id, record.connection_id, SourceKind::ApiKey)
            .await?;

        if let Err(e) = self.api_keys.touch_api_key(record.id, self.clock.now()).await {
            warn!(key_id = %record.id, error = %e, "Failed to update API key last_used_at");
        }

        Ok(resolved)
    }

    async fn resolve_bearer(&self, token: &str) -> Result<ResolvedCredential> {
        let verified = verify_token::<GatewayClaims>(token, &self.token_secret)
            .ok_or(AppError::InvalidCredentials)?;
        if verified.claims.scope != TokenScope::Upstream {
            return Err(AppError::InvalidCredentials);
        }
        let connection_id = verified.claims.cid.ok_or(AppError::InvalidCredentials)?;

        self.resolve_connection(verified.claims.sub, connection_id, SourceKind::Bearer)
            .await
    }

    fn resolve_fallback(&self) -> Result<ResolvedCredential> {
        let fallback = self.settings.fallback.as_ref().ok_or(AppError::NoCredentials)?;
        Ok(ResolvedCredential {
            tenant_id: None,
            connection_id: None,
            source: SourceKind::Fallback,
            base_url: fallback.base_url.trim_end_matches('/').to_string(),
            identity: fallback.identity.clone(),
            secret: fallback.secret.clone(),
            aux_secret: None,
        })
    }

    /// Load tenant and connection and decrypt. Any failure past this point
    /// is reported as `InvalidCredentials`; store outages still surface.
    async fn resolve_connection(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
        source: SourceKind,
    ) -> Result<ResolvedCredential> {
        let tenant = self
            .tenants
            .find_tenant(tenant_id)
            .await?
            .filter(|t| t.is_active())
            .ok_or(AppError::InvalidCredentials)?;

        let connection = self
            .connections
            .find_connection(tenant.id, connection_id)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        let opened = open_secrets(&connection, &self.master_key).map_err(|e| {
            warn!(connection_id = %connection.id, error = %e, "Stored upstream secret could not be opened");
            AppError::InvalidCredentials
        })?;

        Ok(ResolvedCredential {
            tenant_id: Some(tenant.id),
            connection_id: Some(connection.id),
            source,
            base_url: connection.base_url,
            identity: connection.identity,
            secret: opened.secret,
            aux_secret: opened.aux_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditRecorder;
    use crate::auth::api_key::ApiKeyService;
    use crate::auth::token::issue_token;
    use crate::clock::MockClock;
    use crate::crypto::encrypt;
    use crate::db::models::{Tenant, UpstreamConnection};
    use crate::tenants::{PlanTier, TenantStatus};
    use crate::store::InMemoryStore;
    use axum::http::HeaderValue;

    const SECRET: &str = "resolver-test-secret-0123456789abcdef";

    struct Fixture {
        resolver: CredentialResolver,
        store: InMemoryStore,
        keys: ApiKeyService,
        tenant_id: Uuid,
        connection_id: Uuid,
        master_key: MasterKey,
    }

    async fn fixture(fallback: Option<FallbackCredentialConfig>) -> Fixture {
        let store = InMemoryStore::new();
        let clock: Arc<dyn Clock> = Arc::new(MockClock::default());
        let master_key = MasterKey::generate();
        let now = clock.now();

        let tenant_id = Uuid::new_v4();
        store
            .insert_tenant(Tenant {
                id: tenant_id,
                name: "Acme".into(),
                email: "ops@acme.io".into(),
                password_hash: "unused".into(),
                plan: PlanTier::Pro.into(),
                status: TenantStatus::Active.into(),
                created_at: now.into(),
                updated_at: now.into(),
            })
            .await
            .unwrap();

        let connection_id = Uuid::new_v4();
        store
            .insert_connection(UpstreamConnection {
                id: connection_id,
                tenant_id,
                name: "blog".into(),
                base_url: "https://blog.acme.io".into(),
                identity: "editor".into(),
                secret_ciphertext: encrypt("stored-secret", &master_key).unwrap(),
                aux_secret_ciphertext: None,
                created_at: now.into(),
                updated_at: now.into(),
            })
            .await
            .unwrap();

        let resolver = CredentialResolver::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            master_key.clone(),
            TokenSecret::new(SECRET).unwrap(),
            ResolverSettings {
                default_base_url: Some("https://default.example.com".into()),
                fallback,
            },
            clock.clone(),
        );
        let audit = AuditRecorder::new(Arc::new(store.clone()), clock.clone());
        let keys = ApiKeyService::new(Arc::new(store.clone()), Arc::new(store.clone()), audit, clock);

        Fixture {
            resolver,
            store,
            keys,
            tenant_id,
            connection_id,
            master_key,
        }
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn fallback() -> FallbackCredentialConfig {
        FallbackCredentialConfig {
            base_url: "https://single.example.com/".into(),
            identity: "solo".into(),
            secret: "solo-secret".into(),
        }
    }

    #[test]
    fn test_source_precedence() {
        let all = headers(&[
            ("x-upstream-user", "u"),
            ("x-upstream-secret", "s"),
            ("x-api-key", "rgk_abc"),
            ("authorization", "Bearer tok"),
        ]);
        assert_eq!(select_source(&all).kind(), SourceKind::Inline);

        let half_inline = headers(&[("x-upstream-user", "u"), ("x-api-key", "rgk_abc")]);
        assert_eq!(select_source(&half_inline).kind(), SourceKind::ApiKey);

        let bearer_key = headers(&[("authorization", "Bearer rgk_abc")]);
        assert_eq!(select_source(&bearer_key), CredentialSource::ApiKey("rgk_abc".into()));

        let bearer = headers(&[("authorization", "Bearer eyJ.x.y")]);
        assert_eq!(select_source(&bearer).kind(), SourceKind::Bearer);

        assert_eq!(select_source(&HeaderMap::new()), CredentialSource::Fallback);
        assert!(SourceKind::Inline < SourceKind::ApiKey && SourceKind::Bearer < SourceKind::Fallback);
    }

    #[tokio::test]
    async fn test_inline_uses_default_base_url() {
        let f = fixture(None).await;
        let resolved = f
            .resolver
            .resolve(&headers(&[("x-upstream-user", "alice"), ("x-upstream-secret", "pw")]))
            .await
            .unwrap();
        assert_eq!(resolved.source, SourceKind::Inline);
        assert_eq!(resolved.base_url, "https://default.example.com");
        assert_eq!(resolved.identity, "alice");
        assert!(resolved.tenant_id.is_none());
    }

    #[tokio::test]
    async fn test_api_key_resolves_connection() {
        let f = fixture(None).await;
        let created = f.keys.create(f.tenant_id, f.connection_id, "ci").await.unwrap();

        let resolved = f
            .resolver
            .resolve(&headers(&[("x-api-key", created.plaintext.as_str())]))
            .await
            .unwrap();
        assert_eq!(resolved.tenant_id, Some(f.tenant_id));
        assert_eq!(resolved.connection_id, Some(f.connection_id));
        assert_eq!(resolved.secret, "stored-secret");

        let touched = f
            .store
            .find_api_key_by_digest(&digest_of(&created.plaintext))
            .await
            .unwrap()
            .unwrap();
        assert!(touched.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_upstream_token_resolves_connection() {
        let f = fixture(None).await;
        let secret = TokenSecret::new(SECRET).unwrap();
        let token = issue_token(&GatewayClaims::upstream(f.tenant_id, f.connection_id), &secret, 60).unwrap();

        let resolved = f
            .resolver
            .resolve(&headers(&[("authorization", format!("Bearer {token}").as_str())]))
            .await
            .unwrap();
        assert_eq!(resolved.source, SourceKind::Bearer);
        assert_eq!(resolved.connection_id, Some(f.connection_id));
    }

    #[tokio::test]
    async fn test_failures_are_uniform_and_never_fall_back() {
        let f = fixture(Some(fallback())).await;
        let secret = TokenSecret::new(SECRET).unwrap();
        let created = f.keys.create(f.tenant_id, f.connection_id, "ci").await.unwrap();
        f.keys.revoke(f.tenant_id, created.key.id).await.unwrap();

        let session = issue_token(&GatewayClaims::session(f.tenant_id), &secret, 60).unwrap();
        let foreign = issue_token(
            &GatewayClaims::upstream(f.tenant_id, Uuid::new_v4()),
            &secret,
            60,
        )
        .unwrap();

        let cases = vec![
            headers(&[("x-api-key", "rgk_0000")]),
            headers(&[("x-api-key", created.plaintext.as_str())]),
            headers(&[("authorization", "Bearer not-a-token")]),
            headers(&[("authorization", format!("Bearer {session}").as_str())]),
            headers(&[("authorization", format!("Bearer {foreign}").as_str())]),
            headers(&[("authorization", "Basic dXNlcjpwdw==")]),
        ];

        let mut messages = Vec::new();
        for case in cases {
            let err = f.resolver.resolve(&case).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidCredentials), "got {err:?}");
            messages.push(err.to_string());
        }
        messages.dedup();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_undecryptable_secret_is_invalid_credentials() {
        let f = fixture(None).await;
        let other_key = MasterKey::generate();
        assert_ne!(other_key, f.master_key);
        f.store
            .replace_connection_secret(
                f.tenant_id,
                f.connection_id,
                encrypt("x", &other_key).unwrap(),
                None,
                chrono::Utc::now(),
            )
            .await
            .unwrap();

        let created = f.keys.create(f.tenant_id, f.connection_id, "ci").await.unwrap();
        let err = f
            .resolver
            .resolve(&headers(&[("x-api-key", created.plaintext.as_str())]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_fallback_only_when_nothing_presented() {
        let f = fixture(Some(fallback())).await;
        let resolved = f.resolver.resolve(&HeaderMap::new()).await.unwrap();
        assert_eq!(resolved.source, SourceKind::Fallback);
        assert_eq!(resolved.base_url, "https://single.example.com");

        let none = fixture(None).await;
        assert!(matches!(
            none.resolver.resolve(&HeaderMap::new()).await,
            Err(AppError::NoCredentials)
        ));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let resolved = ResolvedCredential {
            tenant_id: None,
            connection_id: None,
            source: SourceKind::Inline,
            base_url: "https://x".into(),
            identity: "u".into(),
            secret: "hunter2".into(),
            aux_secret: Some("aux".into()),
        };
        let printed = format!("{resolved:?}");
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("aux\""));

        let source = CredentialSource::ApiKey("rgk_secret".into());
        assert!(!format!("{source:?}").contains("rgk_secret"));
    }
}
