//! API keys: `rgk_` + 32 random bytes as hex.
//!
//! Only the SHA-256 digest is stored. The plaintext is returned once, at
//! creation.

use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::audit::{actions, Actor, AuditRecorder, ResourceRef};
use crate::clock::Clock;
use crate::db::models::{ApiKey, ApiKeyStatus};
use crate::errors::{AppError, Result};
use crate::store::{ApiKeyStore, ConnectionStore};

pub const API_KEY_PREFIX: &str = "rgk_";
const PREFIX_DISPLAY_LEN: usize = 12;

/// Freshly generated key material
#[derive(Clone)]
pub struct GeneratedKey {
    pub plaintext: String,
    pub digest: String,
    pub prefix: String,
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Generate a new key
pub fn generate() -> GeneratedKey {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = format!("{API_KEY_PREFIX}{}", hex::encode(bytes));
    GeneratedKey {
        digest: digest_of(&plaintext),
        prefix: plaintext[..PREFIX_DISPLAY_LEN].to_string(),
        plaintext,
    }
}

/// Hex SHA-256 of a key, as stored
pub fn digest_of(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether a presented credential is an API key rather than a token
pub fn looks_like_api_key(value: &str) -> bool {
    value.starts_with(API_KEY_PREFIX)
}

/// Creation response; the only place the plaintext appears
#[derive(Debug, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub key: ApiKey,
    pub plaintext: String,
}

#[derive(Clone)]
pub struct ApiKeyService {
    keys: Arc<dyn ApiKeyStore>,
    connections: Arc<dyn ConnectionStore>,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
}

impl ApiKeyService {
    pub fn new(
        keys: Arc<dyn ApiKeyStore>,
        connections: Arc<dyn ConnectionStore>,
        audit: AuditRecorder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys,
            connections,
            audit,
            clock,
        }
    }

    /// Create a key bound to one of the tenant's connections
    pub async fn create(&self, tenant_id: Uuid, connection_id: Uuid, name: &str) -> Result<CreatedApiKey> {
        if self.connections.find_connection(tenant_id, connection_id).await?.is_none() {
            return Err(AppError::ConnectionNotFound {
                id: connection_id.to_string(),
            });
        }

        let generated = generate();
        let key = ApiKey {
            id: Uuid::new_v4(),
            tenant_id,
            connection_id,
            name: name.trim().to_string(),
            key_digest: generated.digest,
            key_prefix: generated.prefix,
            status: ApiKeyStatus::Active.into(),
            last_used_at: None,
            revoked_at: None,
            created_at: self.clock.now().into(),
        };

        let key = self.keys.insert_api_key(key).await?;
        info!(tenant_id = %tenant_id, key_id = %key.id, prefix = %key.key_prefix, "API key created");

        self.audit
            .record(
                tenant_id,
                &Actor::tenant(tenant_id),
                actions::API_KEY_CREATE,
                Some(ResourceRef::new("api_key", key.id)),
                Some(serde_json::json!({ "connection_id": connection_id, "prefix": key.key_prefix })),
            )
            .await;

        Ok(CreatedApiKey {
            key,
            plaintext: generated.plaintext,
        })
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>> {
        self.keys.list_api_keys(tenant_id).await
    }

    /// Revoke a key. Revoking twice is a no-op.
    pub async fn revoke(&self, tenant_id: Uuid, id: Uuid) -> Result<ApiKey> {
        let key = self
            .keys
            .revoke_api_key(tenant_id, id, self.clock.now())
            .await?
            .ok_or_else(|| AppError::ApiKeyNotFound { id: id.to_string() })?;

        info!(tenant_id = %tenant_id, key_id = %id, "API key revoked");
        self.audit
            .record(
                tenant_id,
                &Actor::tenant(tenant_id),
                actions::API_KEY_REVOKE,
                Some(ResourceRef::new("api_key", id)),
                None,
            )
            .await;

        Ok(key)
    }
}
