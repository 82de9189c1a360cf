//! Signed, time-bounded identity tokens (HS256).
//!
//! Tokens are three base64url segments (header, payload, signature).
//! `iat` and `exp` are injected at issue time; verification collapses
//! every failure into `None` so callers cannot tell a bad signature from
//! an expired token.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// HMAC secret for token signing. Passed explicitly into every call.
#[derive(Clone)]
pub struct TokenSecret(String);

impl TokenSecret {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < 32 {
            return Err(AppError::Configuration {
                message: "token secret must be at least 32 bytes".to_string(),
            });
        }
        Ok(Self(secret))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(<redacted>)")
    }
}

/// Payload as signed: business claims plus the time bounds.
#[derive(Serialize)]
struct SignedClaims<'a, C> {
    #[serde(flatten)]
    claims: &'a C,
    iat: i64,
    exp: i64,
}

/// Claims recovered from a verified token
#[derive(Debug, Clone, Deserialize)]
pub struct Verified<C> {
    #[serde(flatten)]
    pub claims: C,
    pub iat: i64,
    pub exp: i64,
}

/// Issue a token carrying `claims`, valid for `ttl_secs` seconds.
///
/// A zero or negative TTL yields a token that is already expired.
pub fn issue_token<C: Serialize>(claims: &C, secret: &TokenSecret, ttl_secs: i64) -> Result<String> {
    let iat = Utc::now().timestamp();
    let exp = iat.checked_add(ttl_secs).ok_or_else(|| AppError::Validation {
        message: "token lifetime overflows".to_string(),
        field: Some("ttl_secs".to_string()),
    })?;

    let payload = SignedClaims { claims, iat, exp };
    encode(
        &Header::new(Algorithm::HS256),
        &payload,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal {
        message: format!("Failed to generate token: {}", e),
    })
}

/// Verify a token and return its claims, or `None` on any failure.
pub fn verify_token<C: DeserializeOwned>(token: &str, secret: &TokenSecret) -> Option<Verified<C>> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<Verified<C>>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| tracing::debug!(kind = ?e.kind(), "Token rejected"))
        .ok()?;

    let now = Utc::now().timestamp();
    let verified = data.claims;
    if verified.exp <= 0 || verified.exp <= now || verified.iat > verified.exp {
        return None;
    }

    Some(verified)
}

/// What a gateway token authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Dashboard management calls for one tenant
    Session,
    /// Proxy calls through one upstream connection
    Upstream,
}

/// Business claims carried by gateway tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayClaims {
    /// Tenant ID
    pub sub: Uuid,

    pub scope: TokenScope,

    /// Upstream connection ID (upstream scope only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<Uuid>,
}

impl GatewayClaims {
    pub fn session(tenant_id: Uuid) -> Self {
        Self {
            sub: tenant_id,
            scope: TokenScope::Session,
            cid: None,
        }
    }

    pub fn upstream(tenant_id: Uuid, connection_id: Uuid) -> Self {
        Self {
            sub: tenant_id,
            scope: TokenScope::Upstream,
            cid: Some(connection_id),
        }
    }
}

/// Extract the token from an `Authorization: Bearer` header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
