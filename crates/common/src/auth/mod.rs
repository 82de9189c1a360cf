//! Authentication and authorization utilities
//!
//! Provides:
//! - Signed session and upstream tokens
//! - API key generation, digests and lifecycle
//! - Tenant credential resolution for proxied calls

pub mod api_key;
pub mod resolver;
pub mod token;

pub use api_key::{digest_of, looks_like_api_key, ApiKeyService, CreatedApiKey, API_KEY_PREFIX};
pub use resolver::{
    select_source, CredentialResolver, CredentialSource, ResolvedCredential, ResolverSettings, SourceKind,
};
pub use token::{extract_bearer, issue_token, verify_token, GatewayClaims, TokenScope, TokenSecret, Verified};
