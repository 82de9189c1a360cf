//! Configuration management for Relaygate services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::tenants::PlanTier;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration
    pub redis: RedisConfig,

    /// Key material and token lifetimes
    pub security: SecurityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-plan quotas
    #[serde(default)]
    pub plans: PlansConfig,

    /// Custom domain configuration
    #[serde(default)]
    pub domains: DomainConfig,

    /// Upstream (wrapped API) configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Audit retention
    #[serde(default)]
    pub audit: AuditConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Run embedded migrations at startup
    #[serde(default = "default_enabled")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// 256-bit master key for secrets at rest (base64 or hex)
    pub master_key: String,

    /// HMAC secret for signed tokens
    pub token_secret: String,

    /// Dashboard session token lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,

    /// Upstream-scoped token lifetime in seconds
    #[serde(default = "default_upstream_token_ttl")]
    pub upstream_token_ttl_secs: i64,

    /// Single-tenant fallback credential set
    #[serde(default)]
    pub fallback: Option<FallbackCredentialConfig>,

    /// Operator bearer token for `/admin` routes; unset disables them
    #[serde(default)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FallbackCredentialConfig {
    pub base_url: String,
    pub identity: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Enable per-tenant fixed-window accounting
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Window applied to unauthenticated (inline/fallback) callers
    #[serde(default = "default_anonymous_limit")]
    pub anonymous_requests_per_window: u64,

    /// Process-wide burst guard, requests per second
    #[serde(default = "default_global_rps")]
    pub global_requests_per_second: u32,

    /// Process-wide burst capacity
    #[serde(default = "default_burst")]
    pub global_burst: u32,

    /// Allow requests through when the counter store is unreachable
    #[serde(default = "default_enabled")]
    pub fail_open: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanQuota {
    pub requests_per_window: u64,
    pub window_secs: u64,
    pub max_connections: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlansConfig {
    #[serde(default = "default_free_plan")]
    pub free: PlanQuota,
    #[serde(default = "default_pro_plan")]
    pub pro: PlanQuota,
    #[serde(default = "default_enterprise_plan")]
    pub enterprise: PlanQuota,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomainConfig {
    /// Product label used in `_<product>-verification.<hostname>`
    #[serde(default = "default_product_name")]
    pub product_name: String,

    /// Platform-owned base domains tenants may never claim
    #[serde(default = "default_platform_domains")]
    pub platform_domains: Vec<String>,

    /// DNS lookup timeout in seconds
    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_secs: u64,

    /// Failed checks before a domain is marked verification_failed
    #[serde(default = "default_max_check_attempts")]
    pub max_check_attempts: i32,

    /// Seconds a domain may wait in pending_ssl before failing
    #[serde(default = "default_ssl_timeout")]
    pub ssl_timeout_secs: i64,

    /// Interval of the SSL poller in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Validity of certificates issued by the built-in provisioner
    #[serde(default = "default_cert_validity_days")]
    pub certificate_validity_days: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL used for inline credentials without X-Upstream-Url
    pub default_base_url: Option<String>,

    /// Upstream request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Entries older than this are purged
    #[serde(default = "default_audit_retention")]
    pub retention_days: i64,

    /// Interval of the purge job in seconds
    #[serde(default = "default_audit_purge_interval")]
    pub purge_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_key_prefix() -> String { "relaygate".to_string() }
fn default_session_ttl() -> i64 { 3600 }
fn default_upstream_token_ttl() -> i64 { 86_400 }
fn default_anonymous_limit() -> u64 { 60 }
fn default_global_rps() -> u32 { 500 }
fn default_burst() -> u32 { 1000 }
fn default_product_name() -> String { "relaygate".to_string() }
fn default_platform_domains() -> Vec<String> { vec!["relaygate.io".to_string()] }
fn default_dns_timeout() -> u64 { 5 }
fn default_max_check_attempts() -> i32 { 100 }
fn default_ssl_timeout() -> i64 { 86_400 }
fn default_poll_interval() -> u64 { 60 }
fn default_cert_validity_days() -> i64 { 90 }
fn default_audit_retention() -> i64 { 365 }
fn default_audit_purge_interval() -> u64 { 3600 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "relaygate".to_string() }
fn default_enabled() -> bool { true }

fn default_free_plan() -> PlanQuota {
    PlanQuota { requests_per_window: 100, window_secs: 60, max_connections: 1 }
}
fn default_pro_plan() -> PlanQuota {
    PlanQuota { requests_per_window: 1_000, window_secs: 60, max_connections: 10 }
}
fn default_enterprise_plan() -> PlanQuota {
    PlanQuota { requests_per_window: 10_000, window_secs: 60, max_connections: 100 }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            anonymous_requests_per_window: default_anonymous_limit(),
            global_requests_per_second: default_global_rps(),
            global_burst: default_burst(),
            fail_open: default_enabled(),
        }
    }
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            free: default_free_plan(),
            pro: default_pro_plan(),
            enterprise: default_enterprise_plan(),
        }
    }
}

impl PlansConfig {
    /// Quota for a plan tier
    pub fn quota(&self, tier: PlanTier) -> &PlanQuota {
        match tier {
            PlanTier::Free => &self.free,
            PlanTier::Pro => &self.pro,
            PlanTier::Enterprise => &self.enterprise,
        }
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            product_name: default_product_name(),
            platform_domains: default_platform_domains(),
            dns_timeout_secs: default_dns_timeout(),
            max_check_attempts: default_max_check_attempts(),
            ssl_timeout_secs: default_ssl_timeout(),
            poll_interval_secs: default_poll_interval(),
            certificate_validity_days: default_cert_validity_days(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            default_base_url: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_audit_retention(),
            purge_interval_secs: default_audit_purge_interval(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SECURITY__MASTER_KEY=...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/relaygate".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                run_migrations: default_enabled(),
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                key_prefix: default_key_prefix(),
            },
            security: SecurityConfig {
                master_key: String::new(),
                token_secret: String::new(),
                session_ttl_secs: default_session_ttl(),
                upstream_token_ttl_secs: default_upstream_token_ttl(),
                fallback: None,
                admin_token: None,
            },
            rate_limit: RateLimitConfig::default(),
            plans: PlansConfig::default(),
            domains: DomainConfig::default(),
            upstream: UpstreamConfig::default(),
            audit: AuditConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.domains.product_name, "relaygate");
        assert!(config.security.fallback.is_none());
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/relaygate");
    }

    #[test]
    fn test_plan_quotas_scale_with_tier() {
        let plans = PlansConfig::default();
        assert!(plans.quota(PlanTier::Free).requests_per_window
            < plans.quota(PlanTier::Pro).requests_per_window);
        assert!(plans.quota(PlanTier::Pro).max_connections
            < plans.quota(PlanTier::Enterprise).max_connections);
    }
}
