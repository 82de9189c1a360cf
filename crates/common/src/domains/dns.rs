//! TXT record lookups for domain ownership checks

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::system_conf::read_system_conf;
use trust_dns_resolver::TokioAsyncResolver;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DnsLookupError {
    #[error("DNS lookup timed out")]
    Timeout,

    #[error("DNS lookup failed: {0}")]
    Failed(String),
}

/// Resolves the TXT strings published at a name.
///
/// Strings split across several character-strings in one record are
/// joined before being returned. A name with no TXT records yields an
/// empty list, not an error.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError>;
}

/// Resolver backed by the system DNS configuration
pub struct SystemTxtResolver {
    resolver: TokioAsyncResolver,
    lookup_timeout: Duration,
}

impl SystemTxtResolver {
    pub fn new(lookup_timeout: Duration) -> Self {
        let (config, opts) = resolver_setup(lookup_timeout);
        let resolver = TokioAsyncResolver::tokio(config, opts);

        Self {
            resolver,
            lookup_timeout,
        }
    }
}

/// System nameservers when readable, Google DNS otherwise; the lookup
/// timeout and a single attempt apply either way
fn resolver_setup(lookup_timeout: Duration) -> (ResolverConfig, ResolverOpts) {
    let (config, mut opts) = read_system_conf().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load system DNS config, falling back to Google DNS");
        (ResolverConfig::google(), ResolverOpts::default())
    });
    opts.timeout = lookup_timeout;
    opts.attempts = 1;
    (config, opts)
}

#[async_trait]
impl TxtResolver for SystemTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        let lookup = match timeout(self.lookup_timeout, self.resolver.txt_lookup(name)).await {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                    debug!(name = %name, "No TXT records");
                    return Ok(Vec::new());
                }
                warn!(name = %name, error = %e, "TXT lookup failed");
                return Err(DnsLookupError::Failed(e.to_string()));
            }
            Err(_) => {
                warn!(name = %name, "TXT lookup timed out");
                return Err(DnsLookupError::Timeout);
            }
        };

        let records: Vec<String> = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>()
            })
            .collect();

        debug!(name = %name, count = records.len(), "Resolved TXT records");
        Ok(records)
    }
}

/// Fixed answers, for tests and offline development
#[derive(Clone, Default)]
pub struct StaticTxtResolver {
    records: Arc<RwLock<HashMap<String, Result<Vec<String>, DnsLookupError>>>>,
}

impl StaticTxtResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `values` at `name`, replacing earlier answers
    pub fn publish(&self, name: &str, values: Vec<String>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(name.to_lowercase(), Ok(values));
    }

    /// Make lookups for `name` fail
    pub fn fail(&self, name: &str, error: DnsLookupError) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(name.to_lowercase(), Err(error));
    }
}

#[async_trait]
impl TxtResolver for StaticTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_options_override_system_defaults() {
        let (_, opts) = resolver_setup(Duration::from_millis(1500));
        assert_eq!(opts.timeout, Duration::from_millis(1500));
        assert_eq!(opts.attempts, 1);
    }

    #[tokio::test]
    async fn test_static_resolver_answers() {
        let resolver = StaticTxtResolver::new();
        resolver.publish("_relaygate-verification.example.com", vec!["abc".into()]);

        let found = resolver
            .lookup_txt("_relaygate-verification.EXAMPLE.com")
            .await
            .unwrap();
        assert_eq!(found, vec!["abc".to_string()]);

        let missing = resolver.lookup_txt("other.example.com").await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_static_resolver_failure() {
        let resolver = StaticTxtResolver::new();
        resolver.fail("slow.example.com", DnsLookupError::Timeout);
        assert_eq!(
            resolver.lookup_txt("slow.example.com").await,
            Err(DnsLookupError::Timeout)
        );
    }
}
