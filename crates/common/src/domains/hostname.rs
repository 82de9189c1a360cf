//! Hostname normalization and validation for custom domains

use rand::RngCore;
use regex_lite::Regex;
use std::net::IpAddr;
use std::sync::OnceLock;

use crate::errors::{AppError, Result};

const MIN_LEN: usize = 4;
const MAX_LEN: usize = 253;

/// Reserved or non-public suffixes that can never be verified
const DENIED_SUFFIXES: &[&str] = &[
    "localhost",
    "local",
    "internal",
    "localdomain",
    "test",
    "invalid",
    "arpa",
    // Wildcard DNS services that map names onto arbitrary IPs
    "nip.io",
    "sslip.io",
    "xip.io",
];

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
            .unwrap_or_else(|e| unreachable!("hostname pattern is valid: {e}"))
    })
}

/// Canonical form: trimmed, lowercased, without scheme or trailing
/// slashes or root dot.
pub fn normalize(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let without_scheme = match lowered.find("://") {
        Some(idx) => &lowered[idx + 3..],
        None => lowered.as_str(),
    };
    without_scheme
        .trim_end_matches('/')
        .trim_end_matches('.')
        .trim()
        .to_string()
}

fn rejected(message: impl Into<String>) -> AppError {
    AppError::DomainValidationFailed {
        message: message.into(),
    }
}

fn is_under(hostname: &str, suffix: &str) -> bool {
    hostname == suffix
        || hostname
            .strip_suffix(suffix)
            .is_some_and(|rest| rest.ends_with('.'))
}

/// Validate an already-normalized hostname.
pub fn validate(hostname: &str, platform_domains: &[String]) -> Result<()> {
    if hostname.len() < MIN_LEN || hostname.len() > MAX_LEN {
        return Err(rejected(format!(
            "hostname must be between {MIN_LEN} and {MAX_LEN} characters"
        )));
    }

    let bare = hostname.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return Err(rejected("IP addresses cannot be registered as custom domains"));
    }

    if let Some(suffix) = DENIED_SUFFIXES.iter().find(|s| is_under(hostname, s)) {
        return Err(rejected(format!(
            "hostnames under '{suffix}' cannot be registered"
        )));
    }

    if let Some(platform) = platform_domains
        .iter()
        .map(|p| p.trim().to_lowercase())
        .find(|p| !p.is_empty() && is_under(hostname, p))
    {
        return Err(rejected(format!(
            "hostnames under the platform domain '{platform}' cannot be registered"
        )));
    }

    if !hostname_pattern().is_match(hostname) {
        return Err(rejected(format!("'{hostname}' is not a valid hostname")));
    }

    Ok(())
}

/// Normalize then validate, returning the canonical hostname
pub fn normalize_and_validate(input: &str, platform_domains: &[String]) -> Result<String> {
    let hostname = normalize(input);
    validate(&hostname, platform_domains)?;
    Ok(hostname)
}

/// Name of the TXT record a tenant publishes to prove ownership
pub fn txt_record_name(product_name: &str, hostname: &str) -> String {
    format!("_{}-verification.{}", product_name.to_lowercase(), hostname)
}

/// Random token published in the TXT record
pub fn generate_verification_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("rg-verify-{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> Vec<String> {
        vec!["relaygate.io".to_string()]
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("HTTPS://Example.com///"), "example.com");
        assert_eq!(normalize("  docs.Example.COM  "), "docs.example.com");
        assert_eq!(normalize("http://blog.example.org/"), "blog.example.org");
        assert_eq!(normalize("example.com."), "example.com");
    }

    #[test]
    fn test_accepts_public_hostnames() {
        for host in ["example.com", "docs.example.com", "my-site.co.uk", "a1.b2.example.dev"] {
            assert!(validate(host, &platform()).is_ok(), "{host} should be valid");
        }
    }

    #[test]
    fn test_rejects_bad_shapes() {
        for host in ["a.b", "-bad.example.com", "bad-.example.com", "exa mple.com", "example", "ex_ample.com", "example.c0m"] {
            assert!(validate(host, &platform()).is_err(), "{host} should be rejected");
        }
        let long_label = format!("{}.com", "a".repeat(64));
        assert!(validate(&long_label, &platform()).is_err());
        let too_long = format!("{}.com", "abcdefghi.".repeat(26));
        assert!(validate(&too_long, &platform()).is_err());
    }

    #[test]
    fn test_denylist() {
        for host in [
            "localhost",
            "app.localhost",
            "printer.local",
            "db.internal",
            "127.0.0.1",
            "10.0.0.8",
            "[::1]",
            "10.0.0.1.nip.io",
        ] {
            let err = validate(host, &platform()).unwrap_err();
            assert!(matches!(err, AppError::DomainValidationFailed { .. }), "{host}");
        }
    }

    #[test]
    fn test_platform_domains_rejected() {
        assert!(validate("relaygate.io", &platform()).is_err());
        assert!(validate("tenant.relaygate.io", &platform()).is_err());
        assert!(validate("notrelaygate.io", &platform()).is_ok());
    }

    #[test]
    fn test_record_name_and_token() {
        assert_eq!(
            txt_record_name("Relaygate", "docs.example.com"),
            "_relaygate-verification.docs.example.com"
        );
        let a = generate_verification_token();
        let b = generate_verification_token();
        assert_ne!(a, b);
        assert!(a.starts_with("rg-verify-"));
        assert_eq!(a.len(), "rg-verify-".len() + 32);
    }
}
