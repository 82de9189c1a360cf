//! Domain trust state machine.
//!
//! `advance` is a pure function of the current record, one observation
//! and the current time. It never performs I/O, so the DNS lookup and the
//! certificate request can be scheduled per call or by a poller and the
//! transitions stay the same.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::span_secs;
use crate::config::DomainConfig;
use crate::db::models::CustomDomain;
use crate::domains::provisioner::ProvisionOutcome;

/// Domain lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    PendingVerification,
    PendingSsl,
    Active,
    VerificationFailed,
    Suspended,
    SslExpired,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::PendingVerification => "pending_verification",
            DomainStatus::PendingSsl => "pending_ssl",
            DomainStatus::Active => "active",
            DomainStatus::VerificationFailed => "verification_failed",
            DomainStatus::Suspended => "suspended",
            DomainStatus::SslExpired => "ssl_expired",
        }
    }

    /// No further transition except deletion
    pub fn is_terminal(&self) -> bool {
        matches!(self, DomainStatus::VerificationFailed | DomainStatus::Suspended)
    }

    /// States an explicit `verify` call may advance
    pub fn is_verifiable(&self) -> bool {
        matches!(self, DomainStatus::PendingVerification | DomainStatus::PendingSsl)
    }

    /// Ownership has been proven via DNS
    pub fn is_ownership_proven(&self) -> bool {
        matches!(self, DomainStatus::PendingSsl | DomainStatus::Active)
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for DomainStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending_verification" => DomainStatus::PendingVerification,
            "pending_ssl" => DomainStatus::PendingSsl,
            "active" => DomainStatus::Active,
            "verification_failed" => DomainStatus::VerificationFailed,
            "ssl_expired" => DomainStatus::SslExpired,
            // Unknown values are never routable
            _ => DomainStatus::Suspended,
        }
    }
}

impl From<DomainStatus> for String {
    fn from(status: DomainStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Certificate status tracked alongside the domain status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslStatus {
    None,
    Pending,
    Issued,
    Failed,
    Expired,
}

impl SslStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslStatus::None => "none",
            SslStatus::Pending => "pending",
            SslStatus::Issued => "issued",
            SslStatus::Failed => "failed",
            SslStatus::Expired => "expired",
        }
    }
}

impl From<String> for SslStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => SslStatus::Pending,
            "issued" => SslStatus::Issued,
            "failed" => SslStatus::Failed,
            "expired" => SslStatus::Expired,
            _ => SslStatus::None,
        }
    }
}

impl From<SslStatus> for String {
    fn from(status: SslStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Something learned about a domain from the outside world
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    /// TXT lookup succeeded; the list may be empty
    TxtRecords(Vec<String>),
    /// TXT lookup timed out or errored
    LookupFailed(String),
    /// Answer from the certificate provisioner
    Certificate(ProvisionOutcome),
    /// Time passed (poller sweep)
    Tick,
    /// Administrative suspension
    Suspend,
}

/// Field changes to persist for a transition.
///
/// `last_error` is doubly optional: `None` leaves it untouched,
/// `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainPatch {
    pub status: Option<DomainStatus>,
    pub ssl_status: Option<SslStatus>,
    pub verified_at: Option<DateTime<Utc>>,
    pub ssl_requested_at: Option<DateTime<Utc>>,
    pub ssl_issued_at: Option<DateTime<Utc>>,
    pub ssl_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<Option<String>>,
}

impl DomainPatch {
    pub fn is_empty(&self) -> bool {
        *self == DomainPatch::default()
    }

    /// Apply the patch to an in-memory record
    pub fn apply_to(&self, domain: &mut CustomDomain, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            domain.status = status.into();
        }
        if let Some(ssl_status) = self.ssl_status {
            domain.ssl_status = ssl_status.into();
        }
        if let Some(at) = self.verified_at {
            domain.verified_at = Some(at.into());
        }
        if let Some(at) = self.ssl_requested_at {
            domain.ssl_requested_at = Some(at.into());
        }
        if let Some(at) = self.ssl_issued_at {
            domain.ssl_issued_at = Some(at.into());
        }
        if let Some(at) = self.ssl_expires_at {
            domain.ssl_expires_at = Some(at.into());
        }
        if let Some(last_error) = &self.last_error {
            domain.last_error = last_error.clone();
        }
        domain.updated_at = now.into();
    }
}

/// Limits applied by the state machine
#[derive(Clone, Debug)]
pub struct DomainPolicy {
    /// Failed checks before `verification_failed`; 0 disables the cap
    pub max_check_attempts: i32,
    /// Maximum wait in `pending_ssl`
    pub ssl_timeout: chrono::Duration,
}

impl DomainPolicy {
    pub fn from_config(config: &DomainConfig) -> Self {
        Self {
            max_check_attempts: config.max_check_attempts,
            ssl_timeout: span_secs(config.ssl_timeout_secs),
        }
    }
}

impl Default for DomainPolicy {
    fn default() -> Self {
        Self::from_config(&DomainConfig::default())
    }
}

/// Outcome of applying one observation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: DomainStatus,
    pub to: DomainStatus,
    pub patch: DomainPatch,
    /// Whether DNS ownership is proven after this step
    pub verified: bool,
    /// Next-step guidance for the tenant
    pub message: Option<String>,
}

impl Transition {
    fn stay(domain: &CustomDomain) -> Self {
        let status = domain.domain_status();
        Self {
            from: status,
            to: status,
            patch: DomainPatch::default(),
            verified: status.is_ownership_proven(),
            message: None,
        }
    }

    fn to(domain: &CustomDomain, to: DomainStatus, mut patch: DomainPatch) -> Self {
        let from = domain.domain_status();
        patch.status = Some(to);
        Self {
            from,
            to,
            patch,
            verified: to.is_ownership_proven(),
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// True when the status itself changes
    pub fn changes_status(&self) -> bool {
        self.from != self.to
    }

    /// True when something must be persisted
    pub fn has_effect(&self) -> bool {
        !self.patch.is_empty()
    }
}

/// Guidance shown while a domain awaits its TXT record
pub fn remediation(domain: &CustomDomain) -> String {
    format!(
        "Create a DNS TXT record named '{}' with value '{}', then retry verification",
        domain.txt_record_name, domain.verification_token
    )
}

/// Compute the transition for `observation` against the current record.
///
/// `domain.check_count` must already include the attempt being evaluated.
pub fn advance(
    domain: &CustomDomain,
    observation: &Observation,
    now: DateTime<Utc>,
    policy: &DomainPolicy,
) -> Transition {
    use DomainStatus::*;

    let status = domain.domain_status();

    match (status, observation) {
        (current, Observation::Suspend) if !current.is_terminal() => Transition::to(
            domain,
            Suspended,
            DomainPatch {
                last_error: Some(Some("suspended by administrator".to_string())),
                ..Default::default()
            },
        ),

        (PendingVerification, Observation::TxtRecords(records)) => {
            let matched = records.iter().any(|r| r == &domain.verification_token);
            if matched {
                Transition::to(
                    domain,
                    PendingSsl,
                    DomainPatch {
                        ssl_status: Some(SslStatus::Pending),
                        verified_at: Some(now),
                        ssl_requested_at: Some(now),
                        last_error: Some(None),
                        ..Default::default()
                    },
                )
                .with_message("DNS ownership confirmed; provisioning certificate")
            } else {
                failed_check(domain, "no matching TXT record found", policy)
            }
        }

        (PendingVerification, Observation::LookupFailed(reason)) => {
            failed_check(domain, &format!("DNS lookup failed: {reason}"), policy)
        }

        (PendingSsl, Observation::Certificate(outcome)) => match outcome {
            ProvisionOutcome::Issued { expires_at } => Transition::to(
                domain,
                Active,
                DomainPatch {
                    ssl_status: Some(SslStatus::Issued),
                    ssl_issued_at: Some(now),
                    ssl_expires_at: Some(*expires_at),
                    last_error: Some(None),
                    ..Default::default()
                },
            )
            .with_message("Domain is active"),
            ProvisionOutcome::Pending => {
                let mut transition = Transition::stay(domain);
                if domain.certificate_status() != SslStatus::Pending {
                    transition.patch.ssl_status = Some(SslStatus::Pending);
                }
                transition.with_message("Certificate provisioning in progress")
            }
            ProvisionOutcome::Failed { reason } => {
                let mut transition = Transition::stay(domain);
                transition.patch.ssl_status = Some(SslStatus::Failed);
                transition.patch.last_error = Some(Some(reason.clone()));
                transition.with_message(format!(
                    "Certificate provisioning failed ({reason}); it will be retried"
                ))
            }
        },

        (PendingSsl, Observation::Tick) => {
            let requested = domain
                .ssl_requested_at
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or(now);
            if now - requested >= policy.ssl_timeout {
                Transition::to(
                    domain,
                    VerificationFailed,
                    DomainPatch {
                        ssl_status: Some(SslStatus::Failed),
                        last_error: Some(Some("certificate provisioning timed out".to_string())),
                        ..Default::default()
                    },
                )
            } else {
                Transition::stay(domain)
            }
        }

        (Active, Observation::Tick) => {
            let expired = domain
                .ssl_expires_at
                .map(|at| at.with_timezone(&Utc) <= now)
                .unwrap_or(false);
            if expired {
                Transition::to(
                    domain,
                    SslExpired,
                    DomainPatch {
                        ssl_status: Some(SslStatus::Expired),
                        last_error: Some(Some("certificate expired".to_string())),
                        ..Default::default()
                    },
                )
            } else {
                Transition::stay(domain)
            }
        }

        _ => Transition::stay(domain),
    }
}

fn failed_check(domain: &CustomDomain, reason: &str, policy: &DomainPolicy) -> Transition {
    if policy.max_check_attempts > 0 && domain.check_count >= policy.max_check_attempts {
        return Transition::to(
            domain,
            DomainStatus::VerificationFailed,
            DomainPatch {
                last_error: Some(Some(format!(
                    "{reason}; giving up after {} checks",
                    domain.check_count
                ))),
                ..Default::default()
            },
        )
        .with_message("Verification attempts exhausted; delete and re-add the domain");
    }

    let mut transition = Transition::stay(domain);
    transition.patch.last_error = Some(Some(reason.to_string()));
    transition.with_message(remediation(domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn domain(status: DomainStatus) -> CustomDomain {
        let now = Utc::now();
        CustomDomain {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            hostname: "docs.example.com".to_string(),
            status: status.into(),
            ssl_status: SslStatus::None.into(),
            verification_token: "token-123".to_string(),
            txt_record_name: "_relaygate-verification.docs.example.com".to_string(),
            check_count: 1,
            last_check_at: Some(now.into()),
            verified_at: None,
            ssl_requested_at: None,
            ssl_issued_at: None,
            ssl_expires_at: None,
            last_error: None,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            DomainStatus::PendingVerification,
            DomainStatus::PendingSsl,
            DomainStatus::Active,
            DomainStatus::VerificationFailed,
            DomainStatus::Suspended,
            DomainStatus::SslExpired,
        ] {
            assert_eq!(DomainStatus::from(String::from(status)), status);
        }
    }

    #[test]
    fn test_matching_record_moves_to_pending_ssl() {
        let d = domain(DomainStatus::PendingVerification);
        let t = advance(
            &d,
            &Observation::TxtRecords(vec!["other".into(), "token-123".into()]),
            Utc::now(),
            &DomainPolicy::default(),
        );
        assert_eq!(t.to, DomainStatus::PendingSsl);
        assert!(t.verified);
        assert_eq!(t.patch.ssl_status, Some(SslStatus::Pending));
    }

    #[test]
    fn test_no_match_stays_pending_with_remediation() {
        let d = domain(DomainStatus::PendingVerification);
        let t = advance(
            &d,
            &Observation::TxtRecords(vec!["token-12".into()]),
            Utc::now(),
            &DomainPolicy::default(),
        );
        assert!(!t.changes_status());
        assert!(!t.verified);
        let message = t.message.unwrap();
        assert!(message.contains("_relaygate-verification.docs.example.com"));
        assert!(message.contains("token-123"));
    }

    #[test]
    fn test_lookup_failure_is_a_failed_check() {
        let d = domain(DomainStatus::PendingVerification);
        let t = advance(
            &d,
            &Observation::LookupFailed("timeout".into()),
            Utc::now(),
            &DomainPolicy::default(),
        );
        assert_eq!(t.to, DomainStatus::PendingVerification);
        assert_eq!(t.patch.last_error, Some(Some("DNS lookup failed: timeout".into())));
    }

    #[test]
    fn test_attempt_cap_fails_domain() {
        let mut d = domain(DomainStatus::PendingVerification);
        d.check_count = 3;
        let policy = DomainPolicy {
            max_check_attempts: 3,
            ssl_timeout: Duration::hours(1),
        };
        let t = advance(&d, &Observation::TxtRecords(vec![]), Utc::now(), &policy);
        assert_eq!(t.to, DomainStatus::VerificationFailed);
    }

    #[test]
    fn test_issued_certificate_activates() {
        let d = domain(DomainStatus::PendingSsl);
        let expires = Utc::now() + Duration::days(90);
        let t = advance(
            &d,
            &Observation::Certificate(ProvisionOutcome::Issued { expires_at: expires }),
            Utc::now(),
            &DomainPolicy::default(),
        );
        assert_eq!(t.to, DomainStatus::Active);
        assert_eq!(t.patch.ssl_expires_at, Some(expires));
    }

    #[test]
    fn test_failed_certificate_keeps_waiting() {
        let d = domain(DomainStatus::PendingSsl);
        let t = advance(
            &d,
            &Observation::Certificate(ProvisionOutcome::Failed { reason: "CA rate limited".into() }),
            Utc::now(),
            &DomainPolicy::default(),
        );
        assert_eq!(t.to, DomainStatus::PendingSsl);
        assert!(t.verified);
        assert_eq!(t.patch.ssl_status, Some(SslStatus::Failed));
    }

    #[test]
    fn test_oversized_ssl_timeout_is_clamped() {
        let config = DomainConfig {
            ssl_timeout_secs: i64::MAX / 100,
            ..DomainConfig::default()
        };
        let policy = DomainPolicy::from_config(&config);
        assert_eq!(policy.ssl_timeout.num_seconds(), crate::clock::MAX_SPAN_SECS);

        let mut d = domain(DomainStatus::PendingSsl);
        d.ssl_requested_at = Some(Utc::now().into());
        let t = advance(&d, &Observation::Tick, Utc::now(), &policy);
        assert_eq!(t.to, DomainStatus::PendingSsl);
    }

    #[test]
    fn test_pending_ssl_times_out() {
        let mut d = domain(DomainStatus::PendingSsl);
        let now = Utc::now();
        d.ssl_requested_at = Some((now - Duration::hours(2)).into());
        let policy = DomainPolicy {
            max_check_attempts: 0,
            ssl_timeout: Duration::hours(1),
        };
        let t = advance(&d, &Observation::Tick, now, &policy);
        assert_eq!(t.to, DomainStatus::VerificationFailed);
    }

    #[test]
    fn test_active_certificate_expiry() {
        let mut d = domain(DomainStatus::Active);
        let now = Utc::now();
        d.ssl_expires_at = Some((now - Duration::minutes(1)).into());
        let t = advance(&d, &Observation::Tick, now, &DomainPolicy::default());
        assert_eq!(t.to, DomainStatus::SslExpired);

        d.ssl_expires_at = Some((now + Duration::days(1)).into());
        let t = advance(&d, &Observation::Tick, now, &DomainPolicy::default());
        assert!(!t.has_effect());
    }

    #[test]
    fn test_active_ignores_dns() {
        let d = domain(DomainStatus::Active);
        let t = advance(&d, &Observation::TxtRecords(vec![]), Utc::now(), &DomainPolicy::default());
        assert!(!t.has_effect());
        assert!(t.verified);
    }

    #[test]
    fn test_suspend_from_non_terminal_only() {
        for status in [
            DomainStatus::PendingVerification,
            DomainStatus::PendingSsl,
            DomainStatus::Active,
            DomainStatus::SslExpired,
        ] {
            let t = advance(&domain(status), &Observation::Suspend, Utc::now(), &DomainPolicy::default());
            assert_eq!(t.to, DomainStatus::Suspended);
        }

        let t = advance(
            &domain(DomainStatus::VerificationFailed),
            &Observation::Suspend,
            Utc::now(),
            &DomainPolicy::default(),
        );
        assert!(!t.has_effect());
    }

    #[test]
    fn test_patch_apply() {
        let mut d = domain(DomainStatus::PendingSsl);
        d.last_error = Some("old".into());
        let now = Utc::now();
        let patch = DomainPatch {
            status: Some(DomainStatus::Active),
            ssl_status: Some(SslStatus::Issued),
            last_error: Some(None),
            ..Default::default()
        };
        patch.apply_to(&mut d, now);
        assert_eq!(d.domain_status(), DomainStatus::Active);
        assert_eq!(d.certificate_status(), SslStatus::Issued);
        assert!(d.last_error.is_none());
    }
}
