//! Custom domain lifecycle: registration, ownership verification,
//! certificate polling and administrative suspension.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::dns::TxtResolver;
use super::hostname::{generate_verification_token, normalize_and_validate, txt_record_name};
use super::provisioner::CertificateProvisioner;
use super::state::{advance, remediation, DomainPolicy, DomainStatus, Observation, SslStatus, Transition};
use crate::audit::{actions, Actor, AuditRecorder, ResourceRef};
use crate::clock::Clock;
use crate::config::DomainConfig;
use crate::db::models::CustomDomain;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::store::DomainStore;

const POLL_BATCH: u64 = 100;

#[derive(Clone, Debug)]
pub struct DomainSettings {
    pub product_name: String,
    pub platform_domains: Vec<String>,
    pub policy: DomainPolicy,
}

impl DomainSettings {
    pub fn from_config(config: &DomainConfig) -> Self {
        Self {
            product_name: config.product_name.clone(),
            platform_domains: config.platform_domains.clone(),
            policy: DomainPolicy::from_config(config),
        }
    }
}

/// Result of a `verify` call. A failed check is an outcome, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub domain_id: Uuid,
    pub hostname: String,
    pub verified: bool,
    pub status: DomainStatus,
    pub ssl_status: SslStatus,
    pub check_count: i32,
    pub last_check_at: Option<DateTime<Utc>>,
    pub record_name: String,
    pub record_value: String,
    pub message: Option<String>,
}

impl VerificationOutcome {
    fn from_domain(domain: &CustomDomain, message: Option<String>) -> Self {
        let status = domain.domain_status();
        Self {
            domain_id: domain.id,
            hostname: domain.hostname.clone(),
            verified: status.is_ownership_proven(),
            status,
            ssl_status: domain.certificate_status(),
            check_count: domain.check_count,
            last_check_at: domain.last_check_at.map(|at| at.with_timezone(&Utc)),
            record_name: domain.txt_record_name.clone(),
            record_value: domain.verification_token.clone(),
            message,
        }
    }

    /// Turn an unproven outcome into `DnsVerificationFailed`, carrying the
    /// DNS instructions as remediation
    pub fn into_result(self) -> Result<Self> {
        if self.verified {
            return Ok(self);
        }
        let remediation = self.message.unwrap_or_else(|| {
            format!(
                "Publish a TXT record at {} with value {}",
                self.record_name, self.record_value
            )
        });
        Err(AppError::DnsVerificationFailed { remediation })
    }
}

/// Counts from one poller sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub activated: u32,
    pub still_pending: u32,
    pub timed_out: u32,
    pub expired: u32,
    pub errors: u32,
}

#[derive(Clone)]
pub struct DomainService {
    store: Arc<dyn DomainStore>,
    resolver: Arc<dyn TxtResolver>,
    provisioner: Arc<dyn CertificateProvisioner>,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
    settings: DomainSettings,
}

impl DomainService {
    pub fn new(
        store: Arc<dyn DomainStore>,
        resolver: Arc<dyn TxtResolver>,
        provisioner: Arc<dyn CertificateProvisioner>,
        audit: AuditRecorder,
        clock: Arc<dyn Clock>,
        settings: DomainSettings,
    ) -> Self {
        Self {
            store,
            resolver,
            provisioner,
            audit,
            clock,
            settings,
        }
    }

    /// Register a hostname for a tenant in `pending_verification`
    pub async fn create(&self, tenant_id: Uuid, raw_hostname: &str) -> Result<CustomDomain> {
        let hostname = normalize_and_validate(raw_hostname, &self.settings.platform_domains)?;

        if self.store.find_domain_by_hostname(&hostname).await?.is_some() {
            return Err(AppError::DomainAlreadyRegistered { hostname });
        }

        let now = self.clock.now();
        let domain = CustomDomain {
            id: Uuid::new_v4(),
            tenant_id,
            txt_record_name: txt_record_name(&self.settings.product_name, &hostname),
            hostname,
            status: DomainStatus::PendingVerification.into(),
            ssl_status: SslStatus::None.into(),
            verification_token: generate_verification_token(),
            check_count: 0,
            last_check_at: None,
            verified_at: None,
            ssl_requested_at: None,
            ssl_issued_at: None,
            ssl_expires_at: None,
            last_error: None,
            created_at: now.into(),
            updated_at: now.into(),
        };

        let domain = self.store.insert_domain(domain).await?;
        info!(tenant_id = %tenant_id, domain_id = %domain.id, hostname = %domain.hostname, "Custom domain registered");

        self.audit
            .record(
                tenant_id,
                &Actor::tenant(tenant_id),
                actions::DOMAIN_CREATE,
                Some(ResourceRef::new("domain", domain.id)),
                Some(serde_json::json!({ "hostname": domain.hostname })),
            )
            .await;

        Ok(domain)
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<CustomDomain> {
        self.store
            .find_domain(tenant_id, id)
            .await?
            .ok_or_else(|| AppError::DomainNotFound { id: id.to_string() })
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<CustomDomain>> {
        self.store.list_domains(tenant_id).await
    }

    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<()> {
        if !self.store.delete_domain(tenant_id, id).await? {
            return Err(AppError::DomainNotFound { id: id.to_string() });
        }

        info!(tenant_id = %tenant_id, domain_id = %id, "Custom domain deleted");
        self.audit
            .record(
                tenant_id,
                &Actor::tenant(tenant_id),
                actions::DOMAIN_DELETE,
                Some(ResourceRef::new("domain", id)),
                None,
            )
            .await;
        Ok(())
    }

    /// Run one verification attempt
    pub async fn verify(&self, tenant_id: Uuid, actor: &Actor, id: Uuid) -> Result<VerificationOutcome> {
        let domain = self.get(tenant_id, id).await?;
        let status = domain.domain_status();

        if status == DomainStatus::Active {
            return Ok(VerificationOutcome::from_domain(&domain, Some("Domain is active".to_string())));
        }
        if !status.is_verifiable() {
            return Err(AppError::DomainNotVerifiable {
                status: status.to_string(),
            });
        }

        let now = self.clock.now();
        let domain = self
            .store
            .record_domain_check(id, now)
            .await?
            .ok_or_else(|| AppError::DomainNotFound { id: id.to_string() })?;

        let observation = match domain.domain_status() {
            DomainStatus::PendingVerification => self.observe_dns(&domain).await,
            DomainStatus::PendingSsl => self.observe_certificate(&domain).await,
            _ => Observation::Tick,
        };

        let transition = advance(&domain, &observation, now, &self.settings.policy);
        let mut message = transition.message.clone();
        let mut domain = self.commit(domain, transition, actor).await?;

        if status == DomainStatus::PendingVerification && domain.domain_status() == DomainStatus::PendingSsl {
            let observation = self.observe_certificate(&domain).await;
            let transition = advance(&domain, &observation, self.clock.now(), &self.settings.policy);
            message = transition.message.clone().or(message);
            domain = self.commit(domain, transition, actor).await?;
        }

        let outcome = VerificationOutcome::from_domain(&domain, message);
        metrics::record_domain_verification(outcome.status.as_str(), outcome.verified);
        info!(
            tenant_id = %tenant_id,
            domain_id = %id,
            verified = outcome.verified,
            status = %outcome.status,
            check_count = outcome.check_count,
            "Domain verification attempt"
        );

        self.audit
            .record(
                tenant_id,
                actor,
                actions::DOMAIN_VERIFY,
                Some(ResourceRef::new("domain", id)),
                Some(serde_json::json!({
                    "verified": outcome.verified,
                    "status": outcome.status,
                    "check_count": outcome.check_count,
                })),
            )
            .await;

        Ok(outcome)
    }

    /// Administrative suspension from any non-terminal state
    pub async fn suspend(&self, id: Uuid) -> Result<CustomDomain> {
        let domain = self
            .store
            .find_domain_by_id(id)
            .await?
            .ok_or_else(|| AppError::DomainNotFound { id: id.to_string() })?;

        let transition = advance(&domain, &Observation::Suspend, self.clock.now(), &self.settings.policy);
        if !transition.changes_status() {
            return Err(AppError::Validation {
                message: format!("domain is already in terminal status '{}'", transition.from),
                field: Some("status".to_string()),
            });
        }

        let domain = self.commit(domain, transition, &Actor::system()).await?;
        warn!(domain_id = %id, hostname = %domain.hostname, "Custom domain suspended");
        self.audit
            .record(
                domain.tenant_id,
                &Actor::system(),
                actions::DOMAIN_SUSPEND,
                Some(ResourceRef::new("domain", id)),
                None,
            )
            .await;
        Ok(domain)
    }

    /// One sweep over waiting and active domains
    pub async fn poll_once(&self) -> Result<PollReport> {
        let mut report = PollReport::default();
        let actor = Actor::system();

        for domain in self
            .store
            .list_domains_due(DomainStatus::PendingSsl, POLL_BATCH)
            .await?
        {
            let id = domain.id;
            match self.poll_pending(domain, &actor).await {
                Ok(DomainStatus::Active) => report.activated += 1,
                Ok(DomainStatus::VerificationFailed) => report.timed_out += 1,
                Ok(_) => report.still_pending += 1,
                Err(e) => {
                    warn!(domain_id = %id, error = %e, "Certificate poll failed");
                    report.errors += 1;
                }
            }
        }

        for domain in self
            .store
            .list_expired_domains(self.clock.now(), POLL_BATCH)
            .await?
        {
            let id = domain.id;
            let transition = advance(&domain, &Observation::Tick, self.clock.now(), &self.settings.policy);
            if !transition.changes_status() {
                continue;
            }
            match self.commit(domain, transition, &actor).await {
                Ok(d) if d.domain_status() == DomainStatus::SslExpired => report.expired += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(domain_id = %id, error = %e, "Expiry sweep failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    async fn poll_pending(&self, domain: CustomDomain, actor: &Actor) -> Result<DomainStatus> {
        let timeout = advance(&domain, &Observation::Tick, self.clock.now(), &self.settings.policy);
        if timeout.changes_status() {
            let domain = self.commit(domain, timeout, actor).await?;
            return Ok(domain.domain_status());
        }

        self.store.stamp_domain_poll(domain.id, self.clock.now()).await?;
        let observation = self.observe_certificate(&domain).await;
        let transition = advance(&domain, &observation, self.clock.now(), &self.settings.policy);
        let domain = self.commit(domain, transition, actor).await?;
        Ok(domain.domain_status())
    }

    async fn observe_dns(&self, domain: &CustomDomain) -> Observation {
        match self.resolver.lookup_txt(&domain.txt_record_name).await {
            Ok(records) => Observation::TxtRecords(records),
            Err(e) => Observation::LookupFailed(e.to_string()),
        }
    }

    async fn observe_certificate(&self, domain: &CustomDomain) -> Observation {
        Observation::Certificate(self.provisioner.provision(&domain.hostname).await)
    }

    /// Persist a transition with compare-and-set on the status it was
    /// computed from. Losing the race returns the winner's record.
    async fn commit(&self, mut domain: CustomDomain, transition: Transition, actor: &Actor) -> Result<CustomDomain> {
        if !transition.has_effect() {
            return Ok(domain);
        }

        let now = self.clock.now();
        let applied = self
            .store
            .apply_domain_transition(domain.id, transition.from, &transition.patch, now)
            .await?;

        if !applied {
            return self
                .store
                .find_domain_by_id(domain.id)
                .await?
                .ok_or_else(|| AppError::DomainNotFound { id: domain.id.to_string() });
        }

        transition.patch.apply_to(&mut domain, now);

        if transition.changes_status() {
            metrics::record_domain_transition(transition.from.as_str(), transition.to.as_str());
            info!(
                domain_id = %domain.id,
                from = %transition.from,
                to = %transition.to,
                "Domain status changed"
            );
            self.audit
                .record(
                    domain.tenant_id,
                    actor,
                    actions::DOMAIN_TRANSITION,
                    Some(ResourceRef::new("domain", domain.id)),
                    Some(serde_json::json!({
                        "from": transition.from,
                        "to": transition.to,
                        "last_error": domain.last_error,
                    })),
                )
                .await;
        }

        Ok(domain)
    }

    /// DNS instructions for a domain still awaiting its TXT record
    pub fn instructions(&self, domain: &CustomDomain) -> String {
        remediation(domain)
    }
}
