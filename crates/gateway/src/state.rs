//! Shared application state and service wiring

use std::sync::Arc;
use std::time::Duration;

use relaygate_common::{
    audit::AuditRecorder,
    auth::{ApiKeyService, CredentialResolver, ResolverSettings, TokenSecret},
    cache::Cache,
    clock::Clock,
    config::AppConfig,
    connections::ConnectionService,
    crypto::MasterKey,
    db::Repository,
    domains::{CertificateProvisioner, DomainService, DomainSettings, TxtResolver},
    errors::{AppError, Result},
    rate::{CounterStore, RateAccountant, UsageMeter},
    store::{ApiKeyStore, AuditSink, ConnectionStore, DomainStore, TenantStore},
    tenants::{ConfigPlanLimits, PlanLimits, TenantService},
};

use crate::upstream::{ReqwestUpstream, UpstreamClient};

/// Storage and integration backends the services are built on
pub struct Backends {
    pub tenants: Arc<dyn TenantStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub domains: Arc<dyn DomainStore>,
    pub audit: Arc<dyn AuditSink>,
    pub counters: Arc<dyn CounterStore>,
    pub txt_resolver: Arc<dyn TxtResolver>,
    pub provisioner: Arc<dyn CertificateProvisioner>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Postgres for records, Redis for counters, system DNS and reqwest
    pub fn production(
        repository: Repository,
        cache: Arc<Cache>,
        txt_resolver: Arc<dyn TxtResolver>,
        provisioner: Arc<dyn CertificateProvisioner>,
        config: &AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let repository = Arc::new(repository);
        let upstream = ReqwestUpstream::new(Duration::from_secs(config.upstream.timeout_secs))?;

        Ok(Self {
            tenants: repository.clone(),
            connections: repository.clone(),
            api_keys: repository.clone(),
            domains: repository.clone(),
            audit: repository,
            counters: cache,
            txt_resolver,
            provisioner,
            upstream: Arc::new(upstream),
            clock,
        })
    }
}

/// Readiness probes; absent when running on in-memory backends
#[derive(Clone, Default)]
pub struct Probes {
    pub database: Option<Repository>,
    pub cache: Option<Arc<Cache>>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tenants: TenantService,
    pub connections: ConnectionService,
    pub api_keys: ApiKeyService,
    pub domains: DomainService,
    pub audit: AuditRecorder,
    pub resolver: CredentialResolver,
    pub limits: Arc<dyn PlanLimits>,
    pub rate: RateAccountant,
    pub usage: UsageMeter,
    pub upstream: Arc<dyn UpstreamClient>,
    pub probes: Probes,
}

impl AppState {
    /// Wire every service from configuration and backends
    pub fn assemble(config: Arc<AppConfig>, backends: Backends, probes: Probes) -> Result<Self> {
        let master_key = MasterKey::parse(&config.security.master_key)?;
        let token_secret = TokenSecret::new(config.security.token_secret.clone()).map_err(|e| {
            AppError::Configuration {
                message: format!("security.token_secret: {}", e),
            }
        })?;

        let clock = backends.clock;
        let audit = AuditRecorder::new(backends.audit, clock.clone());
        let limits: Arc<dyn PlanLimits> =
            Arc::new(ConfigPlanLimits::new(backends.tenants.clone(), config.plans.clone()));

        let tenants = TenantService::new(
            backends.tenants.clone(),
            token_secret.clone(),
            config.security.session_ttl_secs,
            audit.clone(),
            clock.clone(),
        );

        let connections = ConnectionService::new(
            backends.connections.clone(),
            limits.clone(),
            master_key.clone(),
            token_secret.clone(),
            config.security.upstream_token_ttl_secs,
            audit.clone(),
            clock.clone(),
        );

        let api_keys = ApiKeyService::new(
            backends.api_keys.clone(),
            backends.connections.clone(),
            audit.clone(),
            clock.clone(),
        );

        let domains = DomainService::new(
            backends.domains,
            backends.txt_resolver,
            backends.provisioner,
            audit.clone(),
            clock.clone(),
            DomainSettings::from_config(&config.domains),
        );

        let resolver = CredentialResolver::new(
            backends.tenants,
            backends.connections,
            backends.api_keys,
            master_key,
            token_secret,
            ResolverSettings::new(&config.security, config.upstream.default_base_url.clone()),
            clock.clone(),
        );

        Ok(Self {
            rate: RateAccountant::new(backends.counters.clone(), clock.clone()),
            usage: UsageMeter::new(backends.counters, clock),
            config,
            tenants,
            connections,
            api_keys,
            domains,
            audit,
            resolver,
            limits,
            upstream: backends.upstream,
            probes,
        })
    }
}
