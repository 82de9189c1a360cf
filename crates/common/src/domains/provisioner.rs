//! Certificate provisioning seam

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::clock::{span_secs, Clock};

/// Answer from a certificate authority integration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Issued { expires_at: DateTime<Utc> },
    Pending,
    Failed { reason: String },
}

/// Obtains TLS certificates for verified hostnames.
///
/// Called once when ownership is proven and again on every poll while the
/// domain waits in `pending_ssl`, so implementations must be idempotent
/// per hostname.
#[async_trait]
pub trait CertificateProvisioner: Send + Sync {
    async fn provision(&self, hostname: &str) -> ProvisionOutcome;
}

/// Issues immediately with a fixed validity.
///
/// Stands in until a real CA integration is wired up.
pub struct ImmediateProvisioner {
    validity: Duration,
    clock: Arc<dyn Clock>,
}

impl ImmediateProvisioner {
    pub fn new(validity_days: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            validity: span_secs(validity_days.saturating_mul(86_400)),
            clock,
        }
    }
}

#[async_trait]
impl CertificateProvisioner for ImmediateProvisioner {
    async fn provision(&self, hostname: &str) -> ProvisionOutcome {
        tracing::info!(hostname = %hostname, "Issuing certificate");
        ProvisionOutcome::Issued {
            expires_at: self.clock.now() + self.validity,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Replays a scripted sequence of outcomes, repeating the last one
    pub struct ScriptedProvisioner {
        outcomes: Mutex<Vec<ProvisionOutcome>>,
    }

    impl ScriptedProvisioner {
        pub fn new(outcomes: Vec<ProvisionOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl CertificateProvisioner for ScriptedProvisioner {
        async fn provision(&self, _hostname: &str) -> ProvisionOutcome {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes.first().cloned().unwrap_or(ProvisionOutcome::Pending)
            }
        }
    }
}
