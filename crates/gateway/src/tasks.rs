//! Background loops: SSL poller and audit retention

use std::time::Duration;

use relaygate_common::{audit::AuditRecorder, domains::DomainService};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Sweep `pending_ssl` and `active` domains every `interval`
pub fn spawn_domain_poller(
    domains: DomainService,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Domain poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            match domains.poll_once().await {
                Ok(report) => debug!(?report, "Domain poll complete"),
                Err(e) => error!(error = %e, "Domain poll failed"),
            }
        }

        info!("Domain poller stopped");
    })
}

/// Delete audit entries older than `retention_days` every `interval`
pub fn spawn_audit_purge(
    audit: AuditRecorder,
    retention_days: i64,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            match audit.purge_retention(retention_days).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, retention_days, "Audit entries purged"),
                Err(e) => error!(error = %e, "Audit purge failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::harness;

    #[tokio::test]
    async fn test_loops_stop_on_shutdown() {
        let h = harness();
        let (tx, rx) = watch::channel(false);

        let poller = spawn_domain_poller(h.state.domains.clone(), Duration::from_millis(10), rx.clone());
        let purge = spawn_audit_purge(h.state.audit.clone(), 30, Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio_test::assert_ok!(tx.send(true));

        tokio::time::timeout(Duration::from_secs(1), poller).await.unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(1), purge).await.unwrap().unwrap();
    }
}
