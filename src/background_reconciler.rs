//! Periodic + network-triggered cleanup of orphaned local state (§4.9)

use crate::certificate_registry::CertificateRegistry;
use crate::cloud_verifier::CloudVerifier;
use crate::error::Result;
use crate::event_bus::{DomainEvent, DomainEventBus};
use crate::thing_registry::ThingRegistry;
use crate::traits::{Clock, SystemClock};
use crate::types::{ConnectionState, Fingerprint};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const RECONCILE_PERIOD: chrono::Duration = chrono::Duration::hours(24);

struct ReconcilerState {
    last_ran_at: Option<DateTime<Utc>>,
    next_scheduled_run_at: DateTime<Utc>,
    running: bool,
}

/// Periodic + network-triggered coordinator reconciling local Thing/
/// certificate state against the cloud, tolerant of partial cloud failures.
pub struct BackgroundReconciler {
    thing_registry: Arc<ThingRegistry>,
    certificate_registry: Arc<CertificateRegistry>,
    cloud_verifier: Arc<dyn CloudVerifier>,
    event_bus: Arc<DomainEventBus>,
    clock: Arc<dyn Clock>,
    state: Mutex<ReconcilerState>,
}

impl BackgroundReconciler {
    /// Build a reconciler with its first `nextScheduledRunAt` set to `now`.
    pub fn new(
        thing_registry: Arc<ThingRegistry>,
        certificate_registry: Arc<CertificateRegistry>,
        cloud_verifier: Arc<dyn CloudVerifier>,
        event_bus: Arc<DomainEventBus>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();
        Self {
            thing_registry,
            certificate_registry,
            cloud_verifier,
            event_bus,
            clock,
            state: Mutex::new(ReconcilerState {
                last_ran_at: None,
                next_scheduled_run_at: now,
                running: false,
            }),
        }
    }

    /// Whether a scheduler tick at `now` should trigger a run.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        now >= self.state.lock().unwrap().next_scheduled_run_at
    }

    /// Called on a scheduler tick; runs if due.
    pub async fn on_scheduler_tick(&self) {
        let now = self.clock.now();
        if self.due(now) {
            self.run().await;
        }
    }

    /// Called on a `ConnectionState` transition. Only DOWN→UP can trigger a
    /// run, and only if at least 24h have passed since the last run.
    pub async fn on_network_state_change(&self, from: ConnectionState, to: ConnectionState) {
        if !matches!((from, to), (ConnectionState::NetworkDown, ConnectionState::NetworkUp)) {
            return;
        }
        let now = self.clock.now();
        let should_run = {
            let state = self.state.lock().unwrap();
            match state.last_ran_at {
                None => true,
                Some(last) => now.signed_duration_since(last) >= RECONCILE_PERIOD,
            }
        };
        if should_run {
            self.run().await;
        }
    }

    /// Manually trigger a run. Returns immediately without making any cloud
    /// calls if another run is in progress, or if less than 24h have passed
    /// since the last completed run.
    pub async fn run(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.running {
                return;
            }
            let now = self.clock.now();
            if state.last_ran_at.is_some() && now < state.next_scheduled_run_at {
                return;
            }
            state.running = true;
        }

        let outcome = self.reconcile().await;

        let mut state = self.state.lock().unwrap();
        state.running = false;
        match outcome {
            Ok((orphaned_things, orphaned_certificates)) => {
                let now = self.clock.now();
                state.last_ran_at = Some(now);
                state.next_scheduled_run_at = now + RECONCILE_PERIOD;
                drop(state);
                info!(orphaned_things, orphaned_certificates, "reconciliation run completed");
                self.event_bus.publish(DomainEvent::ReconciliationCompleted {
                    orphaned_things,
                    orphaned_certificates,
                });
            }
            Err(e) => {
                let now = self.clock.now();
                state.next_scheduled_run_at = now + RECONCILE_PERIOD;
                warn!(error = %e, "reconciliation run failed, postponing cleanup 24h");
            }
        }
    }

    async fn reconcile(&self) -> Result<(usize, usize)> {
        let local_certificates = self.certificate_registry.all().await?;

        let mut cloud_thing_names: BTreeSet<String> = BTreeSet::new();
        for record in &local_certificates {
            let principals = self
                .cloud_verifier
                .list_thing_principals(&Fingerprint(record.id.0.clone()))
                .await?;
            cloud_thing_names.extend(principals.into_iter().map(|p| p.thing_name));
        }

        let local_things = self.thing_registry.all().await?;
        let mut orphaned_things = 0;
        for thing in &local_things {
            if !cloud_thing_names.contains(&thing.name) {
                self.thing_registry.delete(&thing.name).await?;
                orphaned_things += 1;
            }
        }

        let remaining_things = self.thing_registry.all().await?;
        let referenced_certificate_ids: BTreeSet<String> = remaining_things
            .iter()
            .flat_map(|t| t.attached_certificate_ids.keys().cloned())
            .collect();

        let mut orphaned_certificates = 0;
        for record in &local_certificates {
            if !referenced_certificate_ids.contains(&record.id.0) {
                self.certificate_registry.delete(&record.id).await?;
                orphaned_certificates += 1;
            }
        }

        Ok((orphaned_things, orphaned_certificates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud_verifier::FakeCloudVerifier;
    use crate::runtime_store::MemoryRuntimeStore;
    use crate::types::Thing;
    use chrono::Utc;

    const SAMPLE_PEM: &str = include_str!("../tests/fixtures/sample_cert.pem");

    async fn harness() -> (
        Arc<ThingRegistry>,
        Arc<CertificateRegistry>,
        Arc<FakeCloudVerifier>,
        BackgroundReconciler,
    ) {
        let store: Arc<dyn crate::traits::RuntimeStore> = Arc::new(MemoryRuntimeStore::new());
        let things = Arc::new(ThingRegistry::new(store.clone()));
        let certs = Arc::new(CertificateRegistry::new(store));
        let cloud = Arc::new(FakeCloudVerifier::new());
        let bus = Arc::new(DomainEventBus::new());
        let reconciler = BackgroundReconciler::new(things.clone(), certs.clone(), cloud.clone(), bus);
        (things, certs, cloud, reconciler)
    }

    #[tokio::test]
    async fn deletes_things_the_cloud_no_longer_knows_about() {
        let (things, certs, cloud, reconciler) = harness().await;
        let record = certs.get_or_create(SAMPLE_PEM).await.unwrap();

        let mut orphan = Thing::new("orphan-camera").unwrap();
        orphan.attach_certificate(&record.id.0, Utc::now());
        things.update(&orphan).await.unwrap();

        let mut known = Thing::new("known-camera").unwrap();
        known.attach_certificate(&record.id.0, Utc::now());
        things.update(&known).await.unwrap();
        cloud.associate("known-camera", &Fingerprint(record.id.0.clone()));

        reconciler.run().await;

        assert!(things.get("orphan-camera").await.unwrap().is_none());
        assert!(things.get("known-camera").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_run_within_24h_is_a_no_op_via_network_trigger() {
        let (_, _, _, reconciler) = harness().await;
        reconciler.run().await;
        let before = reconciler.state.lock().unwrap().last_ran_at;

        reconciler
            .on_network_state_change(ConnectionState::NetworkDown, ConnectionState::NetworkUp)
            .await;

        assert_eq!(reconciler.state.lock().unwrap().last_ran_at, before);
    }

    #[tokio::test]
    async fn second_direct_run_within_24h_makes_no_cloud_calls() {
        let (_, certs, cloud, reconciler) = harness().await;
        certs.get_or_create(SAMPLE_PEM).await.unwrap();
        reconciler.run().await;
        let before = reconciler.state.lock().unwrap().last_ran_at;
        let calls_before = cloud.list_thing_principals_call_count();

        reconciler.run().await;

        assert_eq!(reconciler.state.lock().unwrap().last_ran_at, before);
        assert_eq!(cloud.list_thing_principals_call_count(), calls_before);
    }

    #[tokio::test]
    async fn concurrent_manual_run_is_skipped_while_running() {
        let (_, _, _, reconciler) = harness().await;
        reconciler.state.lock().unwrap().running = true;
        reconciler.run().await;
        assert!(reconciler.state.lock().unwrap().last_ran_at.is_none());
    }
}
