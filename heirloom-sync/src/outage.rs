//! Outage simulation
//!
//! Forces regions offline and back online to exercise failover and recovery.
//! Recovery always issues one catch-up sync of the recovered region.

use crate::error::SyncResult;
use crate::failover::{FailoverDecision, FailoverSelector};
use crate::notify::Notifier;
use crate::region::{Region, ReplicaHealth, StatusUpdate};
use crate::sync_service::{SyncOutcome, SyncService};
use std::sync::Arc;

pub struct OutageSimulator {
    sync: Arc<SyncService>,
    selector: FailoverSelector,
    notifier: Notifier,
}

impl OutageSimulator {
    pub fn new(sync: Arc<SyncService>, notifier: Notifier) -> Self {
        Self {
            sync,
            selector: FailoverSelector::new(notifier.clone()),
            notifier,
        }
    }

    /// Take `region` offline. For the primary, also clear the primary flag and
    /// return the advisory failover choice; the primary is not relabeled.
    pub fn force_offline(&self, region: Region) -> SyncResult<Option<FailoverDecision>> {
        let tracker = self.sync.tracker();
        tracker.set_status(region, ReplicaHealth::Offline, StatusUpdate::default())?;
        tracing::warn!(region = %region, "Simulated outage");
        self.notifier
            .warning("Region outage", format!("{region} is offline"));

        if region != tracker.primary() {
            return Ok(None);
        }

        tracker.set_primary_online(false);
        let snapshot = tracker.snapshot();
        let decision = self.selector.select(snapshot.primary, &snapshot.regions);
        tracing::info!(
            primary = %snapshot.primary,
            suggested = %decision.region(),
            "Primary offline, failover suggestion computed"
        );
        Ok(Some(decision))
    }

    /// Bring `region` back online with a fresh latency sample, then run one
    /// catch-up sync for it.
    pub async fn recover(&self, region: Region) -> SyncResult<SyncOutcome> {
        let tracker = self.sync.tracker();
        let latency_ms = tracker.sample_latency(region);
        tracker.set_status(
            region,
            ReplicaHealth::Online,
            StatusUpdate::with_latency(latency_ms),
        )?;
        if region == tracker.primary() {
            tracker.set_primary_online(true);
        }

        tracing::info!(region = %region, latency_ms, "Region recovered");
        self.notifier
            .success("Region recovered", format!("{region} is back online"));

        self.sync.sync_region(region).await
    }
}
