//! Replica status tracker
//!
//! Holds the health, latency and last-sync time of the primary region and
//! every secondary. All writes go through [`ReplicaTracker::set_status`] (and
//! the latency refresh), and each write publishes a brand new
//! [`ReplicaSnapshot`]: readers holding an older `Arc` keep a consistent view.

use crate::error::{SyncError, SyncResult};
use crate::region::{Region, RegionStatus, ReplicaHealth, StatusUpdate};
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Source of latency measurements for a region.
pub trait LatencyProbe: Send + Sync {
    fn sample(&self, region: Region) -> u64;
}

/// Uniform random jitter in `[min_ms, max_ms]`.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedLatency {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for SimulatedLatency {
    fn default() -> Self {
        Self {
            min_ms: 50,
            max_ms: 150,
        }
    }
}

impl LatencyProbe for SimulatedLatency {
    fn sample(&self, _region: Region) -> u64 {
        if self.min_ms >= self.max_ms {
            return self.min_ms;
        }
        rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
    }
}

/// Fixed per-region latencies (100 ms when unset). Useful wherever a
/// deterministic replica table is needed.
#[derive(Debug, Default)]
pub struct FixedLatency {
    values: RwLock<HashMap<Region, u64>>,
}

impl FixedLatency {
    pub fn new(values: &[(Region, u64)]) -> Self {
        Self {
            values: RwLock::new(values.iter().copied().collect()),
        }
    }

    pub fn set(&self, region: Region, latency_ms: u64) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region, latency_ms);
    }
}

impl LatencyProbe for FixedLatency {
    fn sample(&self, region: Region) -> u64 {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&region)
            .copied()
            .unwrap_or(100)
    }
}

/// Immutable view of every tracked region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSnapshot {
    pub primary: Region,
    /// Cleared while the primary is forced offline
    pub primary_online: bool,
    pub regions: Vec<RegionStatus>,
}

impl ReplicaSnapshot {
    pub fn status_of(&self, region: Region) -> Option<&RegionStatus> {
        self.regions.iter().find(|status| status.region == region)
    }

    pub fn online_count(&self) -> usize {
        self.regions.iter().filter(|status| status.is_online()).count()
    }
}

pub struct ReplicaTracker {
    probe: Arc<dyn LatencyProbe>,
    tx: watch::Sender<Arc<ReplicaSnapshot>>,
}

impl ReplicaTracker {
    /// Create a tracker seeded with `primary` plus every region in `secondaries`.
    pub fn new(primary: Region, secondaries: &[Region], probe: Arc<dyn LatencyProbe>) -> Self {
        let snapshot = seed(primary, secondaries, probe.as_ref());
        let (tx, _) = watch::channel(Arc::new(snapshot));
        Self { probe, tx }
    }

    /// Reseed every region: all online, fresh latency, `last_sync` set only on
    /// the primary. The primary is tracked once even if it appears in
    /// `all_regions`.
    pub fn initialize(&self, primary: Region, all_regions: &[Region]) {
        let snapshot = seed(primary, all_regions, self.probe.as_ref());
        tracing::info!(
            primary = %primary,
            regions = snapshot.regions.len(),
            "Initialized replica tracker"
        );
        self.tx.send_replace(Arc::new(snapshot));
    }

    pub fn snapshot(&self) -> Arc<ReplicaSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ReplicaSnapshot>> {
        self.tx.subscribe()
    }

    pub fn primary(&self) -> Region {
        self.tx.borrow().primary
    }

    pub fn status_of(&self, region: Region) -> Option<RegionStatus> {
        self.tx.borrow().status_of(region).cloned()
    }

    pub fn sample_latency(&self, region: Region) -> u64 {
        self.probe.sample(region)
    }

    /// Re-sample latency for every region. Status and `last_sync` are untouched.
    pub fn refresh_latencies(&self) {
        self.tx.send_modify(|current| {
            let mut next = ReplicaSnapshot::clone(current);
            for status in &mut next.regions {
                status.latency_ms = self.probe.sample(status.region);
            }
            *current = Arc::new(next);
        });
        tracing::trace!("Refreshed replica latencies");
    }

    /// Replace the record for `region`. Only the sync service and the outage
    /// simulator call this.
    pub(crate) fn set_status(
        &self,
        region: Region,
        status: ReplicaHealth,
        update: StatusUpdate,
    ) -> SyncResult<()> {
        let found = self.tx.send_if_modified(|current| {
            let Some(index) = current.regions.iter().position(|s| s.region == region) else {
                return false;
            };
            let mut next = ReplicaSnapshot::clone(current);
            if let Some(entry) = next.regions.get_mut(index) {
                entry.status = status;
                if let Some(latency_ms) = update.latency_ms {
                    entry.latency_ms = latency_ms;
                }
                if let Some(last_sync) = update.last_sync {
                    entry.last_sync = Some(last_sync);
                }
            }
            *current = Arc::new(next);
            true
        });

        if !found {
            return Err(SyncError::UnknownRegion(region.to_string()));
        }

        tracing::debug!(region = %region, status = %status, "Region status changed");
        Ok(())
    }

    pub(crate) fn set_primary_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if current.primary_online == online {
                return false;
            }
            let mut next = ReplicaSnapshot::clone(current);
            next.primary_online = online;
            *current = Arc::new(next);
            true
        });
    }

    /// Refresh latencies every `every` until the returned task is aborted.
    /// Periods below one millisecond are raised to one millisecond.
    pub fn spawn_latency_refresher(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let every = every.max(Duration::from_millis(1));
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = tokio::time::interval_at(start, every);
            loop {
                ticker.tick().await;
                tracker.refresh_latencies();
            }
        })
    }
}

fn seed(primary: Region, regions: &[Region], probe: &dyn LatencyProbe) -> ReplicaSnapshot {
    let now = Utc::now();
    let mut ordered = vec![primary];
    for region in regions {
        if !ordered.contains(region) {
            ordered.push(*region);
        }
    }

    let regions = ordered
        .into_iter()
        .map(|region| RegionStatus {
            region,
            status: ReplicaHealth::Online,
            latency_ms: probe.sample(region),
            last_sync: (region == primary).then_some(now),
        })
        .collect();

    ReplicaSnapshot {
        primary,
        primary_online: true,
        regions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> Vec<Region> {
        vec![Region::EuWest1, Region::ApSoutheast1, Region::UsWest1]
    }

    #[test]
    fn test_initialize_seeds_one_status_per_region() {
        let tracker = ReplicaTracker::new(
            Region::UsEast1,
            &regions(),
            Arc::new(SimulatedLatency::default()),
        );
        let snapshot = tracker.snapshot();

        assert_eq!(snapshot.regions.len(), 4);
        for status in &snapshot.regions {
            assert_eq!(status.status, ReplicaHealth::Online);
            assert!((50..=150).contains(&status.latency_ms));
            if status.region == Region::UsEast1 {
                assert!(status.last_sync.is_some());
            } else {
                assert!(status.last_sync.is_none());
            }
        }
        assert!(snapshot.primary_online);
    }

    #[test]
    fn test_initialize_does_not_duplicate_primary() {
        let tracker = ReplicaTracker::new(
            Region::UsEast1,
            &[Region::UsEast1, Region::EuWest1, Region::EuWest1],
            Arc::new(SimulatedLatency::default()),
        );
        assert_eq!(tracker.snapshot().regions.len(), 2);

        tracker.initialize(Region::EuWest1, &[Region::UsEast1, Region::EuWest1]);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.primary, Region::EuWest1);
        assert_eq!(snapshot.regions.len(), 2);
        assert!(snapshot.status_of(Region::EuWest1).unwrap().last_sync.is_some());
        assert!(snapshot.status_of(Region::UsEast1).unwrap().last_sync.is_none());
    }

    #[test]
    fn test_refresh_latencies_keeps_status_and_last_sync() {
        let probe = Arc::new(FixedLatency::new(&[(Region::EuWest1, 80)]));
        let tracker = ReplicaTracker::new(Region::UsEast1, &[Region::EuWest1], probe.clone());
        tracker
            .set_status(Region::EuWest1, ReplicaHealth::Offline, StatusUpdate::default())
            .unwrap();
        let before = tracker.snapshot();

        probe.set(Region::EuWest1, 240);
        tracker.refresh_latencies();
        let after = tracker.snapshot();

        let old = before.status_of(Region::EuWest1).unwrap();
        let new = after.status_of(Region::EuWest1).unwrap();
        assert_eq!(old.latency_ms, 80);
        assert_eq!(new.latency_ms, 240);
        assert_eq!(new.status, ReplicaHealth::Offline);
        assert_eq!(
            after.status_of(Region::UsEast1).unwrap().last_sync,
            before.status_of(Region::UsEast1).unwrap().last_sync
        );
    }

    #[test]
    fn test_set_status_publishes_new_snapshot() {
        let tracker = ReplicaTracker::new(
            Region::UsEast1,
            &[Region::EuWest1],
            Arc::new(FixedLatency::default()),
        );
        let stale = tracker.snapshot();
        let synced_at = Utc::now();

        tracker
            .set_status(
                Region::EuWest1,
                ReplicaHealth::Online,
                StatusUpdate::synced_at(synced_at),
            )
            .unwrap();

        assert!(stale.status_of(Region::EuWest1).unwrap().last_sync.is_none());
        assert_eq!(
            tracker.status_of(Region::EuWest1).unwrap().last_sync,
            Some(synced_at)
        );
    }

    #[test]
    fn test_set_status_unknown_region() {
        let tracker = ReplicaTracker::new(
            Region::UsEast1,
            &[Region::EuWest1],
            Arc::new(FixedLatency::default()),
        );
        let result = tracker.set_status(
            Region::SaEast1,
            ReplicaHealth::Offline,
            StatusUpdate::default(),
        );
        assert!(matches!(result, Err(SyncError::UnknownRegion(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_refresher_ticks() {
        let probe = Arc::new(FixedLatency::new(&[(Region::EuWest1, 60)]));
        let tracker = Arc::new(ReplicaTracker::new(
            Region::UsEast1,
            &[Region::EuWest1],
            probe.clone(),
        ));
        let mut rx = tracker.subscribe();

        let handle = tracker.spawn_latency_refresher(Duration::from_secs(5));
        probe.set(Region::EuWest1, 130);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status_of(Region::EuWest1).unwrap().latency_ms, 130);
        handle.abort();
    }
}
