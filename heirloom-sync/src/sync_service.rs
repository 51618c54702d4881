//! Region Synchronization
//!
//! Drives catch-up of secondary replicas and replays the local mutation
//! queue against the backend.
//!
//! Region sync flow:
//! 1. Mark the region `syncing` and start progress at 0
//! 2. Run the transfer, which reports progress toward 100
//! 3. Success: `online` with a fresh `last_sync`; failure: `offline`
//! 4. Notify and reset progress to idle
//!
//! All region syncs are serialized behind one lock, so status transitions
//! and progress are observed one region at a time.

use crate::error::{RemoteError, SyncError, SyncResult};
use crate::failover::FailoverSelector;
use crate::notify::Notifier;
use crate::queue::{MutationQueue, Operation, QueuedOperation};
use crate::region::{Region, ReplicaHealth, StatusUpdate};
use crate::remote::{RemoteResult, RemoteStore};
use crate::settings::SyncSettings;
use crate::tracker::ReplicaTracker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Progress of the region currently being synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncProgress {
    /// `None` while idle
    pub region: Option<Region>,
    pub percent: u8,
}

impl SyncProgress {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.region.is_none()
    }
}

/// Handle given to a transport to report progress for one region.
/// Reports never move progress backwards.
pub struct ProgressReporter<'a> {
    tx: &'a watch::Sender<SyncProgress>,
    region: Region,
}

impl ProgressReporter<'_> {
    pub fn region(&self) -> Region {
        self.region
    }

    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        self.tx.send_if_modified(|progress| {
            if progress.region != Some(self.region) || percent <= progress.percent {
                return false;
            }
            progress.percent = percent;
            true
        });
    }
}

/// Moves data to a region replica.
#[async_trait]
pub trait RegionTransport: Send + Sync {
    async fn transfer(&self, region: Region, progress: &ProgressReporter<'_>) -> SyncResult<()>;
}

/// Transfer that only waits: `steps` ticks of `step_delay`, failing half-way
/// with probability `failure_rate`.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    pub steps: u32,
    pub step_delay: Duration,
    pub failure_rate: f64,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self {
            steps: 10,
            step_delay: Duration::from_millis(200),
            failure_rate: 0.0,
        }
    }
}

#[async_trait]
impl RegionTransport for SimulatedTransport {
    async fn transfer(&self, region: Region, progress: &ProgressReporter<'_>) -> SyncResult<()> {
        let steps = self.steps.max(1);
        let rate = if self.failure_rate.is_nan() {
            0.0
        } else {
            self.failure_rate.clamp(0.0, 1.0)
        };
        let fail = rand::thread_rng().gen_bool(rate);

        for step in 1..=steps {
            tokio::time::sleep(self.step_delay).await;
            if fail && step * 2 >= steps {
                return Err(SyncError::Transfer(format!(
                    "simulated transfer to {region} dropped at step {step}/{steps}"
                )));
            }
            let percent = u8::try_from(step * 100 / steps).unwrap_or(100);
            progress.report(percent);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The primary is never synced against itself
    Skipped,
    Synced { at: DateTime<Utc> },
    /// The region is now offline
    Failed { reason: String },
}

/// Why a queue flush did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushSkip {
    Offline,
    NoRegionAvailable,
}

/// Result of replaying the mutation queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub region: Option<Region>,
    pub applied: usize,
    pub rejected: usize,
    pub requeued: usize,
    pub skipped: Option<FlushSkip>,
}

impl FlushReport {
    fn skipped(reason: FlushSkip) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

type CompletionCallback = Box<dyn Fn(Region) + Send + Sync>;

pub struct SyncService {
    settings: SyncSettings,
    tracker: Arc<ReplicaTracker>,
    transport: Arc<dyn RegionTransport>,
    notifier: Notifier,
    selector: FailoverSelector,
    progress: watch::Sender<SyncProgress>,
    sync_lock: Mutex<()>,
    on_complete: Option<CompletionCallback>,
}

impl SyncService {
    pub fn new(
        settings: SyncSettings,
        tracker: Arc<ReplicaTracker>,
        transport: Arc<dyn RegionTransport>,
        notifier: Notifier,
    ) -> Self {
        let (progress, _) = watch::channel(SyncProgress::idle());
        Self {
            settings,
            tracker,
            transport,
            selector: FailoverSelector::new(notifier.clone()),
            notifier,
            progress,
            sync_lock: Mutex::new(()),
            on_complete: None,
        }
    }

    /// Invoke `callback` after every successful region sync.
    pub fn with_completion<F>(mut self, callback: F) -> Self
    where
        F: Fn(Region) + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &Arc<ReplicaTracker> {
        &self.tracker
    }

    pub fn progress(&self) -> SyncProgress {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Bring `region` up to date.
    ///
    /// Transfer failures are reported through the returned outcome and the
    /// region's status; only programming errors (a region outside
    /// `sync_regions`, or one the tracker does not know) are returned as
    /// `Err`.
    pub async fn sync_region(&self, region: Region) -> SyncResult<SyncOutcome> {
        if region == self.tracker.primary() {
            tracing::debug!(region = %region, "Skipping sync of primary region");
            return Ok(SyncOutcome::Skipped);
        }
        if !self.settings.sync_regions.contains(&region) {
            return Err(SyncError::UnconfiguredRegion(region));
        }

        let _serial = self.sync_lock.lock().await;

        self.tracker
            .set_status(region, ReplicaHealth::Syncing, StatusUpdate::default())?;
        self.progress.send_replace(SyncProgress {
            region: Some(region),
            percent: 0,
        });
        tracing::info!(region = %region, "Region sync started");

        let mut guard = SyncGuard {
            tracker: &self.tracker,
            progress: &self.progress,
            region,
            armed: true,
        };
        let reporter = ProgressReporter {
            tx: &self.progress,
            region,
        };
        let result = self.transport.transfer(region, &reporter).await;
        guard.armed = false;

        match result {
            Ok(()) => {
                let at = Utc::now();
                reporter.report(100);
                self.tracker
                    .set_status(region, ReplicaHealth::Online, StatusUpdate::synced_at(at))?;
                self.progress.send_replace(SyncProgress::idle());

                tracing::info!(region = %region, "Region sync complete");
                self.notifier
                    .success("Region synced", format!("{region} is up to date"));
                if let Some(callback) = &self.on_complete {
                    callback(region);
                }
                Ok(SyncOutcome::Synced { at })
            }
            Err(e) => {
                self.tracker
                    .set_status(region, ReplicaHealth::Offline, StatusUpdate::default())?;
                self.progress.send_replace(SyncProgress::idle());

                let reason = e.to_string();
                tracing::warn!(region = %region, error = %reason, "Region sync failed");
                self.notifier
                    .error("Region sync failed", format!("{region}: {reason}"));
                Ok(SyncOutcome::Failed { reason })
            }
        }
    }

    /// Sync every configured secondary, one after the other, in list order.
    /// A failed region does not stop the sweep. No-op when sync is disabled.
    pub async fn sync_all_regions(&self) -> SyncResult<Vec<(Region, SyncOutcome)>> {
        if !self.settings.enabled {
            tracing::debug!("Replica sync disabled, skipping sweep");
            return Ok(Vec::new());
        }

        let primary = self.tracker.primary();
        let mut outcomes = Vec::with_capacity(self.settings.sync_regions.len());
        for region in self.settings.sync_regions.iter().copied() {
            if region == primary {
                continue;
            }
            let outcome = self.sync_region(region).await?;
            outcomes.push((region, outcome));
        }

        let failed = outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, SyncOutcome::Failed { .. }))
            .count();
        tracing::info!(regions = outcomes.len(), failed, "Replica sweep finished");
        Ok(outcomes)
    }

    /// Replay queued mutations against `store`.
    ///
    /// Does nothing while the device is offline or when no region is online.
    /// On the first connectivity failure the failing operation and everything
    /// after it go back into the queue. Rejected operations are dropped and
    /// reported.
    pub async fn flush_queue(&self, queue: &MutationQueue, store: &dyn RemoteStore) -> FlushReport {
        if !queue.is_online() {
            return FlushReport::skipped(FlushSkip::Offline);
        }

        let snapshot = self.tracker.snapshot();
        let decision = self.selector.select(snapshot.primary, &snapshot.regions);
        if !decision.is_available() {
            return FlushReport::skipped(FlushSkip::NoRegionAvailable);
        }

        let ops = queue.drain().await;
        let mut report = FlushReport {
            region: Some(decision.region()),
            ..Default::default()
        };
        if ops.is_empty() {
            return report;
        }

        let mut pending = ops.into_iter();
        while let Some(op) = pending.next() {
            match replay(store, &op).await {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_connectivity() => {
                    let mut rest = vec![op];
                    rest.extend(pending.by_ref());
                    report.requeued = rest.len();
                    queue.requeue(rest).await;
                    break;
                }
                Err(e) => {
                    report.rejected += 1;
                    tracing::warn!(operation_id = %op.id, error = %e, "Queued mutation rejected");
                    self.notifier.error(
                        "Offline change rejected",
                        format!("{} on {}: {e}", op.operation.name(), op.operation.table()),
                    );
                }
            }
        }

        tracing::info!(
            region = %decision.region(),
            applied = report.applied,
            rejected = report.rejected,
            requeued = report.requeued,
            "Flushed mutation queue"
        );
        report
    }
}

async fn replay(store: &dyn RemoteStore, op: &QueuedOperation) -> RemoteResult<()> {
    match &op.operation {
        Operation::Create { table } => store.create(table, op.data.clone()).await.map(|_| ()),
        Operation::Update { table, id } => store.update(table, id, op.data.clone()).await.map(|_| ()),
        Operation::Delete { table, id } => match store.delete(table, id).await {
            // Already gone: a duplicate delivery of the same delete
            Err(RemoteError::NotFound { .. }) => Ok(()),
            other => other,
        },
    }
}

/// Marks the region offline if a sync future is dropped mid-transfer, so a
/// cancelled sync never leaves it looking healthy.
struct SyncGuard<'a> {
    tracker: &'a ReplicaTracker,
    progress: &'a watch::Sender<SyncProgress>,
    region: Region,
    armed: bool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(region = %self.region, "Region sync cancelled");
        let _ = self
            .tracker
            .set_status(self.region, ReplicaHealth::Offline, StatusUpdate::default());
        self.progress.send_replace(SyncProgress::idle());
    }
}
