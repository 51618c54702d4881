//! Session wiring
//!
//! [`SyncRuntime`] constructs the queue, tracker, sync service and outage
//! simulator for one session, runs their background tasks and tears them
//! down again on [`SyncRuntime::shutdown`].

use crate::error::SyncResult;
use crate::graph_cache::GraphCache;
use crate::local_db::LocalDbConfig;
use crate::notify::Notifier;
use crate::outage::OutageSimulator;
use crate::queue::{MutationQueue, QueueEvent};
use crate::remote::RemoteStore;
use crate::settings::SyncSettings;
use crate::sync_service::{FlushReport, RegionTransport, SyncService};
use crate::tracker::{LatencyProbe, ReplicaTracker};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

pub struct SyncRuntime {
    notifier: Notifier,
    queue: Arc<MutationQueue>,
    sync: Arc<SyncService>,
    outage: OutageSimulator,
    store: Arc<dyn RemoteStore>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncRuntime {
    /// Start a session with simulated latency and region transfers.
    pub async fn start(settings: SyncSettings, store: Arc<dyn RemoteStore>) -> SyncResult<Self> {
        let probe = Arc::new(settings.latency_model());
        let transport = Arc::new(settings.transport());
        Self::start_with(settings, store, probe, transport).await
    }

    pub async fn start_with(
        settings: SyncSettings,
        store: Arc<dyn RemoteStore>,
        probe: Arc<dyn LatencyProbe>,
        transport: Arc<dyn RegionTransport>,
    ) -> SyncResult<Self> {
        settings.validate()?;
        let queue = match &settings.queue_db_path {
            Some(path) => {
                MutationQueue::open(LocalDbConfig {
                    db_path: path.clone(),
                    ..Default::default()
                })
                .await?
            }
            None => MutationQueue::in_memory(),
        };
        let queue = Arc::new(queue);

        let notifier = Notifier::new();
        let tracker = Arc::new(ReplicaTracker::new(
            settings.primary_region,
            &settings.sync_regions,
            probe,
        ));
        let interval = settings.status_interval();
        let sync = Arc::new(SyncService::new(
            settings,
            tracker.clone(),
            transport,
            notifier.clone(),
        ));
        let outage = OutageSimulator::new(sync.clone(), notifier.clone());

        let tasks = vec![
            tracker.spawn_latency_refresher(interval),
            spawn_reconnect_flusher(queue.clone(), sync.clone(), store.clone()),
        ];

        tracing::info!(
            primary = %tracker.primary(),
            regions = tracker.snapshot().regions.len(),
            pending = queue.len().await,
            "Sync runtime started"
        );

        Ok(Self {
            notifier,
            queue,
            sync,
            outage,
            store,
            tasks,
        })
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    pub fn tracker(&self) -> &Arc<ReplicaTracker> {
        self.sync.tracker()
    }

    pub fn sync(&self) -> &Arc<SyncService> {
        &self.sync
    }

    pub fn outage(&self) -> &OutageSimulator {
        &self.outage
    }

    /// Graph cache for one family, sharing this session's queue and backend.
    pub fn graph_cache(&self, family_id: impl Into<String>) -> GraphCache {
        GraphCache::new(
            family_id,
            self.store.clone(),
            self.queue.clone(),
            self.sync.tracker().clone(),
            self.notifier.clone(),
        )
    }

    /// Record a connectivity change. Coming back online triggers a flush in
    /// the background.
    pub fn set_online(&self, online: bool) {
        self.queue.set_online(online);
    }

    /// Replay queued writes now.
    pub async fn flush(&self) -> FlushReport {
        self.sync.flush_queue(&self.queue, self.store.as_ref()).await
    }

    /// Stop background tasks and close the local queue store.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            // Aborted tasks resolve with a cancellation error
            let _ = task.await;
        }
        self.queue.close().await;
        tracing::info!("Sync runtime stopped");
    }
}

fn spawn_reconnect_flusher(
    queue: Arc<MutationQueue>,
    sync: Arc<SyncService>,
    store: Arc<dyn RemoteStore>,
) -> JoinHandle<()> {
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Connectivity { online: true }) => {
                    let report = sync.flush_queue(&queue, store.as_ref()).await;
                    tracing::debug!(
                        applied = report.applied,
                        requeued = report.requeued,
                        "Flush after reconnect finished"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Queue event listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::graph::Attributes;
    use crate::region::{Region, ReplicaHealth};
    use crate::remote::InMemoryStore;
    use crate::sync_service::SimulatedTransport;
    use crate::tracker::FixedLatency;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn fast_settings() -> SyncSettings {
        SyncSettings {
            transfer_steps: 2,
            transfer_step_delay_ms: 1,
            ..Default::default()
        }
    }

    async fn runtime(settings: SyncSettings, store: Arc<InMemoryStore>) -> SyncRuntime {
        let transport = Arc::new(SimulatedTransport {
            steps: 2,
            step_delay: Duration::from_millis(1),
            failure_rate: 0.0,
        });
        SyncRuntime::start_with(settings, store, Arc::new(FixedLatency::new(&[])), transport)
            .await
            .unwrap()
    }

    fn named(name: &str) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), serde_json::json!(name));
        attributes
    }

    #[tokio::test]
    async fn test_reconnect_flushes_queue() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = runtime(fast_settings(), store.clone()).await;
        let cache = runtime.graph_cache("family-1");

        runtime.set_online(false);
        cache.add_person(named("Ada")).await.unwrap();
        assert_eq!(runtime.queue().len().await, 1);
        assert!(store.records("family_members").await.is_empty());

        runtime.set_online(true);
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.records("family_members").await.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(runtime.queue().is_empty().await);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_seeds_tracker_from_settings() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = runtime(fast_settings(), store).await;

        let snapshot = runtime.tracker().snapshot();
        assert_eq!(snapshot.primary, Region::UsEast1);
        assert_eq!(snapshot.regions.len(), 3);
        assert!(snapshot
            .regions
            .iter()
            .all(|status| status.status == ReplicaHealth::Online));

        let outcomes = runtime.sync().sync_all_regions().await.unwrap();
        assert_eq!(outcomes.len(), 2);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_settings() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(SimulatedTransport::default());
        for settings in [
            SyncSettings {
                status_interval_ms: 0,
                ..fast_settings()
            },
            SyncSettings {
                transfer_failure_rate: f64::NAN,
                ..fast_settings()
            },
        ] {
            let result = SyncRuntime::start_with(
                settings,
                store.clone(),
                Arc::new(FixedLatency::new(&[])),
                transport.clone(),
            )
            .await;
            assert!(matches!(result, Err(SyncError::InvalidSettings(_))));
        }
    }

    #[tokio::test]
    async fn test_offline_delete_leaves_no_relationships_after_replay() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = runtime(fast_settings(), store.clone()).await;
        let cache = runtime.graph_cache("family-1");
        let p1 = cache.add_person(named("P1")).await.unwrap();
        let p2 = cache.add_person(named("P2")).await.unwrap();
        cache
            .add_relationship(&p1.id, &p2.id, "parent", Attributes::new())
            .await
            .unwrap();

        runtime.set_online(false);
        assert!(!cache.delete_person(&p1.id).await);
        assert_eq!(runtime.queue().len().await, 2);

        runtime.set_online(true);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.records("family_relationships").await.is_empty()
                || store.records("family_members").await.len() != 1
            {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(cache.load().await);
        let graph = cache.graph().await;
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].id, p2.id);
        assert!(graph.edges.is_empty());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_persistent_queue_survives_restart() {
        let file = NamedTempFile::new().unwrap();
        let settings = SyncSettings {
            queue_db_path: Some(file.path().to_str().unwrap().to_string()),
            ..fast_settings()
        };
        let store = Arc::new(InMemoryStore::new());

        let first = runtime(settings.clone(), store.clone()).await;
        first.set_online(false);
        first.graph_cache("family-1").add_person(named("Ada")).await.unwrap();
        first.shutdown().await;

        let second = runtime(settings, store.clone()).await;
        assert_eq!(second.queue().len().await, 1);
        let report = second.flush().await;
        assert_eq!(report.applied, 1);
        assert_eq!(store.records("family_members").await.len(), 1);
        second.shutdown().await;
    }
}
