//! Mutation queue for writes that could not reach the backend
//!
//! The queue is an explicitly constructed object: open it at startup, share it
//! behind an `Arc`, close it at shutdown. Every change is broadcast as a
//! [`QueueEvent`] to any number of subscribers; dropping a receiver
//! unsubscribes it.
//!
//! Delivery is at-least-once. A consumer that fails part-way through a drain
//! hands the unprocessed operations back through [`MutationQueue::requeue`].

use crate::local_db::{LocalDatabase, LocalDbConfig};
use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 128;

/// Named write action replayed against the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Operation {
    Create { table: String },
    Update { table: String, id: String },
    Delete { table: String, id: String },
}

impl Operation {
    pub fn table(&self) -> &str {
        match self {
            Operation::Create { table }
            | Operation::Update { table, .. }
            | Operation::Delete { table, .. } => table,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
        }
    }
}

/// A pending write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    /// Insertion order, used to keep FIFO order within a priority
    pub seq: i64,
    pub operation: Operation,
    pub data: serde_json::Value,
    /// Higher drains first
    pub priority: i32,
    /// Number of failed replay attempts
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    Changed { pending: usize },
    Connectivity { online: bool },
}

struct QueueState {
    pending: Vec<QueuedOperation>,
    next_seq: i64,
}

pub struct MutationQueue {
    state: Mutex<QueueState>,
    store: Option<LocalDatabase>,
    online: AtomicBool,
    events: broadcast::Sender<QueueEvent>,
}

impl MutationQueue {
    /// Queue kept in memory only
    pub fn in_memory() -> Self {
        Self::with_state(Vec::new(), None)
    }

    /// Queue backed by a local SQLite file; previously persisted operations
    /// are loaded back.
    pub async fn open(config: LocalDbConfig) -> SyncResult<Self> {
        let store = LocalDatabase::new(config).await?;
        let pending = store.load_pending().await?;
        if !pending.is_empty() {
            tracing::info!(pending = pending.len(), "Restored queued mutations");
        }
        Ok(Self::with_state(pending, Some(store)))
    }

    fn with_state(pending: Vec<QueuedOperation>, store: Option<LocalDatabase>) -> Self {
        let next_seq = pending.iter().map(|op| op.seq).max().unwrap_or(0) + 1;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(QueueState { pending, next_seq }),
            store,
            online: AtomicBool::new(true),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Append an operation. Never fails: if the local file cannot be written
    /// the operation is still held in memory.
    pub async fn enqueue(
        &self,
        operation: Operation,
        data: serde_json::Value,
        priority: i32,
    ) -> Uuid {
        let mut state = self.state.lock().await;
        let op = QueuedOperation {
            id: Uuid::new_v4(),
            seq: state.next_seq,
            operation,
            data,
            priority,
            attempts: 0,
            created_at: Utc::now(),
        };
        state.next_seq += 1;

        if let Some(store) = &self.store {
            if let Err(e) = store.insert(&op).await {
                tracing::warn!(operation_id = %op.id, error = %e, "Failed to persist queued mutation");
            }
        }

        tracing::debug!(
            operation_id = %op.id,
            action = op.operation.name(),
            table = op.operation.table(),
            priority = op.priority,
            "Queued mutation"
        );

        let id = op.id;
        state.pending.push(op);
        self.emit(QueueEvent::Changed {
            pending: state.pending.len(),
        });
        id
    }

    /// Take every pending operation, highest priority first and FIFO within a
    /// priority. The queue is empty afterwards.
    pub async fn drain(&self) -> Vec<QueuedOperation> {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            return Vec::new();
        }

        let mut drained = std::mem::take(&mut state.pending);
        sort_for_drain(&mut drained);

        if let Some(store) = &self.store {
            let ids: Vec<Uuid> = drained.iter().map(|op| op.id).collect();
            if let Err(e) = store.remove(&ids).await {
                // Rows left behind are replayed again after a restart.
                tracing::warn!(error = %e, "Failed to remove drained mutations from local store");
            }
        }

        tracing::debug!(count = drained.len(), "Drained mutation queue");
        self.emit(QueueEvent::Changed { pending: 0 });
        drained
    }

    /// Put operations back after a failed replay, counting the attempt.
    pub async fn requeue(&self, ops: Vec<QueuedOperation>) {
        if ops.is_empty() {
            return;
        }

        let mut state = self.state.lock().await;
        for mut op in ops {
            op.attempts += 1;
            if let Some(store) = &self.store {
                if let Err(e) = store.insert(&op).await {
                    tracing::warn!(operation_id = %op.id, error = %e, "Failed to persist requeued mutation");
                }
            }
            state.pending.push(op);
        }

        self.emit(QueueEvent::Changed {
            pending: state.pending.len(),
        });
    }

    /// Drop a pending operation without replaying it.
    pub async fn discard(&self, id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.retain(|op| op.id != id);
        if state.pending.len() == before {
            return false;
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.remove(&[id]).await {
                tracing::warn!(operation_id = %id, error = %e, "Failed to remove discarded mutation");
            }
        }

        self.emit(QueueEvent::Changed {
            pending: state.pending.len(),
        });
        true
    }

    /// Pending operations in drain order, without removing them.
    pub async fn snapshot(&self) -> Vec<QueuedOperation> {
        let mut ops = self.state.lock().await.pending.clone();
        sort_for_drain(&mut ops);
        ops
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record a device connectivity change.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        if online {
            tracing::info!("Connectivity restored");
        } else {
            tracing::warn!("Connectivity lost, writes will be queued");
        }
        self.emit(QueueEvent::Connectivity { online });
    }

    /// Close the local store, if any.
    pub async fn close(&self) {
        if let Some(store) = &self.store {
            store.close().await;
        }
    }

    fn emit(&self, event: QueueEvent) {
        // Nobody listening is not an error.
        let _ = self.events.send(event);
    }
}

fn sort_for_drain(ops: &mut [QueuedOperation]) {
    ops.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::NamedTempFile;

    fn create(table: &str) -> Operation {
        Operation::Create {
            table: table.to_string(),
        }
    }

    #[tokio::test]
    async fn test_drain_returns_everything_enqueued() {
        let queue = MutationQueue::in_memory();
        let a = queue.enqueue(create("family_members"), serde_json::json!({"n": 1}), 1).await;
        let b = queue.enqueue(create("family_members"), serde_json::json!({"n": 2}), 3).await;
        let c = queue.enqueue(create("family_members"), serde_json::json!({"n": 3}), 2).await;

        let drained = queue.drain().await;
        let ids: HashSet<Uuid> = drained.iter().map(|op| op.id).collect();
        assert_eq!(ids, HashSet::from([a, b, c]));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_orders_by_priority_then_fifo() {
        let queue = MutationQueue::in_memory();
        queue.enqueue(create("a"), serde_json::json!({}), 1).await;
        queue.enqueue(create("b"), serde_json::json!({}), 3).await;
        queue.enqueue(create("c"), serde_json::json!({}), 2).await;
        queue.enqueue(create("d"), serde_json::json!({}), 3).await;

        let tables: Vec<String> = queue
            .drain()
            .await
            .iter()
            .map(|op| op.operation.table().to_string())
            .collect();
        assert_eq!(tables, vec!["b", "d", "c", "a"]);
    }

    #[tokio::test]
    async fn test_requeue_counts_attempts() {
        let queue = MutationQueue::in_memory();
        queue.enqueue(create("family_members"), serde_json::json!({}), 0).await;

        let drained = queue.drain().await;
        queue.requeue(drained).await;

        let pending = queue.snapshot().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_discard() {
        let queue = MutationQueue::in_memory();
        let id = queue.enqueue(create("family_members"), serde_json::json!({}), 0).await;
        assert!(queue.discard(id).await);
        assert!(!queue.discard(id).await);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_events_reach_every_subscriber() {
        let queue = MutationQueue::in_memory();
        let mut badge = queue.subscribe();
        let mut logger = queue.subscribe();

        queue.enqueue(create("family_members"), serde_json::json!({}), 0).await;
        queue.set_online(false);
        queue.set_online(false);

        for rx in [&mut badge, &mut logger] {
            assert_eq!(rx.recv().await.unwrap(), QueueEvent::Changed { pending: 1 });
            assert_eq!(
                rx.recv().await.unwrap(),
                QueueEvent::Connectivity { online: false }
            );
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_persisted_queue_survives_reopen() {
        let file = NamedTempFile::new().unwrap();
        let config = LocalDbConfig {
            db_path: file.path().to_str().unwrap().to_string(),
            max_connections: 1,
            enable_wal: false,
        };

        let queue = MutationQueue::open(config.clone()).await.unwrap();
        queue.enqueue(create("family_members"), serde_json::json!({"name": "Ada"}), 2).await;
        queue.enqueue(create("family_relationships"), serde_json::json!({}), 1).await;
        queue.close().await;

        let reopened = MutationQueue::open(config.clone()).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        let drained = reopened.drain().await;
        assert_eq!(drained[0].data, serde_json::json!({"name": "Ada"}));

        // New ids keep increasing after a restore
        let id = reopened.enqueue(create("family_members"), serde_json::json!({}), 0).await;
        let pending = reopened.snapshot().await;
        assert_eq!(pending[0].id, id);
        assert!(pending[0].seq > drained[0].seq);
        reopened.close().await;

        let emptied = MutationQueue::open(config).await.unwrap();
        assert_eq!(emptied.len().await, 1);
    }
}
