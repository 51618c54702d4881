//! Per-family graph cache
//!
//! Holds the in-memory [`FamilyGraph`] for one family and delegates
//! persistence to a [`RemoteStore`]. Writes that cannot reach a region are
//! captured by the [`MutationQueue`]. That covers an offline device, a tracker
//! with no region online and a backend that reports itself unreachable.
//!
//! Creates and updates are not symmetric. A new person or relationship is
//! appended as soon as it is either confirmed or queued, so the editor shows
//! it immediately. Updates and deletes touch the local graph only after the
//! backend confirms them; while offline they are queued and the call returns
//! `false` with the graph unchanged. There is no rollback path for either.

use crate::error::RemoteError;
use crate::failover::select_best_region;
use crate::graph::{Attributes, FamilyEdge, FamilyGraph, FamilyNode, Position};
use crate::notify::Notifier;
use crate::queue::{MutationQueue, Operation};
use crate::remote::{Filter, RemoteStore};
use crate::tracker::ReplicaTracker;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const MEMBERS_TABLE: &str = "family_members";
pub const RELATIONSHIPS_TABLE: &str = "family_relationships";

// Drain order for queued graph writes: people before the edges that
// reference them, and removals last.
const PRIORITY_ADD_PERSON: i32 = 3;
const PRIORITY_ADD_RELATIONSHIP: i32 = 2;
const PRIORITY_UPDATE: i32 = 1;
const PRIORITY_DELETE: i32 = 0;

// Record fields owned by the cache rather than the attribute bag
const RESERVED_FIELDS: [&str; 4] = ["id", "family_id", "position_x", "position_y"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheState {
    pub loading: bool,
    pub loaded: bool,
    /// Message of the last failed load, cleared by the next attempt
    pub error: Option<String>,
}

/// Result of handing one write to the backend
enum Persisted {
    Confirmed(Value),
    Queued,
    Failed(RemoteError),
}

struct Inner {
    graph: FamilyGraph,
    state: CacheState,
}

pub struct GraphCache {
    family_id: String,
    store: Arc<dyn RemoteStore>,
    queue: Arc<MutationQueue>,
    tracker: Arc<ReplicaTracker>,
    notifier: Notifier,
    inner: RwLock<Inner>,
}

impl GraphCache {
    pub fn new(
        family_id: impl Into<String>,
        store: Arc<dyn RemoteStore>,
        queue: Arc<MutationQueue>,
        tracker: Arc<ReplicaTracker>,
        notifier: Notifier,
    ) -> Self {
        Self {
            family_id: family_id.into(),
            store,
            queue,
            tracker,
            notifier,
            inner: RwLock::new(Inner {
                graph: FamilyGraph::default(),
                state: CacheState::default(),
            }),
        }
    }

    pub fn family_id(&self) -> &str {
        &self.family_id
    }

    /// Copy of the current graph
    pub async fn graph(&self) -> FamilyGraph {
        self.inner.read().await.graph.clone()
    }

    pub async fn state(&self) -> CacheState {
        self.inner.read().await.state.clone()
    }

    /// Fetch members and relationships and rebuild the graph wholesale.
    ///
    /// On failure the previous graph is kept and the error is recorded in
    /// [`CacheState::error`].
    pub async fn load(&self) -> bool {
        {
            let mut inner = self.inner.write().await;
            inner.state.loading = true;
            inner.state.error = None;
        }

        let result = self.fetch().await;

        let mut inner = self.inner.write().await;
        inner.state.loading = false;
        match result {
            Ok(graph) => {
                tracing::info!(
                    family_id = %self.family_id,
                    members = graph.nodes.len(),
                    relationships = graph.edges.len(),
                    "Loaded family graph"
                );
                inner.graph = graph;
                inner.state.loaded = true;
                true
            }
            Err(e) => {
                inner.state.error = Some(e.to_string());
                drop(inner);
                self.notifier
                    .error("Failed to load family tree", e.to_string());
                false
            }
        }
    }

    async fn fetch(&self) -> Result<FamilyGraph, RemoteError> {
        let mut filter = Filter::new();
        filter.insert("family_id".to_string(), Value::String(self.family_id.clone()));

        let members = self.store.query(MEMBERS_TABLE, &filter).await?;
        let relationships = self.store.query(RELATIONSHIPS_TABLE, &filter).await?;

        let mut graph = FamilyGraph::default();
        for record in &members {
            match node_from_record(record) {
                Some(node) => graph.upsert_node(node),
                None => tracing::warn!(family_id = %self.family_id, "Skipping malformed member record"),
            }
        }
        for record in &relationships {
            match edge_from_record(record) {
                Some(edge) => graph.push_edge(edge),
                None => tracing::warn!(
                    family_id = %self.family_id,
                    "Skipping malformed relationship record"
                ),
            }
        }
        Ok(graph)
    }

    /// Add a person with a client-generated id.
    ///
    /// The node is appended once the backend confirms it or the write is
    /// queued. Returns `None` if the backend rejected it.
    pub async fn add_person(&self, attributes: Attributes) -> Option<FamilyNode> {
        let id = Uuid::new_v4().to_string();
        let position = self.inner.read().await.graph.next_position();
        let node = FamilyNode::person(id, position, strip_reserved(attributes));
        let record = self.member_record(&node);
        let person = logger_redacted::fingerprint(&display_name(&node.data));

        let operation = Operation::Create {
            table: MEMBERS_TABLE.to_string(),
        };
        let node = match self.persist(operation, record, PRIORITY_ADD_PERSON).await {
            Persisted::Confirmed(record) => node_from_record(&record).unwrap_or(node),
            Persisted::Queued => node,
            Persisted::Failed(e) => {
                tracing::warn!(family_id = %self.family_id, person = %person, error = %e, "Person not saved");
                self.notifier.error("Could not add person", e.to_string());
                return None;
            }
        };

        tracing::debug!(family_id = %self.family_id, node_id = %node.id, person = %person, "Person added");
        self.inner.write().await.graph.upsert_node(node.clone());
        Some(node)
    }

    /// Link two people already present in the graph.
    pub async fn add_relationship(
        &self,
        source: &str,
        target: &str,
        kind: &str,
        metadata: Attributes,
    ) -> Option<FamilyEdge> {
        let missing = {
            let inner = self.inner.read().await;
            [source, target]
                .into_iter()
                .find(|endpoint| !inner.graph.contains_node(endpoint))
        };
        if let Some(endpoint) = missing {
            tracing::warn!(
                family_id = %self.family_id,
                node_id = endpoint,
                "Relationship references unknown person"
            );
            self.notifier.warning(
                "Could not add relationship",
                format!("person {endpoint} is not part of this family tree"),
            );
            return None;
        }

        let deleting = self.pending_member_deletes().await;
        if let Some(endpoint) = [source, target]
            .into_iter()
            .find(|endpoint| deleting.iter().any(|id| id == endpoint))
        {
            tracing::warn!(
                family_id = %self.family_id,
                node_id = endpoint,
                "Relationship references a person with a queued delete"
            );
            self.notifier.warning(
                "Could not add relationship",
                format!("person {endpoint} is waiting to be deleted"),
            );
            return None;
        }

        let edge = FamilyEdge {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            target: target.to_string(),
            kind: kind.to_string(),
            metadata,
        };
        let record = self.relationship_record(&edge);

        let operation = Operation::Create {
            table: RELATIONSHIPS_TABLE.to_string(),
        };
        let edge = match self.persist(operation, record, PRIORITY_ADD_RELATIONSHIP).await {
            Persisted::Confirmed(record) => edge_from_record(&record).unwrap_or(edge),
            Persisted::Queued => edge,
            Persisted::Failed(e) => {
                self.notifier
                    .error("Could not add relationship", e.to_string());
                return None;
            }
        };

        tracing::debug!(
            family_id = %self.family_id,
            edge_id = %edge.id,
            kind = %edge.kind,
            "Relationship added"
        );
        self.inner.write().await.graph.push_edge(edge.clone());
        Some(edge)
    }

    /// Merge `changes` into a person's attributes after the backend accepts
    /// them. Returns `false` when queued or rejected; the graph is unchanged
    /// in both cases.
    pub async fn update_person(&self, id: &str, changes: Attributes) -> bool {
        if !self.inner.read().await.graph.contains_node(id) {
            self.notifier
                .warning("Could not update person", format!("person {id} is not loaded"));
            return false;
        }

        let changes = strip_reserved(changes);
        let operation = Operation::Update {
            table: MEMBERS_TABLE.to_string(),
            id: id.to_string(),
        };
        match self
            .persist(operation, Value::Object(changes.clone()), PRIORITY_UPDATE)
            .await
        {
            Persisted::Confirmed(_) => {
                self.inner.write().await.graph.merge_node_data(id, &changes);
                tracing::debug!(family_id = %self.family_id, node_id = id, fields = changes.len(), "Person updated");
                true
            }
            Persisted::Queued => false,
            Persisted::Failed(e) => {
                self.notifier.error("Could not update person", e.to_string());
                false
            }
        }
    }

    /// Remove a person and every relationship touching them once the
    /// backend confirms. Returns `false` when queued or rejected.
    ///
    /// A queued delete carries the relationship deletes with it, so the
    /// replayed queue leaves no edge pointing at the removed person.
    pub async fn delete_person(&self, id: &str) -> bool {
        let operation = Operation::Delete {
            table: MEMBERS_TABLE.to_string(),
            id: id.to_string(),
        };
        match self.persist(operation, Value::Null, PRIORITY_DELETE).await {
            Persisted::Confirmed(_) => {}
            Persisted::Queued => {
                let touching = self.edges_touching(id).await;
                for edge_id in &touching {
                    let operation = Operation::Delete {
                        table: RELATIONSHIPS_TABLE.to_string(),
                        id: edge_id.clone(),
                    };
                    self.queue.enqueue(operation, Value::Null, PRIORITY_DELETE).await;
                }
                tracing::debug!(
                    family_id = %self.family_id,
                    node_id = id,
                    relationships = touching.len(),
                    "Person delete queued"
                );
                return false;
            }
            Persisted::Failed(e) => {
                self.notifier.error("Could not delete person", e.to_string());
                return false;
            }
        }

        let orphaned = self.edges_touching(id).await;
        self.inner.write().await.graph.remove_node(id);

        tracing::debug!(
            family_id = %self.family_id,
            node_id = id,
            relationships = orphaned.len(),
            "Person deleted"
        );

        for edge_id in orphaned {
            let operation = Operation::Delete {
                table: RELATIONSHIPS_TABLE.to_string(),
                id: edge_id.clone(),
            };
            if let Persisted::Failed(e) = self.persist(operation, Value::Null, PRIORITY_DELETE).await {
                tracing::warn!(edge_id = %edge_id, error = %e, "Failed to remove relationship of deleted person");
            }
        }
        true
    }

    async fn edges_touching(&self, id: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .graph
            .edges
            .iter()
            .filter(|edge| edge.touches(id))
            .map(|edge| edge.id.clone())
            .collect()
    }

    /// Member ids with a delete still waiting in the queue
    async fn pending_member_deletes(&self) -> Vec<String> {
        self.queue
            .snapshot()
            .await
            .into_iter()
            .filter_map(|op| match op.operation {
                Operation::Delete { table, id } if table == MEMBERS_TABLE => Some(id),
                _ => None,
            })
            .collect()
    }

    fn region_available(&self) -> bool {
        let snapshot = self.tracker.snapshot();
        select_best_region(snapshot.primary, &snapshot.regions).is_available()
    }

    /// Send one write to the backend, or queue it when no region can take it.
    async fn persist(&self, operation: Operation, payload: Value, priority: i32) -> Persisted {
        if !self.queue.is_online() {
            return self.enqueue(operation, payload, priority).await;
        }
        if !self.region_available() {
            tracing::warn!(
                action = operation.name(),
                table = operation.table(),
                "No region online, queueing write"
            );
            return self.enqueue(operation, payload, priority).await;
        }

        let result = match &operation {
            Operation::Create { table } => self.store.create(table, payload.clone()).await,
            Operation::Update { table, id } => self.store.update(table, id, payload.clone()).await,
            Operation::Delete { table, id } => match self.store.delete(table, id).await {
                Ok(()) | Err(RemoteError::NotFound { .. }) => Ok(Value::Null),
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(record) => Persisted::Confirmed(record),
            Err(e) if e.is_connectivity() => {
                tracing::warn!(
                    action = operation.name(),
                    table = operation.table(),
                    error = %e,
                    "Backend unreachable, queueing write"
                );
                self.enqueue(operation, payload, priority).await
            }
            Err(e) => Persisted::Failed(e),
        }
    }

    async fn enqueue(&self, operation: Operation, payload: Value, priority: i32) -> Persisted {
        let description = format!("{} on {} will sync when back online", operation.name(), operation.table());
        self.queue.enqueue(operation, payload, priority).await;
        self.notifier.info("Saved offline", description);
        Persisted::Queued
    }

    fn member_record(&self, node: &FamilyNode) -> Value {
        let mut record = node.data.clone();
        record.insert("id".to_string(), Value::String(node.id.clone()));
        record.insert("family_id".to_string(), Value::String(self.family_id.clone()));
        record.insert("position_x".to_string(), Value::from(node.position.x));
        record.insert("position_y".to_string(), Value::from(node.position.y));
        Value::Object(record)
    }

    fn relationship_record(&self, edge: &FamilyEdge) -> Value {
        serde_json::json!({
            "id": edge.id,
            "family_id": self.family_id,
            "source_id": edge.source,
            "target_id": edge.target,
            "relationship_type": edge.kind,
            "metadata": edge.metadata,
        })
    }
}

fn strip_reserved(mut attributes: Attributes) -> Attributes {
    for field in RESERVED_FIELDS {
        attributes.remove(field);
    }
    attributes
}

fn display_name(data: &Attributes) -> String {
    data.get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn node_from_record(record: &Value) -> Option<FamilyNode> {
    let fields = record.as_object()?;
    let id = fields.get("id")?.as_str()?.to_string();
    let position = Position {
        x: fields.get("position_x").and_then(Value::as_f64).unwrap_or_default(),
        y: fields.get("position_y").and_then(Value::as_f64).unwrap_or_default(),
    };
    Some(FamilyNode::person(id, position, strip_reserved(fields.clone())))
}

fn edge_from_record(record: &Value) -> Option<FamilyEdge> {
    let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);
    Some(FamilyEdge {
        id: text("id")?,
        source: text("source_id")?,
        target: text("target_id")?,
        kind: text("relationship_type")?,
        metadata: record
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    })
}
