//! Offline-capable synchronization layer for Heirloom family trees
//!
//! Provides:
//! - Mutation queue for writes made while offline, optionally persisted in SQLite
//! - Replica status tracking across regions with simulated latency
//! - Region sync with progress reporting, and queue replay on reconnect
//! - Failover selection and outage simulation
//! - Per-family graph cache with optimistic creates

pub mod error;
pub mod failover;
pub mod graph;
pub mod graph_cache;
pub mod local_db;
pub mod notify;
pub mod outage;
pub mod queue;
pub mod region;
pub mod remote;
pub mod runtime;
pub mod settings;
pub mod sync_service;
pub mod tracker;

pub use error::{RemoteError, SyncError, SyncResult};
pub use failover::{select_best_region, FailoverDecision, FailoverSelector};
pub use graph::{Attributes, FamilyEdge, FamilyGraph, FamilyNode, Position};
pub use graph_cache::{CacheState, GraphCache};
pub use local_db::{LocalDatabase, LocalDbConfig};
pub use notify::{Notification, NotificationLevel, Notifier};
pub use outage::OutageSimulator;
pub use queue::{MutationQueue, Operation, QueueEvent, QueuedOperation};
pub use region::{Region, RegionStatus, ReplicaHealth};
pub use remote::{Filter, InMemoryStore, RemoteStore};
pub use runtime::SyncRuntime;
pub use settings::SyncSettings;
pub use sync_service::{
    FlushReport, FlushSkip, ProgressReporter, RegionTransport, SimulatedTransport, SyncOutcome,
    SyncProgress, SyncService,
};
pub use tracker::{FixedLatency, LatencyProbe, ReplicaSnapshot, ReplicaTracker, SimulatedLatency};
