//! Sync subsystem settings

use crate::error::{SyncError, SyncResult};
use crate::region::Region;
use crate::sync_service::SimulatedTransport;
use crate::tracker::SimulatedLatency;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Master switch for replica synchronization
    pub enabled: bool,
    /// Region treated as authoritative
    pub primary_region: Region,
    /// Secondaries kept in sync, in sweep order
    pub sync_regions: Vec<Region>,
    /// Cadence of latency refresh ticks
    pub status_interval_ms: u64,
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
    /// Local SQLite file for the mutation queue; in-memory when unset
    pub queue_db_path: Option<String>,
    pub transfer_steps: u32,
    pub transfer_step_delay_ms: u64,
    /// Probability in `[0, 1]` that a simulated region transfer fails
    pub transfer_failure_rate: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            primary_region: Region::UsEast1,
            sync_regions: vec![Region::EuWest1, Region::ApSoutheast1],
            status_interval_ms: 5_000,
            latency_min_ms: 50,
            latency_max_ms: 150,
            queue_db_path: None,
            transfer_steps: 10,
            transfer_step_delay_ms: 200,
            transfer_failure_rate: 0.0,
        }
    }
}

impl SyncSettings {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.status_interval_ms == 0 {
            return Err(SyncError::InvalidSettings(
                "status_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.transfer_failure_rate) {
            return Err(SyncError::InvalidSettings(format!(
                "transfer_failure_rate must be within [0, 1], got {}",
                self.transfer_failure_rate
            )));
        }
        Ok(())
    }

    pub fn latency_model(&self) -> SimulatedLatency {
        SimulatedLatency {
            min_ms: self.latency_min_ms,
            max_ms: self.latency_max_ms,
        }
    }

    pub fn transport(&self) -> SimulatedTransport {
        SimulatedTransport {
            steps: self.transfer_steps,
            step_delay: Duration::from_millis(self.transfer_step_delay_ms),
            failure_rate: self.transfer_failure_rate,
        }
    }
}
