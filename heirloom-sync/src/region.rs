//! Replica regions and their health records

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Replica locations the backend can be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "us-east-1")]
    UsEast1,
    #[serde(rename = "us-west-1")]
    UsWest1,
    #[serde(rename = "eu-west-1")]
    EuWest1,
    #[serde(rename = "eu-central-1")]
    EuCentral1,
    #[serde(rename = "ap-southeast-1")]
    ApSoutheast1,
    #[serde(rename = "ap-northeast-1")]
    ApNortheast1,
    #[serde(rename = "sa-east-1")]
    SaEast1,
}

impl Region {
    pub const ALL: [Region; 7] = [
        Region::UsEast1,
        Region::UsWest1,
        Region::EuWest1,
        Region::EuCentral1,
        Region::ApSoutheast1,
        Region::ApNortheast1,
        Region::SaEast1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::UsEast1 => "us-east-1",
            Region::UsWest1 => "us-west-1",
            Region::EuWest1 => "eu-west-1",
            Region::EuCentral1 => "eu-central-1",
            Region::ApSoutheast1 => "ap-southeast-1",
            Region::ApNortheast1 => "ap-northeast-1",
            Region::SaEast1 => "sa-east-1",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        Region::ALL
            .into_iter()
            .find(|region| region.as_str() == s)
            .ok_or_else(|| SyncError::UnknownRegion(s.to_string()))
    }
}

/// Health of a single replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaHealth {
    Online,
    Syncing,
    Offline,
}

impl ReplicaHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaHealth::Online => "online",
            ReplicaHealth::Syncing => "syncing",
            ReplicaHealth::Offline => "offline",
        }
    }
}

impl fmt::Display for ReplicaHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health record for one region, as published by the replica tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStatus {
    pub region: Region,
    pub status: ReplicaHealth,
    /// Round-trip latency in milliseconds
    pub latency_ms: u64,
    /// `None` means the region has never been synced
    pub last_sync: Option<DateTime<Utc>>,
}

impl RegionStatus {
    pub fn is_online(&self) -> bool {
        self.status == ReplicaHealth::Online
    }
}

/// Optional fields applied together with a status change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub latency_ms: Option<u64>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn synced_at(at: DateTime<Utc>) -> Self {
        Self {
            latency_ms: None,
            last_sync: Some(at),
        }
    }

    pub fn with_latency(latency_ms: u64) -> Self {
        Self {
            latency_ms: Some(latency_ms),
            last_sync: None,
        }
    }
}
