//! Failover region selection

use crate::notify::Notifier;
use crate::region::{Region, RegionStatus};

/// Outcome of a failover selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverDecision {
    /// The configured primary is online and stays in charge.
    Primary(Region),
    /// The primary is down; this is the lowest-latency online region.
    Failover(Region),
    /// Nothing is online. Carries the configured primary as a degraded fallback.
    Unavailable(Region),
}

impl FailoverDecision {
    /// The region callers should treat as effectively primary.
    pub fn region(&self) -> Region {
        match self {
            FailoverDecision::Primary(region)
            | FailoverDecision::Failover(region)
            | FailoverDecision::Unavailable(region) => *region,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, FailoverDecision::Unavailable(_))
    }
}

/// Pick the best region given a status snapshot.
///
/// The primary wins whenever it is online, even if a secondary is faster.
/// Ties on latency keep snapshot order.
pub fn select_best_region(primary: Region, statuses: &[RegionStatus]) -> FailoverDecision {
    let mut candidates: Vec<&RegionStatus> =
        statuses.iter().filter(|status| status.is_online()).collect();

    if candidates.is_empty() {
        return FailoverDecision::Unavailable(primary);
    }

    candidates.sort_by_key(|status| status.latency_ms);

    if candidates.iter().any(|status| status.region == primary) {
        return FailoverDecision::Primary(primary);
    }

    match candidates.first() {
        Some(best) => FailoverDecision::Failover(best.region),
        None => FailoverDecision::Unavailable(primary),
    }
}

/// [`select_best_region`] plus user notifications for degraded outcomes.
#[derive(Debug, Clone)]
pub struct FailoverSelector {
    notifier: Notifier,
}

impl FailoverSelector {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    pub fn select(&self, primary: Region, statuses: &[RegionStatus]) -> FailoverDecision {
        let decision = select_best_region(primary, statuses);
        match decision {
            FailoverDecision::Unavailable(_) => {
                self.notifier.error(
                    "No region available",
                    format!("Every replica is offline; staying on {primary} until one recovers"),
                );
            }
            FailoverDecision::Failover(region) => {
                tracing::warn!(primary = %primary, selected = %region, "Failing over");
                self.notifier.warning(
                    "Failover",
                    format!("{primary} is offline; {region} has the lowest latency"),
                );
            }
            FailoverDecision::Primary(_) => {}
        }
        decision
    }
}
