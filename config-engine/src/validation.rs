//! Semantic checks the type system cannot express

use crate::error::{ConfigError, Result};
use crate::HeirloomConfig;
use heirloom_sync::SyncSettings;

/// Check a loaded configuration, reporting every problem at once.
pub fn validate(config: &HeirloomConfig) -> Result<()> {
    let problems = sync_problems(&config.sync);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems))
    }
}

fn sync_problems(sync: &SyncSettings) -> Vec<String> {
    let mut problems = Vec::new();

    if sync.sync_regions.contains(&sync.primary_region) {
        problems.push(format!(
            "sync.sync_regions must not contain the primary region {}",
            sync.primary_region
        ));
    }

    let mut seen = Vec::with_capacity(sync.sync_regions.len());
    for region in &sync.sync_regions {
        if seen.contains(region) {
            problems.push(format!("sync.sync_regions lists {region} more than once"));
        } else {
            seen.push(*region);
        }
    }

    if sync.status_interval_ms == 0 {
        problems.push("sync.status_interval_ms must be positive".to_string());
    }

    if sync.latency_min_ms > sync.latency_max_ms {
        problems.push(format!(
            "sync.latency_min_ms ({}) exceeds sync.latency_max_ms ({})",
            sync.latency_min_ms, sync.latency_max_ms
        ));
    }

    if !(0.0..=1.0).contains(&sync.transfer_failure_rate) {
        problems.push(format!(
            "sync.transfer_failure_rate must be within [0, 1], got {}",
            sync.transfer_failure_rate
        ));
    }

    if sync.transfer_steps == 0 {
        problems.push("sync.transfer_steps must be at least 1".to_string());
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use heirloom_sync::Region;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&HeirloomConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_problem() {
        let mut config = HeirloomConfig::default();
        config.sync.sync_regions = vec![Region::UsEast1, Region::EuWest1, Region::EuWest1];
        config.sync.latency_min_ms = 500;
        config.sync.transfer_failure_rate = f64::NAN;
        config.sync.status_interval_ms = 0;

        let Err(ConfigError::Invalid(problems)) = validate(&config) else {
            panic!("expected validation failure");
        };
        assert_eq!(problems.len(), 5);
        assert!(problems.iter().any(|p| p.contains("primary region us-east-1")));
        assert!(problems.iter().any(|p| p.contains("eu-west-1 more than once")));
    }
}
