//! Drift gate for candidate tuples.
//!
//! A stateless predicate run on every candidate before the merge lock is
//! taken: no component may sit further ahead of this node's wall clock than
//! the configured drift budget, and no component may pass the maximum
//! representable value. Rejection is all-or-nothing.
use crate::clock::time::{LogicalTimeArray, MAX_COMPONENT_VALUE};
use crate::error::{ClepsydraError, Result};
use crate::gossip::component_name;
use crate::service::ServiceContext;

pub(crate) fn ensure_passes_rate_limiter(
    service: &ServiceContext,
    new_time: &LogicalTimeArray,
) -> Result<()> {
    let wall_clock_secs = service.wall_clock_secs();
    let max_drift_secs = u64::from(service.settings().max_acceptable_drift_secs);

    for (component, time) in new_time.iter() {
        let new_time_secs = u64::from(time.seconds());

        // Both values are unsigned, so compare them first to avoid wrap-around.
        if !(new_time_secs <= wall_clock_secs
            || new_time_secs - wall_clock_secs <= max_drift_secs)
        {
            return Err(ClepsydraError::DriftExceeded {
                component: component_name(component),
                new_time_secs: time.seconds(),
                wall_clock_secs,
            });
        }

        if time.seconds() > MAX_COMPONENT_VALUE || time.increment() > MAX_COMPONENT_VALUE {
            return Err(ClepsydraError::MaxValueExceeded {
                component: component_name(component),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::StaticAuthorization;
    use crate::clock::time::{Component, LogicalTime};
    use crate::service::ManualClockSource;
    use crate::settings::Settings;

    fn service_at(wall_secs: u64, drift_secs: u32) -> Arc<ServiceContext> {
        let settings = Settings {
            max_acceptable_drift_secs: drift_secs,
            ..Settings::default()
        };
        ServiceContext::with_parts(
            settings,
            Arc::new(ManualClockSource::new(wall_secs)),
            Arc::new(StaticAuthorization::new(false)),
        )
    }

    fn candidate(cluster: LogicalTime) -> LogicalTimeArray {
        let mut time = LogicalTimeArray::default();
        time[Component::ClusterTime] = cluster;
        time
    }

    #[test]
    fn test_drift_boundary_is_inclusive() {
        let service = service_at(1000, 60);

        // Exactly at the budget: accepted.
        let at_budget = candidate(LogicalTime::new(1060, 0));
        assert!(ensure_passes_rate_limiter(&service, &at_budget).is_ok());

        // One past it: rejected.
        let past_budget = candidate(LogicalTime::new(1061, 0));
        let err = ensure_passes_rate_limiter(&service, &past_budget).unwrap_err();
        assert!(matches!(
            err,
            ClepsydraError::DriftExceeded {
                component: "$clusterTime",
                new_time_secs: 1061,
                wall_clock_secs: 1000,
            }
        ));
    }

    #[test]
    fn test_times_behind_wall_clock_always_pass_drift() {
        let service = service_at(1_000_000, 0);
        let old = candidate(LogicalTime::new(5, 3));
        assert!(ensure_passes_rate_limiter(&service, &old).is_ok());
    }

    #[test]
    fn test_max_value_boundary() {
        let service = service_at(u64::from(MAX_COMPONENT_VALUE), 0);

        let at_max = candidate(LogicalTime::new(MAX_COMPONENT_VALUE, MAX_COMPONENT_VALUE));
        assert!(ensure_passes_rate_limiter(&service, &at_max).is_ok());

        // Drift passes (seconds below wall clock) but the increment overflows.
        let over = candidate(LogicalTime::new(0, MAX_COMPONENT_VALUE + 1));
        let err = ensure_passes_rate_limiter(&service, &over).unwrap_err();
        assert!(matches!(
            err,
            ClepsydraError::MaxValueExceeded {
                component: "$clusterTime"
            }
        ));
    }

    #[test]
    fn test_any_failing_component_rejects_the_whole_tuple() {
        let service = service_at(1000, 60);

        let mut time = LogicalTimeArray::default();
        time[Component::ClusterTime] = LogicalTime::new(500, 0);
        time[Component::ConfigTime] = LogicalTime::new(2000, 0);

        let err = ensure_passes_rate_limiter(&service, &time).unwrap_err();
        assert!(matches!(
            err,
            ClepsydraError::DriftExceeded {
                component: "$configTime",
                ..
            }
        ));
    }
}
