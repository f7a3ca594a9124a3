//! The per-process vector clock: a fixed-arity tuple of monotonically
//! non-decreasing logical times, one per [`Component`], advanced by
//! max-merge and carried on every inter-node message by gossip.
mod rate_limiter;
pub mod time;

pub use time::{
    Component, ComponentArray, LogicalTime, LogicalTimeArray, SignedLogicalTime, TimeProof,
    MAX_COMPONENT_VALUE, TIME_PROOF_LEN,
};

use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tracing::warn;

use crate::error::{ClepsydraError, Result};
use crate::gossip::format::FORMATTERS;
use crate::gossip::Document;
use crate::service::{OperationContext, ServiceContext, SessionTags};

/// Components gossiped to peers inside the cluster's trust domain.
const GOSSIP_INTERNAL_COMPONENTS: &[Component] =
    &[Component::ClusterTime, Component::ConfigTime];

/// Components gossiped to external clients. Configuration state is cluster
/// business and stays inside.
const GOSSIP_EXTERNAL_COMPONENTS: &[Component] = &[Component::ClusterTime];

/// An immutable snapshot of the clock. All components are sampled atomically
/// with respect to advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorTime {
    time: LogicalTimeArray,
}

impl VectorTime {
    pub fn get(&self, component: Component) -> LogicalTime {
        self.time[component]
    }

    pub fn cluster_time(&self) -> LogicalTime {
        self.get(Component::ClusterTime)
    }

    pub fn config_time(&self) -> LogicalTime {
        self.get(Component::ConfigTime)
    }
}

struct ClockState {
    vector_time: LogicalTimeArray,
    enabled: bool,
}

/// The per-process clock container.
///
/// Created at startup with the zero tuple, registered once against the
/// hosting [`ServiceContext`], and shared across worker threads for the
/// process lifetime.
pub struct VectorClock {
    service: OnceLock<Weak<ServiceContext>>,
    inner: Mutex<ClockState>,
}

impl VectorClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            service: OnceLock::new(),
            inner: Mutex::new(ClockState {
                vector_time: LogicalTimeArray::default(),
                enabled: true,
            }),
        })
    }

    /// Installs `clock` as the process-wide clock of `service`. Registering a
    /// clock twice, or a second clock on the same context, is a programmer
    /// error.
    pub fn register(service: &Arc<ServiceContext>, clock: Arc<VectorClock>) {
        assert!(
            clock.service.set(Arc::downgrade(service)).is_ok(),
            "vector clock is already registered to a service context"
        );
        assert!(
            service.vector_clock_slot().set(clock).is_ok(),
            "a vector clock is already registered on this service context"
        );
    }

    /// The clock registered on `service`.
    pub fn get(service: &ServiceContext) -> Arc<VectorClock> {
        service
            .vector_clock_slot()
            .get()
            .cloned()
            .expect("no vector clock registered on this service context")
    }

    fn service(&self) -> Arc<ServiceContext> {
        self.service
            .get()
            .expect("vector clock used before registration")
            .upgrade()
            .expect("service context dropped while the vector clock is alive")
    }

    /// Returns a snapshot of the current tuple. Callers never observe torn
    /// reads.
    pub fn get_time(&self) -> VectorTime {
        let state = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        VectorTime {
            time: state.vector_time,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled
    }

    /// One-way transition used during shutdown or failure modes.
    pub fn disable(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled = false;
    }

    /// Applies a candidate tuple by per-component max-merge.
    ///
    /// The rate limiter runs before the lock is taken; the merge happens
    /// under it. On any error no state changes.
    pub fn advance(&self, new_time: LogicalTimeArray) -> Result<()> {
        rate_limiter::ensure_passes_rate_limiter(&self.service(), &new_time)?;

        let mut state = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !state.enabled {
            return Err(ClepsydraError::ClockDisabled);
        }
        for component in Component::ALL {
            if new_time[component] > state.vector_time[component] {
                state.vector_time[component] = new_time[component];
            }
        }
        Ok(())
    }

    /// Appends this node's time to an outgoing message.
    ///
    /// Returns whether the cluster-time component was emitted; emission of
    /// any other component never affects the return value.
    pub fn gossip_out(
        &self,
        op_ctx: Option<&OperationContext>,
        out: &mut Document,
        default_tags: SessionTags,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let service = self.service();
        let now = self.get_time();

        let mut cluster_time_was_output = false;
        for &component in Self::components_for_tags(resolve_session_tags(op_ctx, default_tags)) {
            cluster_time_was_output |=
                self.gossip_out_component(&service, op_ctx, out, &now, component);
        }
        cluster_time_was_output
    }

    /// Extracts gossiped times from an incoming message and advances the
    /// clock with them. Components absent from the message read as zero and
    /// never move the clock backwards.
    pub fn gossip_in(
        &self,
        op_ctx: Option<&OperationContext>,
        input: &Document,
        could_be_unauthenticated: bool,
        default_tags: SessionTags,
    ) -> Result<()> {
        let service = self.service();

        let mut new_time = LogicalTimeArray::default();
        for &component in Self::components_for_tags(resolve_session_tags(op_ctx, default_tags)) {
            new_time[component] = FORMATTERS[component].read(
                &service,
                op_ctx,
                input,
                could_be_unauthenticated,
                component,
            )?;
        }
        self.advance(new_time)
    }

    fn components_for_tags(tags: SessionTags) -> &'static [Component] {
        if tags.contains(SessionTags::INTERNAL_CLIENT) {
            GOSSIP_INTERNAL_COMPONENTS
        } else {
            GOSSIP_EXTERNAL_COMPONENTS
        }
    }

    fn gossip_out_component(
        &self,
        service: &ServiceContext,
        op_ctx: Option<&OperationContext>,
        out: &mut Document,
        now: &VectorTime,
        component: Component,
    ) -> bool {
        let permit_refresh = service.settings().permit_refresh_during_gossip_out;
        let was_output = match FORMATTERS[component].write(
            service,
            op_ctx,
            permit_refresh,
            out,
            now.get(component),
            component,
        ) {
            Ok(was_output) => was_output,
            Err(err) => {
                // A failed or cancelled signing attempt means this component
                // is not emitted; nothing was written for it.
                warn!(
                    component = crate::gossip::component_name(component),
                    error = %err,
                    "failed to gossip out component"
                );
                false
            }
        };
        // Only cluster-time emission is significant to callers.
        (component == Component::ClusterTime) && was_output
    }

    /// Test hook: zeroes the tuple and re-enables the clock.
    pub fn reset_for_test(&self) {
        let mut state = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.vector_time = LogicalTimeArray::default();
        state.enabled = true;
    }

    /// Test hook: installs a cluster time through the normal advance path.
    /// The rate limiter still runs, so fixtures pin the wall clock or stay
    /// within the drift budget.
    pub fn advance_cluster_time_for_test(&self, new_cluster_time: LogicalTime) -> Result<()> {
        let mut new_time = LogicalTimeArray::default();
        new_time[Component::ClusterTime] = new_cluster_time;
        self.advance(new_time)
    }
}

fn resolve_session_tags(op_ctx: Option<&OperationContext>, default_tags: SessionTags) -> SessionTags {
    op_ctx
        .and_then(|ctx| ctx.client())
        .map(|client| client.session_tags())
        .unwrap_or(default_tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthorization;
    use crate::service::ManualClockSource;
    use crate::settings::Settings;

    fn registered_clock(wall_secs: u64) -> (Arc<ServiceContext>, Arc<VectorClock>) {
        let service = ServiceContext::with_parts(
            Settings::default(),
            Arc::new(ManualClockSource::new(wall_secs)),
            Arc::new(StaticAuthorization::new(false)),
        );
        let clock = VectorClock::new();
        VectorClock::register(&service, clock.clone());
        (service, clock)
    }

    fn tuple(cluster: LogicalTime, config: LogicalTime) -> LogicalTimeArray {
        let mut time = LogicalTimeArray::default();
        time[Component::ClusterTime] = cluster;
        time[Component::ConfigTime] = config;
        time
    }

    #[test]
    fn test_fresh_clock_is_zero_and_enabled() {
        let (_service, clock) = registered_clock(1000);
        let now = clock.get_time();
        assert!(now.cluster_time().is_zero());
        assert!(now.config_time().is_zero());
        assert!(clock.is_enabled());
    }

    #[test]
    fn test_advance_takes_per_component_max() {
        let (_service, clock) = registered_clock(1000);

        clock
            .advance(tuple(LogicalTime::new(100, 5), LogicalTime::new(50, 2)))
            .unwrap();
        clock
            .advance(tuple(LogicalTime::new(90, 9), LogicalTime::new(60, 0)))
            .unwrap();

        let now = clock.get_time();
        assert_eq!(now.cluster_time(), LogicalTime::new(100, 5));
        assert_eq!(now.config_time(), LogicalTime::new(60, 0));
    }

    #[test]
    fn test_partial_tuples_never_regress_components() {
        let (_service, clock) = registered_clock(1000);

        clock
            .advance(tuple(LogicalTime::new(100, 5), LogicalTime::new(50, 2)))
            .unwrap();
        // A candidate with only one slot set leaves the other untouched.
        clock
            .advance_cluster_time_for_test(LogicalTime::new(200, 0))
            .unwrap();

        let now = clock.get_time();
        assert_eq!(now.cluster_time(), LogicalTime::new(200, 0));
        assert_eq!(now.config_time(), LogicalTime::new(50, 2));
    }

    #[test]
    fn test_rejected_advance_leaves_state_untouched() {
        let (_service, clock) = registered_clock(1000);
        clock
            .advance_cluster_time_for_test(LogicalTime::new(500, 1))
            .unwrap();

        // Seconds behind the wall clock pass the drift check, so this fails
        // on the maximum-value check alone.
        let err = clock
            .advance(tuple(
                LogicalTime::new(0, MAX_COMPONENT_VALUE + 1),
                LogicalTime::new(700, 0),
            ))
            .unwrap_err();
        assert!(matches!(err, ClepsydraError::MaxValueExceeded { .. }));

        let now = clock.get_time();
        assert_eq!(now.cluster_time(), LogicalTime::new(500, 1));
        assert!(now.config_time().is_zero());
    }

    #[test]
    fn test_snapshots_are_idempotent() {
        let (_service, clock) = registered_clock(1000);
        clock
            .advance_cluster_time_for_test(LogicalTime::new(10, 1))
            .unwrap();
        assert_eq!(clock.get_time(), clock.get_time());
    }

    #[test]
    fn test_disable_is_one_way_and_rejects_advances() {
        let (_service, clock) = registered_clock(1000);
        clock.disable();
        assert!(!clock.is_enabled());

        let err = clock
            .advance_cluster_time_for_test(LogicalTime::new(10, 1))
            .unwrap_err();
        assert!(matches!(err, ClepsydraError::ClockDisabled));

        // Disabled clocks emit nothing.
        let mut out = Document::new();
        assert!(!clock.gossip_out(None, &mut out, SessionTags::INTERNAL_CLIENT));
        assert!(out.is_empty());
    }

    #[test]
    fn test_reset_for_test_restores_initial_state() {
        let (_service, clock) = registered_clock(1000);
        clock
            .advance_cluster_time_for_test(LogicalTime::new(10, 1))
            .unwrap();
        clock.disable();

        clock.reset_for_test();
        assert!(clock.is_enabled());
        assert!(clock.get_time().cluster_time().is_zero());
    }

    #[test]
    fn test_get_resolves_registered_clock() {
        let (service, clock) = registered_clock(1000);
        assert!(Arc::ptr_eq(&VectorClock::get(&service), &clock));
    }

    #[test]
    #[should_panic(expected = "already registered on this service context")]
    fn test_double_registration_panics() {
        let (service, _clock) = registered_clock(1000);
        VectorClock::register(&service, VectorClock::new());
    }

    #[test]
    #[should_panic(expected = "already registered to a service context")]
    fn test_registering_one_clock_twice_panics() {
        let (service, clock) = registered_clock(1000);
        let other = ServiceContext::with_parts(
            Settings::default(),
            Arc::new(ManualClockSource::new(0)),
            Arc::new(StaticAuthorization::new(false)),
        );
        let _ = service;
        VectorClock::register(&other, clock);
    }

    #[test]
    fn test_concurrent_advances_converge_to_component_max() {
        let (_service, clock) = registered_clock(10_000);

        let mut handles = Vec::new();
        for seconds in 1..=8u32 {
            let clock = clock.clone();
            handles.push(std::thread::spawn(move || {
                for increment in 0..50u32 {
                    clock
                        .advance(LogicalTimeArray::new([
                            LogicalTime::new(seconds, increment),
                            LogicalTime::new(increment, seconds),
                        ]))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let now = clock.get_time();
        assert_eq!(now.cluster_time(), LogicalTime::new(8, 49));
        assert_eq!(now.config_time(), LogicalTime::new(49, 8));
    }
}
