//! Process-wide service context and per-operation context.
//!
//! The service context is the object everything else hangs off: the wall
//! clock source, the authorization manager, the optional time validator, the
//! feature-compatibility snapshot, and the slot the vector clock is
//! registered into. Operations carry an [`OperationContext`] that may point
//! at the client they run on behalf of.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::auth::{AuthorizationManager, AuthorizationSession, StaticAuthorization};
use crate::clock::VectorClock;
use crate::settings::Settings;
use crate::validator::LogicalTimeValidator;

/// Source of wall-clock time. Swapped out for a manual source in tests that
/// exercise the drift gate.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The real system clock.
#[derive(Debug, Default)]
pub struct SystemClockSource;

impl ClockSource for SystemClockSource {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock source pinned to an explicit number of seconds since the epoch.
#[derive(Debug, Default)]
pub struct ManualClockSource {
    secs: AtomicU64,
}

impl ManualClockSource {
    pub fn new(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
        }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClockSource {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.secs.load(Ordering::SeqCst))
    }
}

/// Bitmask classifying the session a request arrived on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionTags(u32);

impl SessionTags {
    pub const EMPTY: SessionTags = SessionTags(0);

    /// The peer is part of the cluster's trust domain.
    pub const INTERNAL_CLIENT: SessionTags = SessionTags(1 << 0);

    pub const fn contains(self, tags: SessionTags) -> bool {
        self.0 & tags.0 == tags.0
    }

    pub const fn with(self, tags: SessionTags) -> SessionTags {
        SessionTags(self.0 | tags.0)
    }
}

/// The session a request arrived on: its tags plus an authorization session
/// when the host performs authentication.
#[derive(Clone)]
pub struct Client {
    session_tags: SessionTags,
    auth_session: Option<Arc<dyn AuthorizationSession>>,
}

impl Client {
    pub fn new(session_tags: SessionTags) -> Self {
        Self {
            session_tags,
            auth_session: None,
        }
    }

    pub fn with_auth_session(
        session_tags: SessionTags,
        auth_session: Arc<dyn AuthorizationSession>,
    ) -> Self {
        Self {
            session_tags,
            auth_session: Some(auth_session),
        }
    }

    pub fn session_tags(&self) -> SessionTags {
        self.session_tags
    }

    pub fn auth_session(&self) -> Option<&Arc<dyn AuthorizationSession>> {
        self.auth_session.as_ref()
    }
}

/// Per-operation context. Internal replies and background work run detached,
/// without a client.
#[derive(Clone, Default)]
pub struct OperationContext {
    client: Option<Arc<Client>>,
}

impl OperationContext {
    /// A context with no client attached.
    pub fn detached() -> Self {
        Self { client: None }
    }

    pub fn for_client(client: Arc<Client>) -> Self {
        Self {
            client: Some(client),
        }
    }

    pub fn client(&self) -> Option<&Arc<Client>> {
        self.client.as_ref()
    }
}

/// Cluster-wide readiness of this binary's newest protocol features.
///
/// Uninitialized at startup; initialized once the node has learned the
/// cluster's state. Gossip emission of newer fields is gated on the snapshot
/// reading [`FeatureVersion::FullyUpgraded`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeatureVersion {
    FullyDowngraded,
    Downgrading,
    Upgrading,
    FullyUpgraded,
}

#[derive(Debug, Default)]
pub struct FeatureCompatibility {
    version: RwLock<Option<FeatureVersion>>,
}

impl FeatureCompatibility {
    pub fn is_initialized(&self) -> bool {
        self.version().is_some()
    }

    pub fn version(&self) -> Option<FeatureVersion> {
        *self
            .version
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_version(&self, version: FeatureVersion) {
        *self
            .version
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(version);
    }
}

/// Process-wide context hosting the vector clock and its collaborators.
pub struct ServiceContext {
    settings: Settings,
    clock_source: Arc<dyn ClockSource>,
    authorization: Arc<dyn AuthorizationManager>,
    validator: RwLock<Option<Arc<dyn LogicalTimeValidator>>>,
    feature_compatibility: FeatureCompatibility,
    vector_clock: OnceLock<Arc<VectorClock>>,
}

impl ServiceContext {
    /// A context backed by the system clock and static authorization derived
    /// from settings. No validator is installed.
    pub fn new(settings: Settings) -> Arc<Self> {
        let authorization = Arc::new(StaticAuthorization::new(settings.auth_enabled));
        Self::with_parts(settings, Arc::new(SystemClockSource), authorization)
    }

    /// A context with explicit collaborators. Tests use this to pin the wall
    /// clock and control authorization.
    pub fn with_parts(
        settings: Settings,
        clock_source: Arc<dyn ClockSource>,
        authorization: Arc<dyn AuthorizationManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            clock_source,
            authorization,
            validator: RwLock::new(None),
            feature_compatibility: FeatureCompatibility::default(),
            vector_clock: OnceLock::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn clock_source(&self) -> &dyn ClockSource {
        self.clock_source.as_ref()
    }

    /// Wall-clock seconds since the epoch, floored.
    pub fn wall_clock_secs(&self) -> u64 {
        self.clock_source
            .now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }

    pub fn authorization(&self) -> &dyn AuthorizationManager {
        self.authorization.as_ref()
    }

    pub fn time_validator(&self) -> Option<Arc<dyn LogicalTimeValidator>> {
        self.validator
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn set_time_validator(&self, validator: Arc<dyn LogicalTimeValidator>) {
        *self
            .validator
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(validator);
    }

    pub fn feature_compatibility(&self) -> &FeatureCompatibility {
        &self.feature_compatibility
    }

    pub(crate) fn vector_clock_slot(&self) -> &OnceLock<Arc<VectorClock>> {
        &self.vector_clock
    }
}
