//! Authorization seams consumed by the gossip paths.
//!
//! The real authorization subsystem lives outside this crate; gossip only
//! needs to know whether auth is enabled at the host, and how the session a
//! request arrived on is classified.
use crate::service::{OperationContext, ServiceContext};

/// Host-level authorization state.
pub trait AuthorizationManager: Send + Sync {
    fn is_auth_enabled(&self) -> bool;
}

/// An authorization manager with a fixed answer, derived from settings.
#[derive(Debug)]
pub struct StaticAuthorization {
    enabled: bool,
}

impl StaticAuthorization {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl AuthorizationManager for StaticAuthorization {
    fn is_auth_enabled(&self) -> bool {
        self.enabled
    }
}

/// Per-client authorization state.
pub trait AuthorizationSession: Send + Sync {
    fn is_authenticated(&self) -> bool;
    fn is_using_localhost_bypass(&self) -> bool;
    /// Whether this session holds the privilege to advance the cluster clock
    /// without a verified proof.
    fn is_authorized_to_advance_clock(&self) -> bool;
}

/// A plain session with precomputed answers.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionAuthorization {
    pub authenticated: bool,
    pub localhost_bypass: bool,
    pub may_advance_clock: bool,
}

impl SessionAuthorization {
    pub fn unauthenticated() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            localhost_bypass: false,
            may_advance_clock: false,
        }
    }

    pub fn privileged() -> Self {
        Self {
            authenticated: true,
            localhost_bypass: false,
            may_advance_clock: true,
        }
    }

    pub fn localhost_bypass() -> Self {
        Self {
            authenticated: false,
            localhost_bypass: true,
            may_advance_clock: false,
        }
    }
}

impl AuthorizationSession for SessionAuthorization {
    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn is_using_localhost_bypass(&self) -> bool {
        self.localhost_bypass
    }

    fn is_authorized_to_advance_clock(&self) -> bool {
        self.may_advance_clock
    }
}

/// Whether the caller behind `op_ctx` may advance the clock without proof
/// verification. With auth disabled every caller is trusted; with auth
/// enabled the privilege comes from the client's authorization session.
pub fn is_authorized_to_advance_clock(service: &ServiceContext, op_ctx: &OperationContext) -> bool {
    if !service.authorization().is_auth_enabled() {
        return true;
    }
    op_ctx
        .client()
        .and_then(|client| client.auth_session())
        .is_some_and(|session| session.is_authorized_to_advance_clock())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::service::{Client, ManualClockSource, ServiceContext, SessionTags};
    use crate::settings::Settings;

    fn service_with_auth(enabled: bool) -> Arc<ServiceContext> {
        ServiceContext::with_parts(
            Settings::default(),
            Arc::new(ManualClockSource::new(0)),
            Arc::new(StaticAuthorization::new(enabled)),
        )
    }

    #[test]
    fn test_auth_disabled_authorizes_everyone() {
        let service = service_with_auth(false);
        let op_ctx = OperationContext::detached();
        assert!(is_authorized_to_advance_clock(&service, &op_ctx));
    }

    #[test]
    fn test_auth_enabled_requires_privileged_session() {
        let service = service_with_auth(true);

        let op_ctx = OperationContext::detached();
        assert!(!is_authorized_to_advance_clock(&service, &op_ctx));

        let client = Arc::new(Client::with_auth_session(
            SessionTags::EMPTY,
            Arc::new(SessionAuthorization::authenticated()),
        ));
        let op_ctx = OperationContext::for_client(client);
        assert!(!is_authorized_to_advance_clock(&service, &op_ctx));

        let client = Arc::new(Client::with_auth_session(
            SessionTags::INTERNAL_CLIENT,
            Arc::new(SessionAuthorization::privileged()),
        ));
        let op_ctx = OperationContext::for_client(client);
        assert!(is_authorized_to_advance_clock(&service, &op_ctx));
    }
}
