//! Per-component wire-format strategies for gossiped times.
//!
//! Each clock component is bound to one strategy in a static registry built
//! at process start. A strategy knows how to append its component's time to
//! an outgoing document and how to extract it from an incoming one, including
//! whatever signing or gating its trust model requires.
use serde_json::Value;
use tracing::debug;

use crate::auth::is_authorized_to_advance_clock;
use crate::clock::{Component, ComponentArray, LogicalTime, SignedLogicalTime, TimeProof};
use crate::error::{ClepsydraError, Result};
use crate::gossip::Document;
use crate::service::{FeatureVersion, OperationContext, ServiceContext};

pub const CLUSTER_TIME_FIELD: &str = "$clusterTime";
pub const CONFIG_TIME_FIELD: &str = "$configTime";

/// Encodes and decodes one component's time on the wire.
pub trait GossipFormat: Send + Sync {
    /// The stable field name this component travels under.
    fn field_name(&self) -> &'static str;

    /// Appends `time` to `out` under the field name. Returns `true` iff a
    /// value was written.
    fn write(
        &self,
        service: &ServiceContext,
        op_ctx: Option<&OperationContext>,
        permit_refresh: bool,
        out: &mut Document,
        time: LogicalTime,
        component: Component,
    ) -> Result<bool>;

    /// Extracts this component's time from `input`. An absent field reads as
    /// the zero time; a wrongly shaped one is a `BadValue`.
    fn read(
        &self,
        service: &ServiceContext,
        op_ctx: Option<&OperationContext>,
        input: &Document,
        could_be_unauthenticated: bool,
        component: Component,
    ) -> Result<LogicalTime>;
}

/// A bare timestamp. Trust is delegated to transport-level authentication.
pub struct Plain {
    field_name: &'static str,
}

impl Plain {
    pub const fn new(field_name: &'static str) -> Self {
        Self { field_name }
    }
}

impl GossipFormat for Plain {
    fn field_name(&self) -> &'static str {
        self.field_name
    }

    fn write(
        &self,
        _service: &ServiceContext,
        _op_ctx: Option<&OperationContext>,
        _permit_refresh: bool,
        out: &mut Document,
        time: LogicalTime,
        _component: Component,
    ) -> Result<bool> {
        out.insert(self.field_name.to_string(), time.to_wire());
        Ok(true)
    }

    fn read(
        &self,
        _service: &ServiceContext,
        _op_ctx: Option<&OperationContext>,
        input: &Document,
        _could_be_unauthenticated: bool,
        _component: Component,
    ) -> Result<LogicalTime> {
        let Some(value) = input.get(self.field_name) else {
            // Nothing to gossip in.
            return Ok(LogicalTime::default());
        };
        LogicalTime::from_wire(value).ok_or_else(|| ClepsydraError::BadValue {
            field: self.field_name,
            detail: "is not a timestamp".to_string(),
        })
    }
}

/// A timestamp wrapped with a keyed proof and the id of the signing key.
///
/// Emission and acceptance both depend on who is on the other end: privileged
/// peers exchange dummy-signed times, everyone else goes through the
/// validator.
pub struct Signed {
    field_name: &'static str,
}

impl Signed {
    pub const fn new(field_name: &'static str) -> Self {
        Self { field_name }
    }

    const TIME_KEY: &'static str = "clusterTime";
    const SIGNATURE_KEY: &'static str = "signature";
    const HASH_KEY: &'static str = "hash";
    const KEY_ID_KEY: &'static str = "keyId";

    fn bad_value(&self, detail: &str) -> ClepsydraError {
        ClepsydraError::BadValue {
            field: self.field_name,
            detail: detail.to_string(),
        }
    }

    fn decode(&self, value: &Value) -> Result<SignedLogicalTime> {
        let obj = value
            .as_object()
            .ok_or_else(|| self.bad_value("is not a document"))?;

        let time = obj
            .get(Self::TIME_KEY)
            .and_then(LogicalTime::from_wire)
            .ok_or_else(|| self.bad_value("is missing a valid clusterTime timestamp"))?;

        let signature = obj
            .get(Self::SIGNATURE_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| self.bad_value("is missing a signature document"))?;

        let proof = signature
            .get(Self::HASH_KEY)
            .and_then(Value::as_str)
            .and_then(TimeProof::from_base64)
            .ok_or_else(|| self.bad_value("signature hash is not a 20-byte blob"))?;

        let key_id = signature
            .get(Self::KEY_ID_KEY)
            .and_then(Value::as_u64)
            .ok_or_else(|| self.bad_value("signature keyId is not an integer"))?;

        Ok(SignedLogicalTime::new(time, proof, key_id))
    }

    fn encode(&self, out: &mut Document, signed: &SignedLogicalTime) {
        let mut signature = Document::new();
        signature.insert(
            Self::HASH_KEY.to_string(),
            Value::String(signed.proof().to_base64()),
        );
        signature.insert(Self::KEY_ID_KEY.to_string(), Value::from(signed.key_id()));

        let mut wrapper = Document::new();
        wrapper.insert(Self::TIME_KEY.to_string(), signed.time().to_wire());
        wrapper.insert(Self::SIGNATURE_KEY.to_string(), Value::Object(signature));

        out.insert(self.field_name.to_string(), Value::Object(wrapper));
    }
}

impl GossipFormat for Signed {
    fn field_name(&self) -> &'static str {
        self.field_name
    }

    fn write(
        &self,
        service: &ServiceContext,
        op_ctx: Option<&OperationContext>,
        permit_refresh: bool,
        out: &mut Document,
        time: LogicalTime,
        _component: Component,
    ) -> Result<bool> {
        let signed = if op_ctx.is_some_and(|ctx| is_authorized_to_advance_clock(service, ctx)) {
            // Privileged clients always receive a dummy-signed time.
            SignedLogicalTime::dummy_signed(time)
        } else {
            // Nodes without a validator (e.g. not yet joined to a cluster) do
            // not return times to unprivileged clients.
            let Some(validator) = service.time_validator() else {
                return Ok(false);
            };

            let signed = match op_ctx {
                Some(ctx) if permit_refresh => validator.sign_logical_time(ctx, time)?,
                _ => validator.try_sign_logical_time(time),
            };

            // No keys were available to sign with.
            if signed.key_id() == 0 {
                return Ok(false);
            }
            signed
        };

        self.encode(out, &signed);
        Ok(true)
    }

    fn read(
        &self,
        service: &ServiceContext,
        op_ctx: Option<&OperationContext>,
        input: &Document,
        could_be_unauthenticated: bool,
        _component: Component,
    ) -> Result<LogicalTime> {
        let Some(value) = input.get(self.field_name) else {
            // Nothing to gossip in.
            return Ok(LogicalTime::default());
        };

        let signed = self.decode(value)?;

        let Some(op_ctx) = op_ctx else {
            // No operation context means this came from a reply, which must
            // be internal and so does not require validation.
            return Ok(signed.time());
        };

        if could_be_unauthenticated
            && service.authorization().is_auth_enabled()
            && signed.proof().is_dummy()
        {
            if let Some(session) = op_ctx.client().and_then(|client| client.auth_session()) {
                if !session.is_authenticated() && !session.is_using_localhost_bypass() {
                    // The client is not authenticated and is not using
                    // localhost bypass. Do not gossip.
                    debug!(
                        field = self.field_name,
                        "dropping unsigned time from unauthenticated client"
                    );
                    return Ok(LogicalTime::default());
                }
            }
        }

        if !is_authorized_to_advance_clock(service, op_ctx) {
            match service.time_validator() {
                None => {
                    return Err(ClepsydraError::CannotVerifyAndSign(format!(
                        "cannot accept time {}; this node may not be part of a cluster",
                        signed.time()
                    )))
                }
                Some(validator) => validator.validate(op_ctx, &signed)?,
            }
        }

        Ok(signed.time())
    }
}

/// Wrapper that suppresses emission of its inner format until the whole
/// cluster is known to understand the field. Input always delegates: a field
/// we can parse is accepted regardless of the gate.
pub struct FullyUpgradedOnly<F> {
    inner: F,
}

impl<F> FullyUpgradedOnly<F> {
    pub const fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: GossipFormat> GossipFormat for FullyUpgradedOnly<F> {
    fn field_name(&self) -> &'static str {
        self.inner.field_name()
    }

    fn write(
        &self,
        service: &ServiceContext,
        op_ctx: Option<&OperationContext>,
        permit_refresh: bool,
        out: &mut Document,
        time: LogicalTime,
        component: Component,
    ) -> Result<bool> {
        if service.feature_compatibility().version() == Some(FeatureVersion::FullyUpgraded) {
            return self
                .inner
                .write(service, op_ctx, permit_refresh, out, time, component);
        }
        Ok(false)
    }

    fn read(
        &self,
        service: &ServiceContext,
        op_ctx: Option<&OperationContext>,
        input: &Document,
        could_be_unauthenticated: bool,
        component: Component,
    ) -> Result<LogicalTime> {
        self.inner
            .read(service, op_ctx, input, could_be_unauthenticated, component)
    }
}

static CLUSTER_TIME_FORMAT: Signed = Signed::new(CLUSTER_TIME_FIELD);
static CONFIG_TIME_FORMAT: FullyUpgradedOnly<Plain> =
    FullyUpgradedOnly::new(Plain::new(CONFIG_TIME_FIELD));

/// The component-indexed strategy table, fixed for the process lifetime.
pub(crate) static FORMATTERS: ComponentArray<&'static (dyn GossipFormat + 'static)> =
    ComponentArray::new([&CLUSTER_TIME_FORMAT, &CONFIG_TIME_FORMAT]);

/// The wire field name of a component, as used in error messages.
pub fn component_name(component: Component) -> &'static str {
    FORMATTERS[component].field_name()
}
