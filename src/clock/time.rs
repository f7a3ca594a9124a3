//! Logical time value types shared by the clock container and the gossip
//! formats.
use std::fmt;
use std::ops::{Index, IndexMut};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

/// Upper bound for both fields of a [`LogicalTime`].
///
/// Times at or below this value survive a signed 32-bit round trip through
/// every driver and peer we talk to, so the clock refuses to advance past it.
pub const MAX_COMPONENT_VALUE: u32 = (1 << 31) - 1;

/// A cluster-wide logical timestamp: a `(seconds, increment)` pair ordered
/// lexicographically.
///
/// The default value is the zero time, which compares less than any positive
/// time. The zero time doubles as "absent on the wire": gossip decoding maps a
/// missing field to zero, and the strict-greater merge in the clock container
/// makes that reading a no-op.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalTime {
    seconds: u32,
    increment: u32,
}

impl LogicalTime {
    pub const fn new(seconds: u32, increment: u32) -> Self {
        Self { seconds, increment }
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.increment == 0
    }

    /// Packs both fields into one big-endian word. This is the byte layout the
    /// time proof is computed over.
    pub fn as_packed(&self) -> u64 {
        (u64::from(self.seconds) << 32) | u64::from(self.increment)
    }

    /// Wire representation: `{"t": <seconds>, "i": <increment>}`.
    pub fn to_wire(&self) -> Value {
        json!({"t": self.seconds, "i": self.increment})
    }

    /// Parses the wire representation. Returns `None` for anything that is
    /// not a two-field timestamp object with unsigned 32-bit values.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 2 {
            return None;
        }
        let seconds = u32::try_from(obj.get("t")?.as_u64()?).ok()?;
        let increment = u32::try_from(obj.get("i")?.as_u64()?).ok()?;
        Some(Self { seconds, increment })
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.seconds, self.increment)
    }
}

/// One channel of the vector clock. The ordinal order is the wire order and
/// the iteration order of [`ComponentArray`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    ClusterTime = 0,
    ConfigTime = 1,
}

impl Component {
    pub const COUNT: usize = 2;

    /// All components in ordinal order.
    pub const ALL: [Component; Component::COUNT] = [Component::ClusterTime, Component::ConfigTime];

    pub const fn ordinal(self) -> usize {
        self as usize
    }
}

/// A fixed-length tuple with one slot per [`Component`], indexed by ordinal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentArray<T>([T; Component::COUNT]);

impl<T> ComponentArray<T> {
    pub const fn new(values: [T; Component::COUNT]) -> Self {
        Self(values)
    }

    /// Iterates slots in component ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = (Component, &T)> {
        Component::ALL.iter().copied().zip(self.0.iter())
    }
}

impl<T: Default + Copy> Default for ComponentArray<T> {
    fn default() -> Self {
        Self([T::default(); Component::COUNT])
    }
}

impl<T> Index<Component> for ComponentArray<T> {
    type Output = T;

    fn index(&self, component: Component) -> &T {
        &self.0[component.ordinal()]
    }
}

impl<T> IndexMut<Component> for ComponentArray<T> {
    fn index_mut(&mut self, component: Component) -> &mut T {
        &mut self.0[component.ordinal()]
    }
}

/// A candidate or current tuple of logical times.
pub type LogicalTimeArray = ComponentArray<LogicalTime>;

/// Length of a time proof in bytes (a keyed SHA-1 block).
pub const TIME_PROOF_LEN: usize = 20;

/// A 20-byte keyed hash proving a logical time was issued by a key holder.
///
/// The all-zero proof is the "dummy" proof used on paths where the peer is
/// trusted through other means and no key material is consulted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TimeProof([u8; TIME_PROOF_LEN]);

impl TimeProof {
    pub const DUMMY: TimeProof = TimeProof([0u8; TIME_PROOF_LEN]);

    pub const fn new(bytes: [u8; TIME_PROOF_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; TIME_PROOF_LEN]>::try_from(bytes).ok().map(Self)
    }

    pub fn is_dummy(&self) -> bool {
        *self == Self::DUMMY
    }

    pub fn as_bytes(&self) -> &[u8; TIME_PROOF_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        let bytes = BASE64.decode(encoded).ok()?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for TimeProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeProof({})", self.to_base64())
    }
}

/// A logical time together with its proof and the id of the key that made it.
///
/// `key_id == 0` plus a dummy proof means "unsigned": either a privileged
/// emitter that skips signing, or a signer with no keys available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignedLogicalTime {
    time: LogicalTime,
    proof: TimeProof,
    key_id: u64,
}

impl SignedLogicalTime {
    pub fn new(time: LogicalTime, proof: TimeProof, key_id: u64) -> Self {
        Self {
            time,
            proof,
            key_id,
        }
    }

    /// The unsigned form handed to privileged peers.
    pub fn dummy_signed(time: LogicalTime) -> Self {
        Self::new(time, TimeProof::DUMMY, 0)
    }

    pub fn time(&self) -> LogicalTime {
        self.time
    }

    pub fn proof(&self) -> &TimeProof {
        &self.proof
    }

    pub fn key_id(&self) -> u64 {
        self.key_id
    }
}
