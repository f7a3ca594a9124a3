//! Signing and verification of gossiped cluster times.
//!
//! The full key-rotation machinery lives outside this crate. What gossip
//! needs is the [`LogicalTimeValidator`] seam: sign an outgoing time, verify
//! an incoming one. [`KeySetValidator`] is the reference implementation over
//! an in-memory key set, enough for a standalone node and for tests.
use std::sync::RwLock;

use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;
use tracing::debug;

use crate::clock::{LogicalTime, SignedLogicalTime, TimeProof, TIME_PROOF_LEN};
use crate::error::{ClepsydraError, Result};
use crate::service::OperationContext;

type HmacSha1 = Hmac<Sha1>;

/// Signs outgoing logical times and verifies incoming ones.
pub trait LogicalTimeValidator: Send + Sync {
    /// Signs `time`, refreshing key material if none is available. May block
    /// on I/O; callers gate this behind their refresh permission.
    fn sign_logical_time(
        &self,
        op_ctx: &OperationContext,
        time: LogicalTime,
    ) -> Result<SignedLogicalTime>;

    /// Best-effort, non-blocking signing. Returns `key_id == 0` when no keys
    /// are available.
    fn try_sign_logical_time(&self, time: LogicalTime) -> SignedLogicalTime;

    /// Verifies that `signed` carries a proof made by a key this node knows.
    fn validate(&self, op_ctx: &OperationContext, signed: &SignedLogicalTime) -> Result<()>;
}

/// Computes the keyed proof over a logical time.
pub struct TimeProofService;

impl TimeProofService {
    /// HMAC-SHA1 over the packed big-endian timestamp.
    pub fn compute_proof(key: &[u8], time: LogicalTime) -> TimeProof {
        let mut mac =
            HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(&time.as_packed().to_be_bytes());
        let digest = mac.finalize().into_bytes();
        let mut bytes = [0u8; TIME_PROOF_LEN];
        bytes.copy_from_slice(&digest);
        TimeProof::new(bytes)
    }
}

struct TimeKey {
    id: u64,
    material: [u8; 32],
}

/// A validator over an in-memory, append-only key set. The newest key signs;
/// any known key verifies.
#[derive(Default)]
pub struct KeySetValidator {
    keys: RwLock<Vec<TimeKey>>,
}

impl KeySetValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A validator seeded with one key. `key_id` must be nonzero.
    pub fn with_key(key_id: u64, material: [u8; 32]) -> Self {
        assert_ne!(key_id, 0, "key id 0 is reserved for unsigned times");
        let validator = Self::new();
        validator.add_key(key_id, material);
        validator
    }

    pub fn add_key(&self, key_id: u64, material: [u8; 32]) {
        assert_ne!(key_id, 0, "key id 0 is reserved for unsigned times");
        self.keys
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(TimeKey {
                id: key_id,
                material,
            });
    }

    pub fn has_keys(&self) -> bool {
        !self
            .keys
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_empty()
    }

    /// Generates a fresh signing key. This stands in for the key refresh the
    /// external key manager performs on a full deployment.
    fn refresh_keys(&self) {
        let mut rng = rand::thread_rng();
        let key_id = loop {
            let candidate: u64 = rng.gen();
            if candidate != 0 {
                break candidate;
            }
        };
        let material: [u8; 32] = rng.gen();
        debug!(key_id, "generated new time-signing key");
        self.add_key(key_id, material);
    }

    fn sign_with_newest(&self, time: LogicalTime) -> Option<SignedLogicalTime> {
        let keys = self
            .keys
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = keys.last()?;
        let proof = TimeProofService::compute_proof(&key.material, time);
        Some(SignedLogicalTime::new(time, proof, key.id))
    }
}

impl LogicalTimeValidator for KeySetValidator {
    fn sign_logical_time(
        &self,
        _op_ctx: &OperationContext,
        time: LogicalTime,
    ) -> Result<SignedLogicalTime> {
        if !self.has_keys() {
            self.refresh_keys();
        }
        self.sign_with_newest(time)
            .ok_or_else(|| ClepsydraError::Signing("no signing keys available".to_string()))
    }

    fn try_sign_logical_time(&self, time: LogicalTime) -> SignedLogicalTime {
        self.sign_with_newest(time)
            .unwrap_or_else(|| SignedLogicalTime::dummy_signed(time))
    }

    fn validate(&self, _op_ctx: &OperationContext, signed: &SignedLogicalTime) -> Result<()> {
        let keys = self
            .keys
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(key) = keys.iter().find(|key| key.id == signed.key_id()) else {
            return Err(ClepsydraError::ProofMismatch {
                key_id: signed.key_id(),
            });
        };
        let expected = TimeProofService::compute_proof(&key.material, signed.time());
        if &expected != signed.proof() {
            return Err(ClepsydraError::ProofMismatch {
                key_id: signed.key_id(),
            });
        }
        Ok(())
    }
}
