//! Content-addressed store of operation payloads ("blocks").
//!
//! Storing a payload once under its content hash is what lets a
//! `PrePrepare` carry the payload while `Prepare`/`Commit` carry only the
//! hash.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::crypto::hash::Digest;
use crate::error::*;

/// Identifies an operation by the client-supplied timestamp used for
/// deduplication, plus the hash of the request payload itself.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct OpsMapKey {
    timestamp: u64,
    request_hash: Digest,
}

impl OpsMapKey {
    /// Builds a new `OpsMapKey`.
    pub fn new(timestamp: u64, request_hash: Digest) -> Self {
        Self {
            timestamp,
            request_hash,
        }
    }

    /// The content-addressing hash derived from this key, used to index
    /// `OpsMap`.
    pub fn ops_hash(&self) -> Digest {
        let mut buf = Vec::with_capacity(8 + Digest::LENGTH);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(self.request_hash.as_ref());
        Digest::of(&buf)
    }
}

/// An append-only, content-addressed map from `opsHash` to the operation
/// payload it names.
#[derive(Default)]
pub struct OpsMap {
    inner: RwLock<HashMap<Digest, Vec<u8>>>,
}

impl OpsMap {
    /// Builds an empty `OpsMap`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `payload` under `hash`.
    ///
    /// Idempotent when the same `(hash, payload)` pair is inserted twice
    /// (a retried broadcast, say); fails with `ErrorKind::DuplicateOp` if
    /// `hash` is already mapped to a *different* payload, which is how
    /// request replay at the ingress path is detected.
    pub fn add_op(&self, hash: Digest, payload: Vec<u8>) -> Result<()> {
        let mut map = self.inner.write();
        match map.get(&hash) {
            Some(existing) if existing == &payload => Ok(()),
            Some(_) => Err("operation hash already bound to a different payload")
                .simple_msg(ErrorKind::DuplicateOp, "duplicate operation"),
            None => {
                map.insert(hash, payload);
                Ok(())
            }
        }
    }

    /// Retrieves the payload stored under `hash`.
    ///
    /// Fails with `ErrorKind::UnknownOp` if nothing was ever installed
    /// under that hash.
    pub fn get_op(&self, hash: Digest) -> Result<Vec<u8>> {
        self.inner
            .read()
            .get(&hash)
            .cloned()
            .ok_or(())
            .simple_msg(ErrorKind::UnknownOp, "no payload for operation hash")
    }

    /// Whether `hash` is already bound to a payload.
    pub fn contains_op(&self, hash: Digest) -> bool {
        self.inner.read().contains_key(&hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_round_trips() {
        let ops = OpsMap::new();
        let hash = Digest::of(b"op-1");
        ops.add_op(hash, b"payload".to_vec()).unwrap();
        assert_eq!(ops.get_op(hash).unwrap(), b"payload".to_vec());
    }

    #[test]
    fn add_is_idempotent_for_identical_payload() {
        let ops = OpsMap::new();
        let hash = Digest::of(b"op-1");
        ops.add_op(hash, b"payload".to_vec()).unwrap();
        assert!(ops.add_op(hash, b"payload".to_vec()).is_ok());
    }

    #[test]
    fn add_rejects_conflicting_payload() {
        let ops = OpsMap::new();
        let hash = Digest::of(b"op-1");
        ops.add_op(hash, b"payload".to_vec()).unwrap();
        let err = ops.add_op(hash, b"other".to_vec()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateOp);
    }

    #[test]
    fn get_unknown_op_fails() {
        let ops = OpsMap::new();
        let err = ops.get_op(Digest::of(b"missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownOp);
    }

    #[test]
    fn ops_map_key_hash_is_stable() {
        let k1 = OpsMapKey::new(1, Digest::of(b"req"));
        let k2 = OpsMapKey::new(1, Digest::of(b"req"));
        assert_eq!(k1.ops_hash(), k2.ops_hash());
    }
}
