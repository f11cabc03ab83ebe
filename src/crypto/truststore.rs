//! Truststore lookup: resolving a peer's logical key name to its public
//! key.
//!
//! The *loading* of a persistent truststore/keystore is an external
//! collaborator (the spec explicitly scopes it out): this module only
//! defines the lookup contract the core consumes, plus an in-memory
//! implementation suitable for tests and demos.

use std::collections::HashMap;

use crate::crypto::PublicKey;
use crate::error::*;

/// Resolves a `cryptoName` carried inside a message to the public key
/// used to verify it.
///
/// A persistent implementation (reading certificates off disk, talking to
/// an HSM, etc) lives outside this crate; this trait is the seam it plugs
/// into.
pub trait Truststore: Send + Sync {
    /// Looks up the public key registered under `name`.
    ///
    /// Fails with `ErrorKind::Signature` if `name` is unknown — from the
    /// caller's perspective this is indistinguishable from any other
    /// signature-validation failure, per the spec's single `SignatureError`
    /// kind.
    fn lookup(&self, name: &str) -> Result<PublicKey>;
}

/// An in-memory `Truststore`, keyed by logical name.
#[derive(Default)]
pub struct MemoryTruststore {
    keys: HashMap<String, PublicKey>,
}

impl MemoryTruststore {
    /// Builds an empty truststore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` under `name`, overwriting any prior entry.
    pub fn insert(&mut self, name: impl Into<String>, key: PublicKey) {
        self.keys.insert(name.into(), key);
    }
}

impl Truststore for MemoryTruststore {
    fn lookup(&self, name: &str) -> Result<PublicKey> {
        self.keys
            .get(name)
            .cloned()
            .ok_or(())
            .simple_msg(ErrorKind::Signature, "unknown crypto name in truststore")
    }
}
