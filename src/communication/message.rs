//! Wire message types traded between replicas, and their signed, canonical
//! encoding.

use serde::{Deserialize, Serialize};

use crate::crypto::signature::{self, KeyPair, PublicKey, Signature};
use crate::crypto::truststore::Truststore;
use crate::error::*;
use crate::log::BatchKey;

/// Distinguishes the three consensus message kinds on the wire. Each kind
/// gets one reserved byte so demultiplexing at the transport layer never
/// has to peek into the signed payload.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum MessageKind {
    PrePrepare = 0,
    Prepare = 1,
    Commit = 2,
}

/// A `PRE-PREPARE` message: proposes a new slot and carries the operation
/// payload itself.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone)]
pub struct PrePrepareMessage {
    batch_key: BatchKey,
    #[serde(with = "serde_bytes")]
    operation: Vec<u8>,
    crypto_name: String,
    signature: Signature,
}

/// A `PREPARE` message: votes for a slot already opened by a
/// `PrePrepareMessage`.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone)]
pub struct PrepareMessage {
    batch_key: BatchKey,
    reserved: u32,
    crypto_name: String,
    signature: Signature,
}

/// A `COMMIT` message: votes to finalize a slot that reached prepare
/// quorum.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone)]
pub struct CommitMessage {
    batch_key: BatchKey,
    reserved: u32,
    crypto_name: String,
    signature: Signature,
}

/// Any one of the three consensus message types.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone)]
pub enum ConsensusMessage {
    PrePrepare(PrePrepareMessage),
    Prepare(PrepareMessage),
    Commit(CommitMessage),
}

/// The unsigned fields of a consensus message, in the fixed order fed to
/// the signer. Never placed on the wire directly — it exists purely to
/// give `bincode` a stable, canonical layout to encode.
#[derive(Serialize)]
struct SignedFields<'a> {
    kind: u8,
    batch_key: &'a BatchKey,
    operation: Option<&'a [u8]>,
    reserved: u32,
    crypto_name: &'a str,
}

fn canonical_bytes(
    kind: MessageKind,
    batch_key: &BatchKey,
    operation: Option<&[u8]>,
    reserved: u32,
    crypto_name: &str,
) -> Vec<u8> {
    let fields = SignedFields {
        kind: kind as u8,
        batch_key,
        operation,
        reserved,
        crypto_name,
    };
    // `bincode`'s default config is deterministic for a fixed input type,
    // which is exactly the property the codec needs: every correct
    // replica must recompute the same digest over the same fields.
    bincode::serialize(&fields).expect("canonical encoding of consensus message fields")
}

impl PrePrepareMessage {
    /// Builds and signs a new `PrePrepareMessage`.
    pub fn new(batch_key: BatchKey, operation: Vec<u8>, crypto_name: String, key_pair: &KeyPair) -> Self {
        let bytes = canonical_bytes(MessageKind::PrePrepare, &batch_key, Some(&operation), 0, &crypto_name);
        let signature = signature::sign(&bytes, key_pair);
        Self {
            batch_key,
            operation,
            crypto_name,
            signature,
        }
    }

    pub fn batch_key(&self) -> &BatchKey {
        &self.batch_key
    }

    pub fn operation(&self) -> &[u8] {
        &self.operation
    }

    pub fn crypto_name(&self) -> &str {
        &self.crypto_name
    }

    /// Verifies this message's signature against the truststore entry
    /// named by `crypto_name`.
    ///
    /// Any failure — unknown name, malformed signature, mismatched digest
    /// — collapses to `Err(ErrorKind::Signature)`, per the spec's single
    /// `SignatureError` kind.
    pub fn verify(&self, truststore: &dyn Truststore) -> Result<()> {
        let public_key = truststore.lookup(&self.crypto_name)?;
        let bytes = canonical_bytes(
            MessageKind::PrePrepare,
            &self.batch_key,
            Some(&self.operation),
            0,
            &self.crypto_name,
        );
        verify_or_fail(&bytes, &self.signature, &public_key)
    }
}

impl PrepareMessage {
    /// Builds and signs a new `PrepareMessage`.
    pub fn new(batch_key: BatchKey, crypto_name: String, key_pair: &KeyPair) -> Self {
        let bytes = canonical_bytes(MessageKind::Prepare, &batch_key, None, 0, &crypto_name);
        let signature = signature::sign(&bytes, key_pair);
        Self {
            batch_key,
            reserved: 0,
            crypto_name,
            signature,
        }
    }

    pub fn batch_key(&self) -> &BatchKey {
        &self.batch_key
    }

    pub fn crypto_name(&self) -> &str {
        &self.crypto_name
    }

    /// See `PrePrepareMessage::verify`.
    pub fn verify(&self, truststore: &dyn Truststore) -> Result<()> {
        let public_key = truststore.lookup(&self.crypto_name)?;
        let bytes = canonical_bytes(
            MessageKind::Prepare,
            &self.batch_key,
            None,
            self.reserved,
            &self.crypto_name,
        );
        verify_or_fail(&bytes, &self.signature, &public_key)
    }
}

impl CommitMessage {
    /// Builds and signs a new `CommitMessage`.
    pub fn new(batch_key: BatchKey, crypto_name: String, key_pair: &KeyPair) -> Self {
        let bytes = canonical_bytes(MessageKind::Commit, &batch_key, None, 0, &crypto_name);
        let signature = signature::sign(&bytes, key_pair);
        Self {
            batch_key,
            reserved: 0,
            crypto_name,
            signature,
        }
    }

    pub fn batch_key(&self) -> &BatchKey {
        &self.batch_key
    }

    pub fn crypto_name(&self) -> &str {
        &self.crypto_name
    }

    /// See `PrePrepareMessage::verify`.
    pub fn verify(&self, truststore: &dyn Truststore) -> Result<()> {
        let public_key = truststore.lookup(&self.crypto_name)?;
        let bytes = canonical_bytes(
            MessageKind::Commit,
            &self.batch_key,
            None,
            self.reserved,
            &self.crypto_name,
        );
        verify_or_fail(&bytes, &self.signature, &public_key)
    }
}

fn verify_or_fail(bytes: &[u8], signature: &Signature, public_key: &PublicKey) -> Result<()> {
    if signature::verify(bytes, signature, public_key) {
        Ok(())
    } else {
        Err("signature verification failed")
            .simple_msg(ErrorKind::Signature, "signature verification failed")
    }
}

impl ConsensusMessage {
    /// The batch key carried by any of the three message kinds.
    pub fn batch_key(&self) -> &BatchKey {
        match self {
            ConsensusMessage::PrePrepare(m) => m.batch_key(),
            ConsensusMessage::Prepare(m) => m.batch_key(),
            ConsensusMessage::Commit(m) => m.batch_key(),
        }
    }

    /// Verifies the signature of whichever message kind this wraps.
    pub fn verify(&self, truststore: &dyn Truststore) -> Result<()> {
        match self {
            ConsensusMessage::PrePrepare(m) => m.verify(truststore),
            ConsensusMessage::Prepare(m) => m.verify(truststore),
            ConsensusMessage::Commit(m) => m.verify(truststore),
        }
    }
}
