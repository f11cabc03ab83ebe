//! Ed25519 signing and verification, backed by `ring`.

use ring::rand::SystemRandom;
use ring::signature::{self as ring_sig, Ed25519KeyPair, KeyPair as _};

use crate::error::*;

use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};

/// A signature over a byte string.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct Signature([u8; Signature::LENGTH]);

impl Signature {
    /// The length, in bytes, of a `Signature`.
    pub const LENGTH: usize = 64;

    /// Reconstructs a `Signature` from a raw byte slice of the correct
    /// length. Fails with `ErrorKind::Signature` otherwise — this is the
    /// "malformed signature" branch of the single `SignatureError` kind.
    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() != Self::LENGTH {
            return Err("signature has an invalid length")
                .simple_msg(ErrorKind::Signature, "signature has an invalid length");
        }
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(raw_bytes);
        Ok(Self(inner))
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(..)")
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

struct SignatureVisitor;

impl<'de> Visitor<'de> for SignatureVisitor {
    type Value = Signature;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes", Signature::LENGTH)
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> std::result::Result<Signature, E> {
        Signature::from_bytes(v).map_err(|_| E::invalid_length(v.len(), &self))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_bytes(SignatureVisitor)
    }
}

/// A public key, used to verify signatures produced by its matching
/// `KeyPair`.
#[derive(Clone, Eq, PartialEq)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Wraps a raw Ed25519 public key.
    pub fn from_bytes(raw_bytes: &[u8]) -> Self {
        Self(raw_bytes.to_vec())
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A private/public Ed25519 key pair, used to sign outbound messages.
pub struct KeyPair {
    inner: Ed25519KeyPair,
}

impl KeyPair {
    /// Builds a `KeyPair` from a PKCS#8-encoded private key.
    pub fn from_pkcs8(bytes: &[u8]) -> Result<Self> {
        let inner = Ed25519KeyPair::from_pkcs8(bytes)
            .simple(ErrorKind::Signature)?;
        Ok(Self { inner })
    }

    /// Generates a fresh `KeyPair`, returning the PKCS#8 document backing
    /// it alongside the usable key pair. Meant for tests and demos — the
    /// spec's keystore loading itself is an external collaborator.
    pub fn generate() -> Result<(ring::pkcs8::Document, Self)> {
        let rng = SystemRandom::new();
        let doc = Ed25519KeyPair::generate_pkcs8(&rng).simple(ErrorKind::Signature)?;
        let inner = Ed25519KeyPair::from_pkcs8(doc.as_ref()).simple(ErrorKind::Signature)?;
        Ok((doc, Self { inner }))
    }

    /// Returns this key pair's public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.inner.public_key().as_ref().to_vec())
    }
}

/// Signs `bytes` with `key_pair`.
pub fn sign(bytes: &[u8], key_pair: &KeyPair) -> Signature {
    let sig = key_pair.inner.sign(bytes);
    // `sign()` always returns exactly LENGTH bytes for Ed25519.
    Signature::from_bytes(sig.as_ref()).expect("Ed25519 signatures are fixed-length")
}

/// Verifies that `signature` is a valid signature over `bytes`, produced
/// by the holder of `public_key`.
///
/// Any failure (malformed key, malformed signature, mismatched digest)
/// collapses to `false` — callers map this into the single
/// `ErrorKind::Signature` drop policy, never distinguishing sub-causes.
pub fn verify(bytes: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let peer_key = ring_sig::UnparsedPublicKey::new(&ring_sig::ED25519, public_key.as_ref());
    peer_key.verify(bytes, signature.as_ref()).is_ok()
}
