//! Content-addressing digests, backed by BLAKE3.

use crate::error::*;

use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};

/// A fixed-width cryptographic digest.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Digest([u8; Digest::LENGTH]);

impl Digest {
    /// The length, in bytes, of a `Digest`.
    pub const LENGTH: usize = blake3::OUT_LEN;

    /// Hashes `bytes` into a new `Digest`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Reconstructs a `Digest` from a raw byte slice of the correct length.
    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() < Self::LENGTH {
            return Err("digest has an invalid length").simple_msg(
                ErrorKind::Signature,
                "digest has an invalid length",
            );
        }
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(&raw_bytes[..Self::LENGTH]);
        Ok(Self(inner))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", hex_preview(&self.0))
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(6)
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

struct DigestVisitor;

impl<'de> Visitor<'de> for DigestVisitor {
    type Value = Digest;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes", Digest::LENGTH)
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> std::result::Result<Digest, E> {
        Digest::from_bytes(v).map_err(|_| E::invalid_length(v.len(), &self))
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_bytes(DigestVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_hashes_the_same() {
        assert_eq!(Digest::of(b"block-1"), Digest::of(b"block-1"));
    }

    #[test]
    fn different_input_hashes_differently() {
        assert_ne!(Digest::of(b"block-1"), Digest::of(b"block-2"));
    }

    #[test]
    fn round_trips_through_bytes() {
        let d = Digest::of(b"hello world");
        let reconstructed = Digest::from_bytes(d.as_ref()).unwrap();
        assert_eq!(d, reconstructed);
    }
}
