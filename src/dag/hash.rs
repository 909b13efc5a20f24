//! Content-addressed identifiers for changesets, blobs and dagnodes.
//!
//! A `ContentId` is the SHA3-256 digest of an object's canonical bytes. Two
//! objects with identical canonical bytes always share an id, which is what
//! makes duplicate writes from concurrent committers harmless.

use crate::error::{DagError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Length of a content id in bytes.
pub const CONTENT_ID_LEN: usize = 32;

/// A 32-byte SHA3-256 content address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; CONTENT_ID_LEN]);

impl Serialize for ContentId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ContentIdVisitor;

        impl<'de> serde::de::Visitor<'de> for ContentIdVisitor {
            type Value = ContentId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a 32 byte array or a 64 character hex string")
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ContentId::from_hex(v).map_err(E::custom)
            }

            fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v.len() != CONTENT_ID_LEN {
                    return Err(E::invalid_length(v.len(), &self));
                }
                let mut arr = [0u8; CONTENT_ID_LEN];
                arr.copy_from_slice(v);
                Ok(ContentId(arr))
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut arr = [0u8; CONTENT_ID_LEN];
                for (i, byte) in arr.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(ContentId(arr))
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(ContentIdVisitor)
        } else {
            deserializer.deserialize_bytes(ContentIdVisitor)
        }
    }
}

impl ContentId {
    /// Computes the id of raw canonical bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Computes the id of serializable data using its bincode form.
    pub fn compute<T: Serialize>(data: &T) -> Result<Self> {
        let serialized = bincode::serialize(data).map_err(|e| {
            DagError::serialization(format!("Failed to serialize for hash: {}", e))
        })?;
        Ok(Self::of_bytes(&serialized))
    }

    /// Creates a ContentId from raw digest bytes.
    pub fn from_bytes(bytes: [u8; CONTENT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a ContentId from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; CONTENT_ID_LEN] = bytes.try_into().map_err(|_| {
            DagError::invalid_argument(format!(
                "ContentId must be exactly {} bytes, got {}",
                CONTENT_ID_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; CONTENT_ID_LEN] {
        &self.0
    }

    /// Returns the lowercase hex form. This is the printable id.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a ContentId from a hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|_| DagError::invalid_argument("Invalid hex string for ContentId"))?;
        Self::from_slice(&bytes)
    }

    /// Returns a short form of the id for display (first 8 bytes / 16 hex chars).
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({}...)", self.short())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Returns the current Unix timestamp in milliseconds.
pub fn current_timestamp_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_is_deterministic() {
        let id1 = ContentId::of_bytes(b"test data");
        let id2 = ContentId::of_bytes(b"test data");
        assert_eq!(id1, id2, "Same bytes should produce same id");

        let id3 = ContentId::of_bytes(b"other data");
        assert_ne!(id1, id3, "Different bytes should produce different id");
    }

    #[test]
    fn test_compute_matches_bincode_bytes() {
        let value = (7u64, "abc".to_string());
        let bytes = bincode::serialize(&value).unwrap();
        assert_eq!(
            ContentId::compute(&value).unwrap(),
            ContentId::of_bytes(&bytes)
        );
    }

    #[test]
    fn test_hex_parsing() {
        let id = ContentId::of_bytes(b"test data");
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentId::from_hex(&hex).unwrap(), id);

        assert!(ContentId::from_hex("zz").is_err());
        assert!(ContentId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_serde_formats() {
        let id = ContentId::of_bytes(b"serde");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let from_json: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(from_json, id);

        let bin = bincode::serialize(&id).unwrap();
        let from_bin: ContentId = bincode::deserialize(&bin).unwrap();
        assert_eq!(from_bin, id);
    }

    #[test]
    fn test_short_form() {
        let id = ContentId::of_bytes(b"test data");
        assert_eq!(id.short().len(), 16);
        assert!(id.to_hex().starts_with(&id.short()));
    }
}
