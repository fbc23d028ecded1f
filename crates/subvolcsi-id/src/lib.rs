#![warn(missing_docs)]

//! SubvolCSI identifier encoding: the composite, versioned object ID handed
//! to the container orchestrator.
//!
//! The CO treats volume and snapshot IDs as opaque strings; internally they
//! encode everything needed to locate the backing object again: the encoding
//! version, the cluster the object lives on, a 64-bit location ID (the
//! filesystem ID for subvolumes), and the object UUID reserved in the
//! journal.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for identifier operations.
pub type IdResult<T> = Result<T, IdError>;

/// Error variants for composing and decomposing identifiers.
#[derive(Debug, Error)]
pub enum IdError {
    /// The composed identifier would exceed the CO-imposed length ceiling.
    #[error("encoded identifier length overflow: cluster id {cluster_id_len} bytes")]
    LengthOverflow {
        /// Length of the cluster ID that caused the overflow.
        cluster_id_len: usize,
    },

    /// The object UUID does not have the canonical 36-byte form.
    #[error("invalid object uuid: {uuid:?}")]
    InvalidUuid {
        /// The offending UUID string.
        uuid: String,
    },

    /// The encoded string is shorter than the fixed-field minimum.
    #[error("identifier underflow: {len} bytes, need at least {min}")]
    Underflow {
        /// Length of the string that was passed in.
        len: usize,
        /// Minimum length of a well-formed identifier.
        min: usize,
    },

    /// A fixed-width hex field failed to decode.
    #[error("malformed hex field at offset {offset}")]
    MalformedField {
        /// Byte offset of the field within the encoded string.
        offset: usize,
    },
}

/// Maximum length of an encoded identifier. This comes from the CSI spec's
/// limit on ID fields.
pub const MAX_ENCODED_LEN: usize = 128;

/// Total length of the fixed fields including separators:
/// 4 (version) + 1 + 4 (cluster id length) + 1 + 1 + 16 (location id) + 1 + 36 (uuid).
const KNOWN_FIELD_LEN: usize = 64;

/// Canonical string length of a UUID.
const UUID_LEN: usize = 36;

/// Version number of the identifier encoding implemented by this crate.
pub const ENCODING_VERSION_V1: u16 = 1;

/// A decoded composite object identifier.
///
/// Version 1 of the encoding is five '-'-separated fields:
///
/// ```text
/// [version: 4 hex] - [cluster id length: 4 hex] - [cluster id] - [location id: 16 hex] - [uuid: 36]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    /// Version of the encoding scheme, kept for forward compatibility.
    pub encoding_version: u16,
    /// Cluster the object lives on.
    pub cluster_id: String,
    /// 64-bit locator within the cluster; the filesystem ID for subvolumes.
    pub location_id: i64,
    /// UUID of the backing object, as reserved in the journal.
    pub object_uuid: String,
}

impl ObjectIdentifier {
    /// Creates a version-1 identifier from its parts.
    pub fn new(cluster_id: &str, location_id: i64, object_uuid: &str) -> Self {
        Self {
            encoding_version: ENCODING_VERSION_V1,
            cluster_id: cluster_id.to_string(),
            location_id,
            object_uuid: object_uuid.to_string(),
        }
    }

    /// Encodes the identifier into its string form.
    pub fn compose(&self) -> IdResult<String> {
        if KNOWN_FIELD_LEN + self.cluster_id.len() > MAX_ENCODED_LEN {
            return Err(IdError::LengthOverflow {
                cluster_id_len: self.cluster_id.len(),
            });
        }
        if self.object_uuid.len() != UUID_LEN {
            return Err(IdError::InvalidUuid {
                uuid: self.object_uuid.clone(),
            });
        }

        let version = hex::encode(self.encoding_version.to_be_bytes());
        let cluster_len = hex::encode((self.cluster_id.len() as u16).to_be_bytes());
        let location = hex::encode((self.location_id as u64).to_be_bytes());

        Ok([
            version.as_str(),
            cluster_len.as_str(),
            self.cluster_id.as_str(),
            location.as_str(),
            self.object_uuid.as_str(),
        ]
        .join("-"))
    }

    /// Decodes an identifier from its string form.
    pub fn decompose(encoded: &str) -> IdResult<Self> {
        if encoded.len() < KNOWN_FIELD_LEN {
            return Err(IdError::Underflow {
                len: encoded.len(),
                min: KNOWN_FIELD_LEN,
            });
        }

        let encoding_version = decode_u16(encoded, 0)?;
        let cluster_len = decode_u16(encoded, 5)? as usize;

        // All fixed fields plus the variable-length cluster ID must fit.
        if encoded.len() < KNOWN_FIELD_LEN + cluster_len {
            return Err(IdError::Underflow {
                len: encoded.len(),
                min: KNOWN_FIELD_LEN + cluster_len,
            });
        }

        let cluster_start = 10;
        let cluster_id = encoded
            .get(cluster_start..cluster_start + cluster_len)
            .ok_or(IdError::MalformedField {
                offset: cluster_start,
            })?
            .to_string();

        let location_start = cluster_start + cluster_len + 1;
        let location_hex = encoded
            .get(location_start..location_start + 16)
            .ok_or(IdError::MalformedField {
                offset: location_start,
            })?;
        let location_bytes: [u8; 8] = hex::decode(location_hex)
            .map_err(|_| IdError::MalformedField {
                offset: location_start,
            })?
            .try_into()
            .map_err(|_| IdError::MalformedField {
                offset: location_start,
            })?;
        let location_id = u64::from_be_bytes(location_bytes) as i64;

        let uuid_start = location_start + 17;
        let object_uuid = encoded
            .get(uuid_start..)
            .ok_or(IdError::MalformedField { offset: uuid_start })?;
        if object_uuid.len() != UUID_LEN || uuid::Uuid::parse_str(object_uuid).is_err() {
            return Err(IdError::InvalidUuid {
                uuid: object_uuid.to_string(),
            });
        }

        Ok(Self {
            encoding_version,
            cluster_id,
            location_id,
            object_uuid: object_uuid.to_string(),
        })
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectIdentifier(v{}, cluster={}, location={}, uuid={})",
            self.encoding_version, self.cluster_id, self.location_id, self.object_uuid
        )
    }
}

/// Decodes a 4-hex-character big-endian u16 field at the given offset.
fn decode_u16(encoded: &str, offset: usize) -> IdResult<u16> {
    let field = encoded
        .get(offset..offset + 4)
        .ok_or(IdError::MalformedField { offset })?;
    let bytes: [u8; 2] = hex::decode(field)
        .map_err(|_| IdError::MalformedField { offset })?
        .try_into()
        .map_err(|_| IdError::MalformedField { offset })?;

    Ok(u16::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "00000000-1111-2222-3333-444444444444";

    #[test]
    fn test_compose_round_trip() {
        let id = ObjectIdentifier::new("ceph-east", 7, UUID);
        let encoded = id.compose().unwrap();
        let decoded = ObjectIdentifier::decompose(&encoded).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_compose_layout() {
        let id = ObjectIdentifier::new("c1", 1, UUID);
        let encoded = id.compose().unwrap();
        // version=1, cluster len=2, location=1
        assert_eq!(
            encoded,
            format!("0001-0002-c1-0000000000000001-{UUID}")
        );
    }

    #[test]
    fn test_compose_rejects_long_cluster_id() {
        let long = "x".repeat(MAX_ENCODED_LEN);
        let id = ObjectIdentifier::new(&long, 1, UUID);
        assert!(matches!(
            id.compose(),
            Err(IdError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn test_compose_rejects_short_uuid() {
        let id = ObjectIdentifier::new("c1", 1, "not-a-uuid");
        assert!(matches!(id.compose(), Err(IdError::InvalidUuid { .. })));
    }

    #[test]
    fn test_decompose_rejects_underflow() {
        assert!(matches!(
            ObjectIdentifier::decompose("0001-0002-c1"),
            Err(IdError::Underflow { .. })
        ));
    }

    #[test]
    fn test_decompose_rejects_bad_hex() {
        let id = ObjectIdentifier::new("c1", 1, UUID);
        let mut encoded = id.compose().unwrap();
        encoded.replace_range(0..4, "zzzz");
        assert!(matches!(
            ObjectIdentifier::decompose(&encoded),
            Err(IdError::MalformedField { .. })
        ));
    }

    #[test]
    fn test_decompose_rejects_bad_uuid() {
        let id = ObjectIdentifier::new("c1", 1, UUID);
        let encoded = id.compose().unwrap();
        let tampered = format!("{}zz", &encoded[..encoded.len() - 2]);
        assert!(matches!(
            ObjectIdentifier::decompose(&tampered),
            Err(IdError::InvalidUuid { .. })
        ));
    }

    #[test]
    fn test_negative_location_id_round_trips() {
        let id = ObjectIdentifier::new("c1", -1, UUID);
        let encoded = id.compose().unwrap();
        let decoded = ObjectIdentifier::decompose(&encoded).unwrap();
        assert_eq!(decoded.location_id, -1);
    }

    #[test]
    fn test_cluster_id_with_dashes_round_trips() {
        // The cluster ID field is length-prefixed, so embedded separators
        // must not confuse the decoder.
        let id = ObjectIdentifier::new("east-1-rack-2", 42, UUID);
        let encoded = id.compose().unwrap();
        let decoded = ObjectIdentifier::decompose(&encoded).unwrap();
        assert_eq!(decoded.cluster_id, "east-1-rack-2");
    }

    #[test]
    fn test_display() {
        let id = ObjectIdentifier::new("c1", 3, UUID);
        let shown = format!("{id}");
        assert!(shown.contains("cluster=c1"));
        assert!(shown.contains("location=3"));
    }
}
