//! Core types shared across the X-Trace report store.
//!
//! This crate defines the identifier newtypes ([`TaskId`], [`OpId`]), the
//! X-Trace metadata codec ([`XTraceMetadata`]), the framed report document
//! ([`Report`]), and the per-task index row ([`TaskRecord`]).

pub mod metadata;
pub mod record;
pub mod report;

mod hex;

use std::fmt;

use xtrace_error::{Result, XTraceError};

pub use metadata::XTraceMetadata;
pub use record::TaskRecord;
pub use report::{Report, REPORT_HEADER, REPORT_HEADER_LENGTH, REPORT_HEADER_PREFIX};

/// Byte lengths a task id may take on the wire.
///
/// The two-bit length code in the metadata flags byte selects one of these.
pub const TASK_ID_LENGTHS: [usize; 4] = [4, 8, 12, 20];

/// Opaque task identifier.
///
/// A task id is a 4-, 8-, 12-, or 20-byte value compared by value. Its
/// string form is uppercase hexadecimal; the first two hex characters form
/// the directory-shard prefix used by the on-disk file store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(Box<[u8]>);

impl TaskId {
    /// Create a task id from raw bytes.
    ///
    /// Fails unless the length is one of [`TASK_ID_LENGTHS`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if !TASK_ID_LENGTHS.contains(&bytes.len()) {
            return Err(XTraceError::InvalidTaskId {
                detail: format!(
                    "task id must be 4, 8, 12, or 20 bytes, got {}",
                    bytes.len()
                ),
            });
        }
        Ok(Self(bytes.into()))
    }

    /// Parse a task id from its hex string form (case-insensitive).
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).ok_or_else(|| XTraceError::InvalidTaskId {
            detail: format!("not a hex string: {s:?}"),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Raw bytes of the identifier.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Canonical uppercase-hex form, used for filenames and index keys.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl serde::Serialize for TaskId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for TaskId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Operation identifier carried next to the task id in X-Trace metadata.
///
/// Either 4 or 8 bytes on the wire. The store never interprets it; it is
/// retained so a decoded metadata round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpId(Box<[u8]>);

impl OpId {
    /// Create an op id from raw bytes (4 or 8 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 4 && bytes.len() != 8 {
            return Err(XTraceError::InvalidMetadata {
                detail: format!("op id must be 4 or 8 bytes, got {}", bytes.len()),
            });
        }
        Ok(Self(bytes.into()))
    }

    /// Raw bytes of the identifier.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}
