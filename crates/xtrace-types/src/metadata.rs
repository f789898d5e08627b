//! X-Trace metadata codec.
//!
//! Every report carries an `X-Trace:` line whose value is a hex string
//! encoding the metadata tuple `(task_id, op_id, options?)`. Wire layout:
//!
//! ```text
//! [flags: 1 byte][task_id: 4|8|12|20 bytes][op_id: 4|8 bytes][options...]
//! ```
//!
//! - `flags & 0x03` selects the task-id length (0→4, 1→8, 2→12, 3→20)
//! - `flags & 0x08` selects an 8-byte op id (else 4 bytes)
//! - `flags & 0x04` marks trailing option bytes (one length byte, then the
//!   payload); the store retains them verbatim and never interprets them
//!
//! The store only relies on the leading field being the task id.

use xtrace_error::{Result, XTraceError};

use crate::hex;
use crate::{OpId, TaskId, TASK_ID_LENGTHS};

const FLAG_TASK_LEN_MASK: u8 = 0x03;
const FLAG_OPTIONS: u8 = 0x04;
const FLAG_WIDE_OP_ID: u8 = 0x08;

/// Minimum decoded metadata size: flags + 4-byte task id + 4-byte op id.
pub const METADATA_MIN_BYTES: usize = 9;

/// Decoded X-Trace metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XTraceMetadata {
    task_id: TaskId,
    op_id: OpId,
    options: Option<Vec<u8>>,
}

impl XTraceMetadata {
    /// Construct metadata without options.
    #[must_use]
    pub fn new(task_id: TaskId, op_id: OpId) -> Self {
        Self {
            task_id,
            op_id,
            options: None,
        }
    }

    /// Decode from the hex string carried on an `X-Trace:` report line.
    pub fn from_hex_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).ok_or_else(|| XTraceError::InvalidMetadata {
            detail: format!("not a hex string: {s:?}"),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Decode from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < METADATA_MIN_BYTES {
            return Err(XTraceError::InvalidMetadata {
                detail: format!(
                    "metadata too short: expected at least {METADATA_MIN_BYTES} bytes, got {}",
                    bytes.len()
                ),
            });
        }

        let flags = bytes[0];
        let task_len = TASK_ID_LENGTHS[usize::from(flags & FLAG_TASK_LEN_MASK)];
        let op_len = if flags & FLAG_WIDE_OP_ID != 0 { 8 } else { 4 };

        let fixed_len = 1 + task_len + op_len;
        if bytes.len() < fixed_len {
            return Err(XTraceError::InvalidMetadata {
                detail: format!(
                    "metadata truncated: flags require {fixed_len} bytes, got {}",
                    bytes.len()
                ),
            });
        }

        let task_id = TaskId::from_bytes(&bytes[1..1 + task_len])?;
        let op_id = OpId::from_bytes(&bytes[1 + task_len..fixed_len])?;

        let rest = &bytes[fixed_len..];
        let options = if flags & FLAG_OPTIONS != 0 {
            let Some((&opt_len, payload)) = rest.split_first() else {
                return Err(XTraceError::InvalidMetadata {
                    detail: "options flag set but no option bytes".to_owned(),
                });
            };
            if payload.len() < usize::from(opt_len) {
                return Err(XTraceError::InvalidMetadata {
                    detail: format!(
                        "options truncated: length byte says {opt_len}, got {}",
                        payload.len()
                    ),
                });
            }
            Some(payload[..usize::from(opt_len)].to_vec())
        } else {
            if !rest.is_empty() {
                return Err(XTraceError::InvalidMetadata {
                    detail: format!("{} trailing bytes after op id", rest.len()),
                });
            }
            None
        };

        Ok(Self {
            task_id,
            op_id,
            options,
        })
    }

    /// Encode to the wire byte layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let task_bytes = self.task_id.as_bytes();
        let op_bytes = self.op_id.as_bytes();

        let len_code = TASK_ID_LENGTHS
            .iter()
            .position(|&l| l == task_bytes.len())
            .unwrap_or(0);
        #[allow(clippy::cast_possible_truncation)]
        let mut flags = len_code as u8;
        if op_bytes.len() == 8 {
            flags |= FLAG_WIDE_OP_ID;
        }
        if self.options.is_some() {
            flags |= FLAG_OPTIONS;
        }

        let mut out = Vec::with_capacity(1 + task_bytes.len() + op_bytes.len());
        out.push(flags);
        out.extend_from_slice(task_bytes);
        out.extend_from_slice(op_bytes);
        if let Some(options) = &self.options {
            out.push(u8::try_from(options.len()).unwrap_or(u8::MAX));
            out.extend_from_slice(options);
        }
        out
    }

    /// Encode to the uppercase hex form used on report lines.
    #[must_use]
    pub fn to_hex(&self) -> String {
        crate::hex::encode_upper(&self.to_bytes())
    }

    /// The task this metadata belongs to.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// The operation id.
    #[must_use]
    pub fn op_id(&self) -> &OpId {
        &self.op_id
    }

    /// Raw option bytes, if any were carried.
    #[must_use]
    pub fn options(&self) -> Option<&[u8]> {
        self.options.as_deref()
    }

    /// Attach option bytes (retained verbatim).
    #[must_use]
    pub fn with_options(mut self, options: Vec<u8>) -> Self {
        self.options = Some(options);
        self
    }
}
