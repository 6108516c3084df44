//! Opaque task tokens correlating a poll/respond exchange with one operation attempt.
//!
//! A [`TaskToken`] is minted when an operation is scheduled and handed to the
//! worker that claims it. The worker echoes the encoded bytes back on every
//! respond call; nothing outside this module inspects the byte layout.
//!
//! # Wire format
//!
//! ```text
//! u8   version (currently 0x01)
//! u16  namespace length,   namespace bytes (UTF-8)
//! u16  workflow id length, workflow id bytes (UTF-8)
//! u16  run id length,      run id bytes (UTF-8)
//! i64  scheduled event id
//! i32  attempt
//! ```
//!
//! All integers are big-endian. Every field is mandatory and the record must
//! be consumed exactly: truncated input, trailing bytes, overrunning length
//! prefixes, and unknown versions are all rejected. Future fields must be
//! introduced under a new version byte so that older decoders fail closed.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::identity::ExecutionId;

/// Current encoding version written by [`encode`].
pub const TOKEN_VERSION: u8 = 1;

/// Maximum byte length of a single text field (limited by the `u16` prefix).
pub const MAX_TEXT_FIELD_LEN: usize = u16::MAX as usize;

/// Correlation handle binding a worker task to one scheduled operation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskToken {
    /// Execution that scheduled the operation.
    pub execution_id: ExecutionId,
    /// History position of the `OperationScheduled` event.
    pub scheduled_event_id: i64,
    /// Attempt number at that position. Always 0 until retries exist.
    pub attempt: i32,
}

impl TaskToken {
    #[must_use]
    pub fn new(execution_id: ExecutionId, scheduled_event_id: i64, attempt: i32) -> Self {
        Self {
            execution_id,
            scheduled_event_id,
            attempt,
        }
    }

    /// Encodes this token. See [`encode`].
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::FieldTooLong`] if a text field cannot be length-prefixed.
    pub fn to_bytes(&self) -> Result<Bytes, TokenError> {
        encode(self)
    }

    /// Decodes a token. See [`decode`].
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] describing why the bytes are not a valid token.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenError> {
        decode(bytes)
    }
}

/// Errors produced by the task token codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("task token truncated: {needed} more byte(s) required")]
    Truncated { needed: usize },
    #[error("task token has {count} trailing byte(s)")]
    TrailingBytes { count: usize },
    #[error("task token field `{field}` declares {declared} byte(s) but only {remaining} remain")]
    FieldOverrun {
        field: &'static str,
        declared: usize,
        remaining: usize,
    },
    #[error("task token field `{field}` is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("unsupported task token version {0}")]
    UnsupportedVersion(u8),
    #[error("task token field `{field}` is {len} bytes, limit is {MAX_TEXT_FIELD_LEN}")]
    FieldTooLong { field: &'static str, len: usize },
}

impl TokenError {
    /// True for failures on the encode side, which indicate a server bug or
    /// unsupported identity rather than bad caller input.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::FieldTooLong { .. })
    }
}

/// Checks that every text field of `execution_id` fits the wire format.
///
/// # Errors
///
/// Returns [`TokenError::FieldTooLong`] naming the first oversized field.
pub fn check_encodable(execution_id: &ExecutionId) -> Result<(), TokenError> {
    for (field, value) in text_fields(execution_id) {
        text_len(field, value)?;
    }
    Ok(())
}

/// Encodes a token into its versioned binary form.
///
/// # Errors
///
/// Returns [`TokenError::FieldTooLong`] if a text field exceeds
/// [`MAX_TEXT_FIELD_LEN`] bytes.
pub fn encode(token: &TaskToken) -> Result<Bytes, TokenError> {
    let fields = text_fields(&token.execution_id);
    let text_bytes: usize = fields.iter().map(|(_, v)| 2 + v.len()).sum();
    let mut buf = BytesMut::with_capacity(1 + text_bytes + 8 + 4);

    buf.put_u8(TOKEN_VERSION);
    for (field, value) in fields {
        buf.put_u16(text_len(field, value)?);
        buf.put_slice(value.as_bytes());
    }
    buf.put_i64(token.scheduled_event_id);
    buf.put_i32(token.attempt);
    Ok(buf.freeze())
}

/// Decodes a token produced by [`encode`].
///
/// # Errors
///
/// Returns a [`TokenError`] if the input is truncated, carries trailing
/// bytes, declares a text length larger than the remaining input, contains
/// invalid UTF-8, or uses an unknown version.
pub fn decode(mut bytes: &[u8]) -> Result<TaskToken, TokenError> {
    let buf = &mut bytes;

    ensure(buf, 1)?;
    let version = buf.get_u8();
    if version != TOKEN_VERSION {
        return Err(TokenError::UnsupportedVersion(version));
    }

    let namespace = take_text(buf, "namespace")?;
    let workflow_id = take_text(buf, "workflow_id")?;
    let run_id = take_text(buf, "run_id")?;

    ensure(buf, 8)?;
    let scheduled_event_id = buf.get_i64();
    ensure(buf, 4)?;
    let attempt = buf.get_i32();

    if buf.has_remaining() {
        return Err(TokenError::TrailingBytes {
            count: buf.remaining(),
        });
    }

    Ok(TaskToken {
        execution_id: ExecutionId::new(namespace, workflow_id, run_id),
        scheduled_event_id,
        attempt,
    })
}

fn text_fields(id: &ExecutionId) -> [(&'static str, &str); 3] {
    [
        ("namespace", id.namespace()),
        ("workflow_id", id.workflow_id()),
        ("run_id", id.run_id()),
    ]
}

fn text_len(field: &'static str, value: &str) -> Result<u16, TokenError> {
    u16::try_from(value.len()).map_err(|_| TokenError::FieldTooLong {
        field,
        len: value.len(),
    })
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), TokenError> {
    if buf.remaining() < needed {
        return Err(TokenError::Truncated {
            needed: needed - buf.remaining(),
        });
    }
    Ok(())
}

fn take_text(buf: &mut &[u8], field: &'static str) -> Result<String, TokenError> {
    ensure(buf, 2)?;
    let declared = usize::from(buf.get_u16());
    if buf.remaining() < declared {
        return Err(TokenError::FieldOverrun {
            field,
            declared,
            remaining: buf.remaining(),
        });
    }
    let current: &[u8] = *buf;
    let (raw, rest) = current.split_at(declared);
    *buf = rest;
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| TokenError::InvalidUtf8 { field })
}
