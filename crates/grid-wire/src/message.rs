//! The kernel message and its single-frame CBOR encoding.
//!
//! A message is wrapped in a CBOR tag whose number is the mnemonic `"grid"`
//! read as a big-endian integer. The tag content is a two-element array of
//! byte strings: `[protocol, payload]`. Empty fields are encoded as
//! zero-length byte strings, never as null.

use crate::error::WireError;
use crate::mnemonic::string_to_num;
use ciborium::value::Value;

/// Mnemonic of the outer tag.
pub const GRID_TAG_NAME: &str = "grid";

/// Outer tag number (`0x67726964`).
pub const GRID_TAG: u64 = string_to_num(GRID_TAG_NAME);

/// Number of elements inside the tag content.
pub(crate) const FIELD_COUNT: usize = 2;

/// Field names, in wire order.
pub(crate) const FIELD_NAMES: [&str; FIELD_COUNT] = ["protocol", "payload"];

/// A unit of transport between kernels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Message {
    /// Identifies which handler receives the message. Opaque bytes,
    /// usually a content address.
    pub protocol: Vec<u8>,
    /// Application data for that protocol.
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(protocol: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            protocol: protocol.into(),
            payload: payload.into(),
        }
    }
}

/// Encode a message as one CBOR frame.
///
/// The output is deterministic: heads use their shortest form and all
/// lengths are definite, so equal messages give byte-identical frames.
pub fn encode(msg: &Message) -> Result<Vec<u8>, WireError> {
    let value = Value::Tag(
        GRID_TAG,
        Box::new(Value::Array(vec![
            Value::Bytes(msg.protocol.clone()),
            Value::Bytes(msg.payload.clone()),
        ])),
    );
    let mut buf = Vec::with_capacity(msg.protocol.len() + msg.payload.len() + 16);
    ciborium::ser::into_writer(&value, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode exactly one frame. Bytes after the frame are an error.
pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
    let mut rest = bytes;
    let value: Value = ciborium::de::from_reader(&mut rest).map_err(map_de_error)?;
    if !rest.is_empty() {
        return Err(WireError::TrailingBytes(rest.len()));
    }
    message_from_value(value)
}

fn map_de_error(err: ciborium::de::Error<std::io::Error>) -> WireError {
    match err {
        ciborium::de::Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            WireError::Truncated
        }
        ciborium::de::Error::Io(e) => WireError::Io(e),
        other => WireError::Malformed(other.to_string()),
    }
}

fn message_from_value(value: Value) -> Result<Message, WireError> {
    let (tag, content) = match value {
        Value::Tag(tag, content) => (tag, content),
        _ => return Err(WireError::NotTagged),
    };
    if tag != GRID_TAG {
        return Err(WireError::TagMismatch {
            expected: GRID_TAG,
            found: tag,
        });
    }

    let parts = match *content {
        Value::Array(parts) => parts,
        _ => return Err(WireError::NotAnArray),
    };
    let [protocol, payload]: [Value; FIELD_COUNT] =
        parts.try_into().map_err(|parts: Vec<Value>| WireError::Arity {
            expected: FIELD_COUNT,
            found: parts.len(),
        })?;

    Ok(Message {
        protocol: field_bytes(protocol, FIELD_NAMES[0])?,
        payload: field_bytes(payload, FIELD_NAMES[1])?,
    })
}

/// Peers that encode a missing slice as CBOR null are read as empty.
fn field_bytes(value: Value, field: &'static str) -> Result<Vec<u8>, WireError> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        Value::Null => Ok(Vec::new()),
        _ => Err(WireError::FieldType { field }),
    }
}
