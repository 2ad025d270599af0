//! Reply tree and argument value types.

use std::fmt;

use bytes::Bytes;

/// A reply produced by the external reply parser.
///
/// This is the generic tree every result processor interprets. It mirrors the
/// RESP2 reply shapes one-to-one; nil bulk strings and nil arrays are kept
/// distinct from their empty counterparts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawReply {
    /// `+OK` style status line.
    Status(Bytes),
    /// `-ERR ...` error line.
    Error(Bytes),
    /// `:123` integer.
    Integer(i64),
    /// `$...` bulk string, `None` for the nil bulk.
    Bulk(Option<Bytes>),
    /// `*...` array, `None` for the nil array.
    Array(Option<Vec<RawReply>>),
}

/// Reply shape, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Status,
    Error,
    Integer,
    Bulk,
    Array,
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplyKind::Status => "status",
            ReplyKind::Error => "error",
            ReplyKind::Integer => "integer",
            ReplyKind::Bulk => "bulk string",
            ReplyKind::Array => "array",
        };
        f.write_str(name)
    }
}

impl Default for RawReply {
    /// The nil bulk string.
    fn default() -> Self {
        RawReply::Bulk(None)
    }
}

impl RawReply {
    /// Create a status reply.
    pub fn status(text: &str) -> Self {
        RawReply::Status(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Create an error reply.
    pub fn error(text: &str) -> Self {
        RawReply::Error(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Create a non-nil bulk reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RawReply::Bulk(Some(data.into()))
    }

    /// Create a non-nil array reply.
    pub fn array(items: Vec<RawReply>) -> Self {
        RawReply::Array(Some(items))
    }

    /// Get the shape of this reply.
    pub fn kind(&self) -> ReplyKind {
        match self {
            RawReply::Status(_) => ReplyKind::Status,
            RawReply::Error(_) => ReplyKind::Error,
            RawReply::Integer(_) => ReplyKind::Integer,
            RawReply::Bulk(_) => ReplyKind::Bulk,
            RawReply::Array(_) => ReplyKind::Array,
        }
    }

    /// Check if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, RawReply::Error(_))
    }

    /// Check if this is a nil bulk or nil array.
    pub fn is_nil(&self) -> bool {
        matches!(self, RawReply::Bulk(None) | RawReply::Array(None))
    }

    /// Check if this is exactly the status `OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, RawReply::Status(text) if text.as_ref() == b"OK")
    }

    /// Try to get the payload of a status, error or non-nil bulk reply.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            RawReply::Status(data) | RawReply::Error(data) | RawReply::Bulk(Some(data)) => {
                Some(data)
            }
            _ => None,
        }
    }

    /// Try to interpret this reply as a signed 64-bit integer.
    ///
    /// Integer replies are returned directly; status and bulk replies are
    /// accepted when they hold a decimal integer (servers send scan cursors as
    /// bulk strings).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawReply::Integer(value) => Some(*value),
            RawReply::Status(data) | RawReply::Bulk(Some(data)) => parse_decimal(data),
            _ => None,
        }
    }

    /// Try to interpret this reply as an unsigned 64-bit integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RawReply::Integer(value) => u64::try_from(*value).ok(),
            RawReply::Status(data) | RawReply::Bulk(Some(data)) => {
                std::str::from_utf8(data).ok()?.parse().ok()
            }
            _ => None,
        }
    }

    /// Try to get the items of a non-nil array.
    pub fn as_items(&self) -> Option<&[RawReply]> {
        match self {
            RawReply::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Consume this reply, returning the items of a non-nil array.
    pub fn into_items(self) -> Option<Vec<RawReply>> {
        match self {
            RawReply::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Short description used in parse-failure diagnostics.
    pub fn describe(&self) -> String {
        match self {
            RawReply::Status(data) => format!("status {:?}", String::from_utf8_lossy(data)),
            RawReply::Error(data) => format!("error {:?}", String::from_utf8_lossy(data)),
            RawReply::Integer(value) => format!("integer {}", value),
            RawReply::Bulk(None) => "nil bulk string".to_string(),
            RawReply::Bulk(Some(data)) => format!("bulk string of {} bytes", data.len()),
            RawReply::Array(None) => "nil array".to_string(),
            RawReply::Array(Some(items)) => format!("array of {} items", items.len()),
        }
    }
}

fn parse_decimal(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

/// A single command argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arg {
    /// Opaque byte string.
    Bytes(Bytes),
    /// Integer, rendered in decimal on the wire.
    Int(i64),
    /// A key that was already resolved by the caller.
    Key(Bytes),
}

impl Arg {
    /// Create a key argument.
    pub fn key(key: impl Into<Bytes>) -> Self {
        Arg::Key(key.into())
    }

    /// Check if this argument is a key.
    pub fn is_key(&self) -> bool {
        matches!(self, Arg::Key(_))
    }

    /// Render the argument as it appears on the wire.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Arg::Bytes(data) | Arg::Key(data) => data.clone(),
            Arg::Int(value) => Bytes::from(value.to_string()),
        }
    }

    /// Check whether this argument renders to the same bytes as `literal`,
    /// ignoring ASCII case.
    pub fn eq_ignore_ascii_case(&self, literal: &str) -> bool {
        self.to_bytes().eq_ignore_ascii_case(literal.as_bytes())
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Bytes(data) | Arg::Key(data) => write!(f, "{}", String::from_utf8_lossy(data)),
            Arg::Int(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Bytes(Bytes::from(s))
    }
}

impl From<&[u8]> for Arg {
    fn from(b: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Arg {
    fn from(b: Bytes) -> Self {
        Arg::Bytes(b)
    }
}

impl From<i64> for Arg {
    fn from(i: i64) -> Self {
        Arg::Int(i)
    }
}

impl From<i32> for Arg {
    fn from(i: i32) -> Self {
        Arg::Int(i as i64)
    }
}

impl From<u64> for Arg {
    fn from(i: u64) -> Self {
        // Scan cursors are unsigned 64-bit; keep them lossless on the wire.
        match i64::try_from(i) {
            Ok(value) => Arg::Int(value),
            Err(_) => Arg::Bytes(Bytes::from(i.to_string())),
        }
    }
}

impl From<usize> for Arg {
    fn from(i: usize) -> Self {
        Arg::from(i as u64)
    }
}
