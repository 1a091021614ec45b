//! Binary layouts for records held inside the two ring-buffer streams
//! (spec.md §3, "DataPoint"/"NonCriticalRecord").
//!
//! These are hand-written byte-slicing codecs rather than a derive macro:
//! the records are written once and parsed once per send cycle, so the
//! small amount of boilerplate buys an explicit, auditable wire shape
//! instead of depending on field order in a `repr(C)` struct.

use crate::registry::DataType;

/// Severity band a [`DataPoint::Log`] was logged at (spec.md §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error = 0,
    Warning = 1,
    Event = 2,
}

impl Severity {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Severity::Error),
            1 => Some(Severity::Warning),
            2 => Some(Severity::Event),
            _ => None,
        }
    }
}

/// A typed value, tagged by [`DataType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    Ipv4([u8; 4]),
    Mac([u8; 6]),
    Str(String),
    Null,
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::I32(_) => DataType::I32,
            Value::U32(_) => DataType::U32,
            Value::F32(_) => DataType::F32,
            Value::Ipv4(_) => DataType::Ipv4,
            Value::Mac(_) => DataType::Mac,
            Value::Str(_) => DataType::Str,
            Value::Null => DataType::Null,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Bool(v) => out.push(*v as u8),
            Value::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Ipv4(v) => out.extend_from_slice(v),
            Value::Mac(v) => out.extend_from_slice(v),
            Value::Str(v) => {
                let bytes = v.as_bytes();
                let len = bytes.len().min(u8::MAX as usize) as u8;
                out.push(len);
                out.extend_from_slice(&bytes[..len as usize]);
            }
            Value::Null => {}
        }
    }

    fn decode(data_type: DataType, buf: &[u8]) -> Option<(Self, usize)> {
        Some(match data_type {
            DataType::Bool => (Value::Bool(*buf.first()? != 0), 1),
            DataType::I32 => (Value::I32(i32::from_le_bytes(buf.get(..4)?.try_into().ok()?)), 4),
            DataType::U32 => (Value::U32(u32::from_le_bytes(buf.get(..4)?.try_into().ok()?)), 4),
            DataType::F32 => (Value::F32(f32::from_le_bytes(buf.get(..4)?.try_into().ok()?)), 4),
            DataType::Ipv4 => (Value::Ipv4(buf.get(..4)?.try_into().ok()?), 4),
            DataType::Mac => (Value::Mac(buf.get(..6)?.try_into().ok()?), 6),
            DataType::Str => {
                let len = *buf.first()? as usize;
                let bytes = buf.get(1..1 + len)?;
                (Value::Str(String::from_utf8_lossy(bytes).into_owned()), 1 + len)
            }
            DataType::Null => (Value::Null, 0),
        })
    }
}

/// Maximum message length accepted for a `Log` record (spec.md §4.D).
pub const LOG_MESSAGE_MAX: usize = 64;

/// A record appended to the critical stream (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub enum DataPoint {
    Log {
        severity: Severity,
        pc: u32,
        timestamp_us: u64,
        tag: String,
        message: String,
    },
    Metric {
        tag: String,
        key: String,
        timestamp_us: u64,
        value: Value,
    },
    Variable {
        tag: String,
        key: String,
        timestamp_us: u64,
        value: Value,
    },
}

const KIND_LOG: u8 = 0;
const KIND_METRIC: u8 = 1;
const KIND_VARIABLE: u8 = 2;

impl DataPoint {
    /// Serialize as `[total_len: u16][kind: u8]...`, appending to `out`.
    /// Returns the number of bytes written, including the 2-byte length
    /// prefix (the prefix value itself does not count itself).
    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        let start = out.len();
        out.extend_from_slice(&[0u8; 2]); // length placeholder
        match self {
            DataPoint::Log {
                severity,
                pc,
                timestamp_us,
                tag,
                message,
            } => {
                out.push(KIND_LOG);
                out.push(*severity as u8);
                out.extend_from_slice(&pc.to_le_bytes());
                out.extend_from_slice(&timestamp_us.to_le_bytes());
                push_short_string(out, tag);
                let trimmed = truncate_utf8(message, LOG_MESSAGE_MAX);
                push_short_string(out, trimmed);
            }
            DataPoint::Metric {
                tag,
                key,
                timestamp_us,
                value,
            }
            | DataPoint::Variable {
                tag,
                key,
                timestamp_us,
                value,
            } => {
                let kind = if matches!(self, DataPoint::Metric { .. }) {
                    KIND_METRIC
                } else {
                    KIND_VARIABLE
                };
                out.push(kind);
                out.push(value.data_type() as u8);
                out.extend_from_slice(&timestamp_us.to_le_bytes());
                push_short_string(out, tag);
                push_short_string(out, key);
                value.encode(out);
            }
        }
        let len = out.len() - start;
        let len_u16 = len as u16;
        out[start..start + 2].copy_from_slice(&len_u16.to_le_bytes());
        len
    }

    /// Parse one record from the front of `buf`. Returns the record and the
    /// number of bytes it occupied, or `None` if `buf` does not hold a
    /// complete, well-formed record.
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        let total_len = u16::from_le_bytes(buf.get(0..2)?.try_into().ok()?) as usize;
        if total_len < 2 || buf.len() < total_len {
            return None;
        }
        let body = &buf[2..total_len];
        let kind = *body.first()?;
        let point = match kind {
            KIND_LOG => {
                let severity = Severity::from_u8(*body.get(1)?)?;
                let pc = u32::from_le_bytes(body.get(2..6)?.try_into().ok()?);
                let timestamp_us = u64::from_le_bytes(body.get(6..14)?.try_into().ok()?);
                let (tag, consumed) = pop_short_string(body.get(14..)?)?;
                let (message, _) = pop_short_string(body.get(14 + consumed..)?)?;
                DataPoint::Log {
                    severity,
                    pc,
                    timestamp_us,
                    tag,
                    message,
                }
            }
            KIND_METRIC | KIND_VARIABLE => {
                let data_type = DataType::from_u8(*body.get(1)?)?;
                let timestamp_us = u64::from_le_bytes(body.get(2..10)?.try_into().ok()?);
                let (tag, c1) = pop_short_string(body.get(10..)?)?;
                let (key, c2) = pop_short_string(body.get(10 + c1..)?)?;
                let (value, _) = Value::decode(data_type, body.get(10 + c1 + c2..)?)?;
                if kind == KIND_METRIC {
                    DataPoint::Metric {
                        tag,
                        key,
                        timestamp_us,
                        value,
                    }
                } else {
                    DataPoint::Variable {
                        tag,
                        key,
                        timestamp_us,
                        value,
                    }
                }
            }
            _ => return None,
        };
        Some((point, total_len))
    }
}

fn push_short_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u8::MAX as usize) as u8;
    out.push(len);
    out.extend_from_slice(&bytes[..len as usize]);
}

fn pop_short_string(buf: &[u8]) -> Option<(String, usize)> {
    let len = *buf.first()? as usize;
    let bytes = buf.get(1..1 + len)?;
    Some((String::from_utf8_lossy(bytes).into_owned(), 1 + len))
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Interned group-name id a non-critical record carries instead of the
/// original's raw code-segment pointer (spec.md §9, "Static tag-pointer
/// assumption").
pub type GroupId = u16;

/// A record appended to the non-critical stream (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct NonCriticalRecord {
    pub group: GroupId,
    pub bytes: Vec<u8>,
}

impl NonCriticalRecord {
    /// Header is `{group: u16, len: u16}`, matching the original's 8-byte
    /// `{tag_ptr, len, pad}` header shrunk to a 4-byte interned-id header.
    pub const HEADER_LEN: usize = 4;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.group.to_le_bytes());
        out.extend_from_slice(&(self.bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.bytes);
    }

    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.bytes.len()
    }

    /// Parse one record from the front of `buf`, returning the record and
    /// total bytes consumed.
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        let group = u16::from_le_bytes(buf.get(0..2)?.try_into().ok()?);
        let len = u16::from_le_bytes(buf.get(2..4)?.try_into().ok()?) as usize;
        let bytes = buf.get(4..4 + len)?.to_vec();
        Some((NonCriticalRecord { group, bytes }, 4 + len))
    }

    /// Length of just the header + length fields of the record starting at
    /// `buf`, used by the overwrite-oldest policy to skip a record without
    /// fully decoding it.
    pub fn peek_len(buf: &[u8]) -> Option<usize> {
        let len = u16::from_le_bytes(buf.get(2..4)?.try_into().ok()?) as usize;
        Some(4 + len)
    }
}
