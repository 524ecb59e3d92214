//! Self-describing values and their wire encoding
//!
//! A [`Value`] is an immutable tagged union. Clones are cheap: strings and
//! blobs are reference counted.
//!
//! # Wire format
//!
//! ```text
//! +----------+---------------------------+
//! | tag (u8) | payload                   |
//! +----------+---------------------------+
//!   0 inv      (none)
//!   1 usr      varint len, bytes
//!   2 int      varint(zigzag(v))
//!   3 uint     varint(v)
//!   4 string   varint len, utf-8 bytes
//!   5 addr     varint(v)
//!   6 double   varint(v.to_bits())
//!   7 bool     varint(0 | 1)
//!   8 type     varint(type tag)
//! ```
//!
//! # Example
//!
//! ```rust
//! use snapagg::value::Value;
//!
//! let v = Value::from("main");
//! let bytes = v.to_bytes();
//! assert_eq!(Value::from_bytes(&bytes).unwrap(), v);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::codec::{write_varint, zigzag_decode, zigzag_encode, Reader};
use crate::error::CodecError;
use crate::types::ValueType;

/// An immutable, self-describing value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The empty / invalid value
    #[default]
    Empty,
    /// Opaque user blob
    Usr(Arc<[u8]>),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// String
    Str(Arc<str>),
    /// Opaque address
    Addr(u64),
    /// Double precision float
    Double(f64),
    /// Boolean
    Bool(bool),
    /// A type tag
    Type(ValueType),
}

impl Value {
    /// Build a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Build an opaque blob value
    pub fn usr(bytes: impl AsRef<[u8]>) -> Self {
        Value::Usr(Arc::from(bytes.as_ref()))
    }

    /// Type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Empty => ValueType::Inv,
            Value::Usr(_) => ValueType::Usr,
            Value::Int(_) => ValueType::Int,
            Value::UInt(_) => ValueType::UInt,
            Value::Str(_) => ValueType::String,
            Value::Addr(_) => ValueType::Addr,
            Value::Double(_) => ValueType::Double,
            Value::Bool(_) => ValueType::Bool,
            Value::Type(_) => ValueType::Type,
        }
    }

    /// Whether this is the empty value
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Convert to a signed integer
    ///
    /// Doubles truncate toward zero; strings are parsed.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) | Value::Addr(v) => i64::try_from(*v).ok(),
            Value::Double(v) if v.is_finite() => Some(*v as i64),
            Value::Bool(b) => Some(*b as i64),
            Value::Str(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
            },
            _ => None,
        }
    }

    /// Convert to an unsigned integer
    pub fn to_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) | Value::Addr(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Double(v) if v.is_finite() && *v >= 0.0 => Some(*v as u64),
            Value::Bool(b) => Some(*b as u64),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Convert to a double
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Convert to a boolean
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            Value::UInt(v) => Some(*v != 0),
            Value::Double(v) => Some(*v != 0.0),
            Value::Str(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// String slice for string values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    // ========================================================================
    // Wire encoding
    // ========================================================================

    /// Append the wire encoding of this value to `buf`
    pub fn pack(&self, buf: &mut Vec<u8>) {
        buf.push(self.value_type().tag());
        match self {
            Value::Empty => {},
            Value::Usr(bytes) => {
                write_varint(buf, bytes.len() as u64);
                buf.extend_from_slice(bytes);
            },
            Value::Int(v) => write_varint(buf, zigzag_encode(*v)),
            Value::UInt(v) | Value::Addr(v) => write_varint(buf, *v),
            Value::Str(s) => {
                write_varint(buf, s.len() as u64);
                buf.extend_from_slice(s.as_bytes());
            },
            Value::Double(v) => write_varint(buf, v.to_bits()),
            Value::Bool(b) => write_varint(buf, *b as u64),
            Value::Type(t) => write_varint(buf, t.tag() as u64),
        }
    }

    /// Wire encoding as a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(10);
        self.pack(&mut buf);
        buf
    }

    /// Decode one value from the reader
    pub fn unpack(reader: &mut Reader<'_>) -> Result<Value, CodecError> {
        let tag = reader.byte()?;
        let ty = ValueType::from_tag(tag).ok_or(CodecError::UnknownTypeTag(tag))?;

        Ok(match ty {
            ValueType::Inv => Value::Empty,
            ValueType::Usr => {
                let len = reader.length()?;
                Value::usr(reader.bytes(len)?)
            },
            ValueType::Int => Value::Int(zigzag_decode(reader.varint()?)),
            ValueType::UInt => Value::UInt(reader.varint()?),
            ValueType::String => {
                let len = reader.length()?;
                let bytes = reader.bytes(len)?;
                let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Value::string(s)
            },
            ValueType::Addr => Value::Addr(reader.varint()?),
            ValueType::Double => Value::Double(f64::from_bits(reader.varint()?)),
            ValueType::Bool => match reader.varint()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(CodecError::InvalidValue(format!(
                        "bool payload {}",
                        other
                    )))
                },
            },
            ValueType::Type => {
                let raw = reader.varint()?;
                let tag = u8::try_from(raw)
                    .map_err(|_| CodecError::InvalidValue(format!("type payload {}", raw)))?;
                Value::Type(ValueType::from_tag(tag).ok_or(CodecError::UnknownTypeTag(tag))?)
            },
        })
    }

    /// Decode a buffer holding exactly one value
    pub fn from_bytes(data: &[u8]) -> Result<Value, CodecError> {
        let mut reader = Reader::new(data);
        let value = Self::unpack(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

// ============================================================================
// Equality, hashing and ordering
// ============================================================================

// Doubles compare by bit pattern so that Eq, Hash and Ord agree
// (NaN == NaN, -0.0 != 0.0).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Usr(a), Value::Usr(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Addr(a), Value::Addr(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value_type().hash(state);
        match self {
            Value::Empty => {},
            Value::Usr(b) => b.hash(state),
            Value::Int(v) => v.hash(state),
            Value::UInt(v) | Value::Addr(v) => v.hash(state),
            Value::Str(s) => s.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Type(t) => t.hash(state),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Usr(a), Value::Usr(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::UInt(a), Value::UInt(b)) | (Value::Addr(a), Value::Addr(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Type(a), Value::Type(b)) => a.cmp(b),
            _ => self.value_type().cmp(&other.value_type()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<ValueType> for Value {
    fn from(v: ValueType) -> Self {
        Value::Type(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Usr(bytes) => {
                for b in bytes.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            },
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::Addr(v) => write!(f, "{:#x}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Type(t) => write!(f, "{}", t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_roundtrip_all_variants() {
        let values = [
            Value::Empty,
            Value::usr([0u8, 1, 255]),
            Value::Int(-42),
            Value::Int(i64::MIN),
            Value::UInt(u64::MAX),
            Value::string("inner"),
            Value::string(""),
            Value::Addr(0xdead_beef),
            Value::Double(16.5),
            Value::Double(-0.0),
            Value::Double(f64::NAN),
            Value::Bool(true),
            Value::Type(ValueType::Double),
        ];
        for v in values {
            let bytes = v.to_bytes();
            assert_eq!(Value::from_bytes(&bytes).unwrap(), v, "{:?}", v);
        }
    }

    #[test]
    fn test_empty_encoding_is_bare_tag() {
        assert_eq!(Value::Empty.to_bytes(), vec![0]);
    }

    #[test]
    fn test_int_uses_zigzag_varint() {
        assert_eq!(Value::Int(-1).to_bytes(), vec![2, 1]);
        assert_eq!(Value::Int(150).to_bytes(), vec![2, 0xAC, 0x02]);
    }

    #[test]
    fn test_unpack_rejects_bad_input() {
        assert_eq!(
            Value::from_bytes(&[42]),
            Err(CodecError::UnknownTypeTag(42))
        );
        assert!(matches!(
            Value::from_bytes(&[4, 5, b'a']),
            Err(CodecError::Truncated { .. })
        ));
        assert_eq!(
            Value::from_bytes(&[4, 1, 0xFF]),
            Err(CodecError::InvalidUtf8)
        );
        assert_eq!(Value::from_bytes(&[3, 1, 0]), Err(CodecError::TrailingBytes(1)));
        assert!(matches!(
            Value::from_bytes(&[7, 2]),
            Err(CodecError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_double_equality_by_bits() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));

        let mut set = HashSet::new();
        set.insert(Value::Double(1.5));
        assert!(set.contains(&Value::Double(1.5)));
    }

    #[test]
    fn test_total_order_across_types() {
        let mut values = vec![
            Value::string("b"),
            Value::Int(3),
            Value::Empty,
            Value::Int(-3),
            Value::string("a"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Empty,
                Value::Int(-3),
                Value::Int(3),
                Value::string("a"),
                Value::string("b"),
            ]
        );
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(Value::Double(16.5).to_i64(), Some(16));
        assert_eq!(Value::Int(-4).to_f64(), Some(-4.0));
        assert_eq!(Value::string("42").to_i64(), Some(42));
        assert_eq!(Value::string(" 2.5 ").to_f64(), Some(2.5));
        assert_eq!(Value::Int(-1).to_u64(), None);
        assert_eq!(Value::Empty.to_f64(), None);
        assert_eq!(Value::string("x").to_f64(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("a").to_string(), "a");
        assert_eq!(Value::Int(-1).to_string(), "-1");
        assert_eq!(Value::Empty.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }
}
