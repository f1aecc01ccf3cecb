//! The BSON value model and codec: encode/decode to the binary wire format, plus extended-JSON
//! I/O.

pub mod datetime;
pub mod decimal128;
pub mod document;
pub mod error;
pub mod extjson;
pub mod oid;
pub mod raw;

#[cfg(test)]
mod test;

use std::fmt;

pub use datetime::DateTime;
pub use decimal128::Decimal128;
pub use document::Document;
pub use error::{Error, ErrorKind, Result};
pub use oid::ObjectId;

/// A BSON binary subtype, per the element-type table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum BinarySubtype {
    Generic,
    Function,
    BinaryOld,
    UuidOld,
    Uuid,
    Md5,
    Encrypted,
    Column,
    Sensitive,
    Other(u8),
}

impl BinarySubtype {
    pub fn tag(self) -> u8 {
        match self {
            Self::Generic => 0x00,
            Self::Function => 0x01,
            Self::BinaryOld => 0x02,
            Self::UuidOld => 0x03,
            Self::Uuid => 0x04,
            Self::Md5 => 0x05,
            Self::Encrypted => 0x06,
            Self::Column => 0x07,
            Self::Sensitive => 0x08,
            Self::Other(b) => b,
        }
    }

    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0x00 => Self::Generic,
            0x01 => Self::Function,
            0x02 => Self::BinaryOld,
            0x03 => Self::UuidOld,
            0x04 => Self::Uuid,
            0x05 => Self::Md5,
            0x06 => Self::Encrypted,
            0x07 => Self::Column,
            0x08 => Self::Sensitive,
            other => Self::Other(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Binary {
    pub subtype: BinarySubtype,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Regex {
    pub pattern: String,
    pub options: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CodeWithScope {
    pub code: String,
    pub scope: Document,
}

/// A BSON timestamp: an unsigned 32-bit seconds-since-epoch and a 32-bit increment, used
/// internally by the server for `$clusterTime` and oplog entries. Distinct from [`DateTime`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

/// The tagged union of all BSON value types.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Bson {
    Double(f64),
    String(String),
    Document(Document),
    Array(Vec<Bson>),
    Binary(Binary),
    Undefined,
    ObjectId(ObjectId),
    Boolean(bool),
    DateTime(DateTime),
    Null,
    RegularExpression(Regex),
    DbPointer { namespace: String, id: ObjectId },
    JavaScriptCode(String),
    Symbol(String),
    JavaScriptCodeWithScope(CodeWithScope),
    Int32(i32),
    Timestamp(Timestamp),
    Int64(i64),
    Decimal128(Decimal128),
    MinKey,
    MaxKey,
}

impl Bson {
    /// The one-byte element type tag written before the field name, per the wire format.
    pub fn element_type(&self) -> u8 {
        match self {
            Bson::Double(_) => 0x01,
            Bson::String(_) => 0x02,
            Bson::Document(_) => 0x03,
            Bson::Array(_) => 0x04,
            Bson::Binary(_) => 0x05,
            Bson::Undefined => 0x06,
            Bson::ObjectId(_) => 0x07,
            Bson::Boolean(_) => 0x08,
            Bson::DateTime(_) => 0x09,
            Bson::Null => 0x0A,
            Bson::RegularExpression(_) => 0x0B,
            Bson::DbPointer { .. } => 0x0C,
            Bson::JavaScriptCode(_) => 0x0D,
            Bson::Symbol(_) => 0x0E,
            Bson::JavaScriptCodeWithScope(_) => 0x0F,
            Bson::Int32(_) => 0x10,
            Bson::Timestamp(_) => 0x11,
            Bson::Int64(_) => 0x12,
            Bson::Decimal128(_) => 0x13,
            Bson::MinKey => 0xFF,
            Bson::MaxKey => 0x7F,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Bson::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// Strict numeric decode: succeeds only if the value fits losslessly in an `i32`. An `Int64`
    /// whose value exceeds `i32::MAX`/`MIN` is rejected rather than truncated.
    pub fn as_i32_strict(&self) -> Result<i32> {
        match self {
            Bson::Int32(i) => Ok(*i),
            Bson::Int64(i) => i32::try_from(*i).map_err(|_| Error::new(0, ErrorKind::NumericConversion)),
            Bson::Double(d) if d.fract() == 0.0 && *d >= i32::MIN as f64 && *d <= i32::MAX as f64 => {
                Ok(*d as i32)
            }
            _ => Err(Error::new(0, ErrorKind::NumericConversion)),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int64(i) => Some(*i),
            Bson::Int32(i) => Some(*i as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Bson]> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Bson::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime> {
        match self {
            Bson::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl fmt::Display for Bson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

macro_rules! from_impl {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Bson {
            fn from(v: $ty) -> Self {
                Bson::$variant(v)
            }
        }
    };
}

from_impl!(String, String);
from_impl!(Document, Document);
from_impl!(ObjectId, ObjectId);
from_impl!(Boolean, bool);
from_impl!(DateTime, DateTime);
from_impl!(Int32, i32);
from_impl!(Int64, i64);
from_impl!(Double, f64);
from_impl!(Timestamp, Timestamp);
from_impl!(Decimal128, Decimal128);

impl From<&str> for Bson {
    fn from(v: &str) -> Self {
        Bson::String(v.to_string())
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(v: Vec<T>) -> Self {
        Bson::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Bson::Null,
        }
    }
}

/// Encodes `doc` to its BSON binary representation.
pub fn encode(doc: &Document) -> Vec<u8> {
    raw::encode_document(doc)
}

/// Decodes a complete BSON document from `bytes`, performing full structural validation
/// (`decode(encode(x)) == x` for any `x` that round-trips through this module's types).
pub fn decode(bytes: &[u8]) -> Result<Document> {
    raw::decode_document(bytes)
}

/// Like [`decode`] but defers element-level errors (bad UTF-8, bad subtype, etc.) until the
/// field is actually read; only the document/array length framing is validated eagerly. Useful
/// when a caller only needs a handful of top-level fields out of a large reply.
pub fn decode_lazy(bytes: &[u8]) -> Result<raw::LazyDocument<'_>> {
    raw::LazyDocument::new(bytes)
}
