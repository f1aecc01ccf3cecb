//! Errors produced by the BSON codec.

use std::fmt;

/// The kind of malformed-BSON condition encountered while decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The document or a nested element's declared length ran past the end of the input.
    TruncatedDocument,
    /// A CString field name was not NUL-terminated within the input, or contained an interior
    /// NUL in a position BSON forbids.
    BadCString,
    /// A string or CString was not valid UTF-8.
    InvalidUtf8,
    /// A binary subtype byte did not correspond to a known subtype.
    InvalidSubtype(u8),
    /// An element type byte did not correspond to a known BSON type.
    UnsupportedType(u8),
    /// A declared length did not match the length actually consumed while decoding the element.
    LengthMismatch { expected: i32, actual: i32 },
    /// An element's body ran past the enclosing document's declared end.
    ElementOverrun,
    /// A numeric conversion was requested that would lose information (e.g. reading an int64
    /// that doesn't fit in i32 as an int32).
    NumericConversion,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TruncatedDocument => write!(f, "truncated document"),
            ErrorKind::BadCString => write!(f, "malformed CString"),
            ErrorKind::InvalidUtf8 => write!(f, "invalid UTF-8"),
            ErrorKind::InvalidSubtype(b) => write!(f, "invalid binary subtype: {b:#x}"),
            ErrorKind::UnsupportedType(b) => write!(f, "unsupported element type: {b:#x}"),
            ErrorKind::LengthMismatch { expected, actual } => {
                write!(f, "length mismatch: expected {expected}, got {actual}")
            }
            ErrorKind::ElementOverrun => write!(f, "element overran its enclosing document"),
            ErrorKind::NumericConversion => write!(f, "numeric value does not fit target type"),
        }
    }
}

/// A BSON decode/encode failure, with the byte offset in the input at which it was detected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid BSON at offset {offset}: {kind}")]
pub struct Error {
    pub offset: usize,
    pub kind: ErrorKind,
}

impl Error {
    pub fn new(offset: usize, kind: ErrorKind) -> Self {
        Self { offset, kind }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
