//! Binary encode/decode for BSON documents and values.
//!
//! Documents are little-endian, length-prefixed, with NUL-terminated field names and a trailing
//! `0x00` sentinel byte. Encoding is two-pass: the body is built first, then the total
//! length is written as a 4-byte prefix, avoiding the need to rewind a writer.

use std::io::{self, Write};

use super::{
    datetime::DateTime,
    decimal128::Decimal128,
    document::Document,
    error::{Error, ErrorKind, Result},
    oid::ObjectId,
    Binary,
    BinarySubtype,
    Bson,
    CodeWithScope,
    Regex,
    Timestamp,
};

/// The codec will refuse to decode a document whose declared length exceeds this. The server
/// enforces 16 MiB; the codec is deliberately more permissive so it can decode the occasional
/// oversized internal command reply (e.g. `isMaster` during a slow handshake is never this big
/// in practice, but `listCollections`/`explain` replies sometimes are).
pub const MAX_DOCUMENT_LEN: i32 = 32 * 1024 * 1024;

pub fn encode_document(doc: &Document) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, value) in doc.iter() {
        write_element(&mut body, key, value).expect("writing to a Vec<u8> cannot fail");
    }
    let total_len = 4 + body.len() + 1;
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&(total_len as i32).to_le_bytes());
    out.extend_from_slice(&body);
    out.push(0x00);
    out
}

pub fn encode_document_into<W: Write>(doc: &Document, writer: &mut W) -> io::Result<()> {
    let bytes = encode_document(doc);
    writer.write_all(&bytes)
}

fn write_cstring<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    debug_assert!(!s.as_bytes().contains(&0), "field names may not contain NUL");
    w.write_all(s.as_bytes())?;
    w.write_all(&[0x00])
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let len = s.len() as i32 + 1;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    w.write_all(&[0x00])
}

fn write_element<W: Write>(w: &mut W, key: &str, value: &Bson) -> io::Result<()> {
    w.write_all(&[value.element_type()])?;
    write_cstring(w, key)?;
    write_value(w, value)
}

fn write_value<W: Write>(w: &mut W, value: &Bson) -> io::Result<()> {
    match value {
        Bson::Double(d) => w.write_all(&d.to_bits().to_le_bytes()),
        Bson::String(s) => write_string(w, s),
        Bson::Document(d) => {
            let bytes = encode_document(d);
            w.write_all(&bytes)
        }
        Bson::Array(items) => {
            let mut body = Vec::new();
            for (i, item) in items.iter().enumerate() {
                write_element(&mut body, &i.to_string(), item)?;
            }
            let total_len = 4 + body.len() + 1;
            w.write_all(&(total_len as i32).to_le_bytes())?;
            w.write_all(&body)?;
            w.write_all(&[0x00])
        }
        Bson::Binary(Binary { subtype, bytes }) => {
            w.write_all(&(bytes.len() as i32).to_le_bytes())?;
            w.write_all(&[subtype.tag()])?;
            w.write_all(bytes)
        }
        Bson::Undefined => Ok(()),
        Bson::ObjectId(oid) => w.write_all(&oid.bytes()),
        Bson::Boolean(b) => w.write_all(&[if *b { 0x01 } else { 0x00 }]),
        Bson::DateTime(dt) => w.write_all(&dt.millis().to_le_bytes()),
        Bson::Null => Ok(()),
        Bson::RegularExpression(Regex { pattern, options }) => {
            write_cstring(w, pattern)?;
            let mut sorted_opts: Vec<char> = options.chars().collect();
            sorted_opts.sort_unstable();
            let sorted_opts: String = sorted_opts.into_iter().collect();
            write_cstring(w, &sorted_opts)
        }
        Bson::DbPointer { namespace, id } => {
            write_string(w, namespace)?;
            w.write_all(&id.bytes())
        }
        Bson::JavaScriptCode(code) => write_string(w, code),
        Bson::Symbol(s) => write_string(w, s),
        Bson::JavaScriptCodeWithScope(CodeWithScope { code, scope }) => {
            let mut inner = Vec::new();
            write_string(&mut inner, code)?;
            inner.extend_from_slice(&encode_document(scope));
            let total_len = 4 + inner.len();
            w.write_all(&(total_len as i32).to_le_bytes())?;
            w.write_all(&inner)
        }
        Bson::Int32(i) => w.write_all(&i.to_le_bytes()),
        Bson::Timestamp(Timestamp { time, increment }) => {
            w.write_all(&increment.to_le_bytes())?;
            w.write_all(&time.to_le_bytes())
        }
        Bson::Int64(i) => w.write_all(&i.to_le_bytes()),
        Bson::Decimal128(d) => w.write_all(&d.bytes()),
        Bson::MinKey | Bson::MaxKey => Ok(()),
    }
}

/// A cursor over a byte slice that tracks its absolute offset into the original input, for
/// error reporting.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn err(&self, kind: ErrorKind) -> Error {
        Error::new(self.pos, kind)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < self.pos + n {
            return Err(self.err(ErrorKind::TruncatedDocument));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_le_bytes(self.take(8)?.try_into().unwrap())))
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn cstring(&mut self) -> Result<String> {
        let start = self.pos;
        let nul_pos = self.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.err(ErrorKind::BadCString))?;
        let slice = &self.bytes[start..start + nul_pos];
        let s = std::str::from_utf8(slice).map_err(|_| self.err(ErrorKind::InvalidUtf8))?;
        self.pos = start + nul_pos + 1;
        Ok(s.to_string())
    }

    fn string(&mut self) -> Result<String> {
        let len = self.i32()?;
        if len < 1 {
            return Err(self.err(ErrorKind::LengthMismatch { expected: 1, actual: len }));
        }
        let bytes = self.take(len as usize)?;
        if bytes.last() != Some(&0) {
            return Err(self.err(ErrorKind::BadCString));
        }
        std::str::from_utf8(&bytes[..bytes.len() - 1])
            .map(str::to_string)
            .map_err(|_| self.err(ErrorKind::InvalidUtf8))
    }
}

pub fn decode_document(bytes: &[u8]) -> Result<Document> {
    let mut reader = Reader::new(bytes);
    let doc = read_document(&mut reader)?;
    if reader.pos != bytes.len() {
        return Err(Error::new(
            reader.pos,
            ErrorKind::LengthMismatch {
                expected: bytes.len() as i32,
                actual: reader.pos as i32,
            },
        ));
    }
    Ok(doc)
}

fn read_document(reader: &mut Reader<'_>) -> Result<Document> {
    let start = reader.pos;
    let declared_len = reader.i32()?;
    if declared_len < 5 || declared_len > MAX_DOCUMENT_LEN {
        return Err(reader.err(ErrorKind::TruncatedDocument));
    }
    let end = start + declared_len as usize;
    if end > reader.bytes.len() {
        return Err(reader.err(ErrorKind::TruncatedDocument));
    }

    let mut doc = Document::new();
    loop {
        if reader.pos > end - 1 {
            return Err(reader.err(ErrorKind::ElementOverrun));
        }
        let tag = reader.byte()?;
        if tag == 0x00 {
            break;
        }
        let key = reader.cstring()?;
        let value = read_value(reader, tag)?;
        if reader.pos > end {
            return Err(reader.err(ErrorKind::ElementOverrun));
        }
        doc.insert(key, value);
    }

    if reader.pos != end {
        return Err(Error::new(
            start,
            ErrorKind::LengthMismatch {
                expected: declared_len,
                actual: (reader.pos - start) as i32,
            },
        ));
    }

    Ok(doc)
}

fn read_array(reader: &mut Reader<'_>) -> Result<Vec<Bson>> {
    let doc = read_document(reader)?;
    Ok(doc.into_iter().map(|(_, v)| v).collect())
}

fn read_value(reader: &mut Reader<'_>, tag: u8) -> Result<Bson> {
    Ok(match tag {
        0x01 => Bson::Double(reader.f64()?),
        0x02 => Bson::String(reader.string()?),
        0x03 => Bson::Document(read_document(reader)?),
        0x04 => Bson::Array(read_array(reader)?),
        0x05 => {
            let len = reader.i32()?;
            if len < 0 {
                return Err(reader.err(ErrorKind::LengthMismatch { expected: 0, actual: len }));
            }
            let subtype = BinarySubtype::from_tag(reader.byte()?);
            let bytes = reader.take(len as usize)?.to_vec();
            Bson::Binary(Binary { subtype, bytes })
        }
        0x06 => Bson::Undefined,
        0x07 => Bson::ObjectId(ObjectId::from_bytes(reader.take(12)?.try_into().unwrap())),
        0x08 => {
            let b = reader.byte()?;
            Bson::Boolean(b != 0)
        }
        0x09 => Bson::DateTime(DateTime::from_millis(reader.i64()?)),
        0x0A => Bson::Null,
        0x0B => {
            let pattern = reader.cstring()?;
            let options = reader.cstring()?;
            Bson::RegularExpression(Regex { pattern, options })
        }
        0x0C => {
            let namespace = reader.string()?;
            let id = ObjectId::from_bytes(reader.take(12)?.try_into().unwrap());
            Bson::DbPointer { namespace, id }
        }
        0x0D => Bson::JavaScriptCode(reader.string()?),
        0x0E => Bson::Symbol(reader.string()?),
        0x0F => {
            let start = reader.pos;
            let declared_len = reader.i32()?;
            let code = reader.string()?;
            let scope = read_document(reader)?;
            let actual = (reader.pos - start) as i32;
            if actual != declared_len {
                return Err(Error::new(
                    start,
                    ErrorKind::LengthMismatch { expected: declared_len, actual },
                ));
            }
            Bson::JavaScriptCodeWithScope(CodeWithScope { code, scope })
        }
        0x10 => Bson::Int32(reader.i32()?),
        0x11 => {
            let increment = reader.u32()?;
            let time = reader.u32()?;
            Bson::Timestamp(Timestamp { time, increment })
        }
        0x12 => Bson::Int64(reader.i64()?),
        0x13 => Bson::Decimal128(Decimal128::from_bytes(reader.take(16)?.try_into().unwrap())),
        0xFF => Bson::MinKey,
        0x7F => Bson::MaxKey,
        other => return Err(reader.err(ErrorKind::UnsupportedType(other))),
    })
}

/// A document whose framing (lengths, element boundaries) has been validated but whose field
/// values have not yet been parsed. `get` parses a single field on demand.
pub struct LazyDocument<'a> {
    bytes: &'a [u8],
    /// (key, tag, value start offset) in document order, collected during the framing pass.
    fields: Vec<(String, u8, usize)>,
}

impl<'a> LazyDocument<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let declared_len = reader.i32()?;
        if declared_len < 5 || declared_len as usize > bytes.len() {
            return Err(reader.err(ErrorKind::TruncatedDocument));
        }
        let end = declared_len as usize;
        let mut fields = Vec::new();
        loop {
            if reader.pos > end - 1 {
                return Err(reader.err(ErrorKind::ElementOverrun));
            }
            let tag = reader.byte()?;
            if tag == 0 {
                break;
            }
            let key = reader.cstring()?;
            let value_start = reader.pos;
            // Only validate length framing here; per-field content errors (bad UTF-8, bad
            // subtype, ...) are deferred until `get` is called for that field.
            skip_value(&mut reader, tag)?;
            fields.push((key, tag, value_start));
        }
        Ok(Self { bytes, fields })
    }

    pub fn get(&self, key: &str) -> Result<Option<Bson>> {
        let Some((_, tag, start)) = self.fields.iter().find(|(k, _, _)| k == key) else {
            return Ok(None);
        };
        let mut reader = Reader::new(self.bytes);
        reader.pos = *start;
        Ok(Some(read_value(&mut reader, *tag)?))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _, _)| k.as_str())
    }
}

/// Advances `reader` past the value without validating its content, only its length framing.
fn skip_value(reader: &mut Reader<'_>, tag: u8) -> Result<()> {
    match tag {
        0x01 => {
            reader.take(8)?;
        }
        0x02 | 0x0D | 0x0E => {
            let len = reader.i32()?;
            if len < 1 {
                return Err(reader.err(ErrorKind::LengthMismatch { expected: 1, actual: len }));
            }
            reader.take(len as usize)?;
        }
        0x03 | 0x04 => {
            let start = reader.pos;
            let declared_len = reader.i32()?;
            if declared_len < 5 {
                return Err(reader.err(ErrorKind::TruncatedDocument));
            }
            reader.pos = start;
            reader.take(declared_len as usize)?;
        }
        0x05 => {
            let len = reader.i32()?;
            reader.take(1 + len.max(0) as usize)?;
        }
        0x06 | 0x0A | 0xFF | 0x7F => {}
        0x07 => {
            reader.take(12)?;
        }
        0x08 => {
            reader.take(1)?;
        }
        0x09 | 0x12 => {
            reader.take(8)?;
        }
        0x0B => {
            reader.cstring()?;
            reader.cstring()?;
        }
        0x0C => {
            let len = reader.i32()?;
            if len < 1 {
                return Err(reader.err(ErrorKind::LengthMismatch { expected: 1, actual: len }));
            }
            reader.take(len as usize)?;
            reader.take(12)?;
        }
        0x0F => {
            let start = reader.pos;
            let declared_len = reader.i32()?;
            if declared_len < 4 {
                return Err(reader.err(ErrorKind::TruncatedDocument));
            }
            reader.pos = start;
            reader.take(declared_len as usize)?;
        }
        0x10 => {
            reader.take(4)?;
        }
        0x11 => {
            reader.take(8)?;
        }
        0x13 => {
            reader.take(16)?;
        }
        other => return Err(reader.err(ErrorKind::UnsupportedType(other))),
    }
    Ok(())
}
