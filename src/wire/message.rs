//! `OP_MSG` body: flag bits plus one or more sections.

use crate::bson::{
    document::Document,
    raw::{decode_document, encode_document},
};

use super::{
    header::{Header, HEADER_LEN, OP_MSG},
    WireError,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageFlags(u32);

const CHECKSUM_PRESENT: u32 = 1 << 0;
const MORE_TO_COME: u32 = 1 << 1;
const EXHAUST_ALLOWED: u32 = 1 << 16;

impl MessageFlags {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn checksum_present(self) -> bool {
        self.0 & CHECKSUM_PRESENT != 0
    }

    pub fn more_to_come(self) -> bool {
        self.0 & MORE_TO_COME != 0
    }

    pub fn exhaust_allowed(self) -> bool {
        self.0 & EXHAUST_ALLOWED != 0
    }

    pub fn with_more_to_come(mut self, value: bool) -> Self {
        self.set(MORE_TO_COME, value);
        self
    }

    pub fn with_exhaust_allowed(mut self, value: bool) -> Self {
        self.set(EXHAUST_ALLOWED, value);
        self
    }

    pub fn with_checksum_present(mut self, value: bool) -> Self {
        self.set(CHECKSUM_PRESENT, value);
        self
    }

    fn set(&mut self, bit: u32, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// One `OP_MSG` payload section.
#[derive(Clone, Debug, PartialEq)]
pub enum Section {
    /// Kind 0: a single BSON document (the command or reply body itself).
    Document(Document),
    /// Kind 1: a named sequence of documents (e.g. bulk write `documents`/`updates`/`deletes`).
    Sequence {
        identifier: String,
        documents: Vec<Document>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub flags: MessageFlags,
    pub sections: Vec<Section>,
    pub checksum: Option<u32>,
}

impl Message {
    pub fn with_document(doc: Document) -> Self {
        Self {
            flags: MessageFlags::new(),
            sections: vec![Section::Document(doc)],
            checksum: None,
        }
    }

    /// The first Kind-0 section, which by convention carries the command (request) or the
    /// command reply (response) body.
    pub fn command_document(&self) -> Option<&Document> {
        self.sections.iter().find_map(|s| match s {
            Section::Document(d) => Some(d),
            Section::Sequence { .. } => None,
        })
    }

    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        for section in &self.sections {
            match section {
                Section::Document(doc) => {
                    body.push(0x00);
                    body.extend_from_slice(&encode_document(doc));
                }
                Section::Sequence { identifier, documents } => {
                    body.push(0x01);
                    let mut inner = Vec::new();
                    inner.extend_from_slice(identifier.as_bytes());
                    inner.push(0x00);
                    for doc in documents {
                        inner.extend_from_slice(&encode_document(doc));
                    }
                    let section_len = 4 + inner.len();
                    body.extend_from_slice(&(section_len as i32).to_le_bytes());
                    body.extend_from_slice(&inner);
                }
            }
        }
        if self.flags.checksum_present() {
            let checksum = self.checksum.unwrap_or_else(|| crc32c(&body));
            body.extend_from_slice(&checksum.to_le_bytes());
        }
        body
    }

    pub fn decode_body(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < 4 {
            return Err(WireError::Malformed("OP_MSG body shorter than flags field".into()));
        }
        let flags = MessageFlags::from_bits(u32::from_le_bytes(bytes[0..4].try_into().unwrap()));
        let checksum_len = if flags.checksum_present() { 4 } else { 0 };
        if bytes.len() < 4 + checksum_len {
            return Err(WireError::Malformed("OP_MSG body shorter than its checksum".into()));
        }
        let sections_bytes = &bytes[4..bytes.len() - checksum_len];

        let mut sections = Vec::new();
        let mut pos = 0usize;
        while pos < sections_bytes.len() {
            let kind = sections_bytes[pos];
            pos += 1;
            match kind {
                0x00 => {
                    let doc = decode_document(&sections_bytes[pos..])
                        .map_err(|e| WireError::Malformed(format!("bad Kind 0 section: {e}")))?;
                    pos += doc_len(&sections_bytes[pos..])?;
                    sections.push(Section::Document(doc));
                }
                0x01 => {
                    if sections_bytes.len() < pos + 4 {
                        return Err(WireError::Malformed("truncated Kind 1 section length".into()));
                    }
                    let section_len =
                        i32::from_le_bytes(sections_bytes[pos..pos + 4].try_into().unwrap()) as usize;
                    let section_end = pos + section_len;
                    if section_end > sections_bytes.len() {
                        return Err(WireError::Malformed("Kind 1 section overruns message".into()));
                    }
                    let mut cursor = pos + 4;
                    let id_start = cursor;
                    let id_end = sections_bytes[id_start..section_end]
                        .iter()
                        .position(|&b| b == 0)
                        .map(|p| id_start + p)
                        .ok_or_else(|| WireError::Malformed("Kind 1 identifier not NUL-terminated".into()))?;
                    let identifier = std::str::from_utf8(&sections_bytes[id_start..id_end])
                        .map_err(|_| WireError::Malformed("Kind 1 identifier not UTF-8".into()))?
                        .to_string();
                    cursor = id_end + 1;
                    let mut documents = Vec::new();
                    while cursor < section_end {
                        let doc = decode_document(&sections_bytes[cursor..section_end])
                            .map_err(|e| WireError::Malformed(format!("bad Kind 1 document: {e}")))?;
                        cursor += doc_len(&sections_bytes[cursor..section_end])?;
                        documents.push(doc);
                    }
                    sections.push(Section::Sequence { identifier, documents });
                    pos = section_end;
                }
                other => return Err(WireError::Malformed(format!("unknown section kind: {other}"))),
            }
        }

        let checksum = if flags.checksum_present() {
            let start = bytes.len() - 4;
            Some(u32::from_le_bytes(bytes[start..].try_into().unwrap()))
        } else {
            None
        };

        if let Some(checksum) = checksum {
            let computed = crc32c(&bytes[..bytes.len() - 4]);
            if computed != checksum {
                return Err(WireError::ChecksumMismatch);
            }
        }

        Ok(Self { flags, sections, checksum })
    }
}

fn doc_len(bytes: &[u8]) -> Result<usize, WireError> {
    if bytes.len() < 4 {
        return Err(WireError::Malformed("truncated document length".into()));
    }
    Ok(i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize)
}

/// Encodes a full request frame (header + `OP_MSG` body) ready to write to a transport.
pub fn encode_request(request_id: i32, message: &Message) -> Vec<u8> {
    let body = message.encode_body();
    let header = Header {
        length: (HEADER_LEN + body.len()) as i32,
        request_id,
        response_to: 0,
        op_code: OP_MSG,
    };
    let mut out = Vec::with_capacity(header.length as usize);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&body);
    out
}

/// Decodes a full frame (header already parsed, `body` is everything after it) into a
/// `(Header, Message)` pair; verifies the header's declared opcode is `OP_MSG`.
pub fn decode_frame(header: Header, body: &[u8]) -> Result<Message, WireError> {
    if header.op_code != OP_MSG {
        return Err(WireError::UnexpectedOpcode {
            expected: OP_MSG,
            actual: header.op_code,
        });
    }
    if header.length as usize != HEADER_LEN + body.len() {
        return Err(WireError::LengthMismatch {
            declared: header.length,
            actual: (HEADER_LEN + body.len()) as i32,
        });
    }
    Message::decode_body(body)
}

/// CRC-32C (Castagnoli), used for the optional `OP_MSG` checksum.
fn crc32c(data: &[u8]) -> u32 {
    const POLY: u32 = 0x82F6_3B78;
    let mut crc = !0u32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (POLY & mask);
        }
    }
    !crc
}
