//! `OP_COMPRESSED` wrapping/unwrapping. A command is compressed only when both peers advertised
//! a shared compressor and the command is not on the sensitive-command allowlist.

use super::{
    header::{Header, HEADER_LEN, OP_COMPRESSED, OP_MSG},
    message::Message,
    WireError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compressor {
    Snappy,
    Zlib { level: Option<i32> },
    Zstd,
}

impl Compressor {
    pub fn id(self) -> u8 {
        match self {
            Compressor::Snappy => 1,
            Compressor::Zlib { .. } => 2,
            Compressor::Zstd => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compressor::Snappy => "snappy",
            Compressor::Zlib { .. } => "zlib",
            Compressor::Zstd => "zstd",
        }
    }

    pub fn parse(name: &str) -> Option<&'static str> {
        ["snappy", "zlib", "zstd"].iter().find(|n| **n == name).copied()
    }

    fn compress(self, data: &[u8]) -> Result<Vec<u8>, WireError> {
        match self {
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => Ok(snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| WireError::Malformed(e.to_string()))?),
            #[cfg(not(feature = "snappy-compression"))]
            Compressor::Snappy => Err(WireError::Malformed("snappy support not compiled in".into())),

            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { level } => {
                use flate2::{write::ZlibEncoder, Compression};
                use std::io::Write;
                let level = level.unwrap_or(6).clamp(0, 9) as u32;
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
                encoder.write_all(data).map_err(|e| WireError::Malformed(e.to_string()))?;
                encoder.finish().map_err(|e| WireError::Malformed(e.to_string()))
            }
            #[cfg(not(feature = "zlib-compression"))]
            Compressor::Zlib { .. } => Err(WireError::Malformed("zlib support not compiled in".into())),

            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd => {
                zstd::bulk::compress(data, 0).map_err(|e| WireError::Malformed(e.to_string()))
            }
            #[cfg(not(feature = "zstd-compression"))]
            Compressor::Zstd => Err(WireError::Malformed("zstd support not compiled in".into())),
        }
    }
}

fn decompress(id: u8, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, WireError> {
    match id {
        1 => {
            #[cfg(feature = "snappy-compression")]
            {
                snap::raw::Decoder::new()
                    .decompress_vec(data)
                    .map_err(|e| WireError::Malformed(e.to_string()))
            }
            #[cfg(not(feature = "snappy-compression"))]
            {
                let _ = data;
                Err(WireError::Malformed("snappy support not compiled in".into()))
            }
        }
        2 => {
            #[cfg(feature = "zlib-compression")]
            {
                use flate2::write::ZlibDecoder;
                use std::io::Write;
                let mut decoder = ZlibDecoder::new(Vec::with_capacity(uncompressed_size));
                decoder.write_all(data).map_err(|e| WireError::Malformed(e.to_string()))?;
                decoder.finish().map_err(|e| WireError::Malformed(e.to_string()))
            }
            #[cfg(not(feature = "zlib-compression"))]
            {
                let _ = (data, uncompressed_size);
                Err(WireError::Malformed("zlib support not compiled in".into()))
            }
        }
        3 => {
            #[cfg(feature = "zstd-compression")]
            {
                zstd::bulk::decompress(data, uncompressed_size).map_err(|e| WireError::Malformed(e.to_string()))
            }
            #[cfg(not(feature = "zstd-compression"))]
            {
                let _ = (data, uncompressed_size);
                Err(WireError::Malformed("zstd support not compiled in".into()))
            }
        }
        other => Err(WireError::UnknownCompressor(other)),
    }
}

/// Wraps `message` (an `OP_MSG` body) in `OP_COMPRESSED` and returns the complete frame bytes,
/// ready to write to the transport.
pub fn wrap_request(request_id: i32, message: &Message, compressor: Compressor) -> Result<Vec<u8>, WireError> {
    let uncompressed = message.encode_body();
    let compressed = compressor.compress(&uncompressed)?;

    let mut body = Vec::with_capacity(9 + compressed.len());
    body.extend_from_slice(&OP_MSG.to_le_bytes());
    body.extend_from_slice(&(uncompressed.len() as i32).to_le_bytes());
    body.push(compressor.id());
    body.extend_from_slice(&compressed);

    let header = Header {
        length: (HEADER_LEN + body.len()) as i32,
        request_id,
        response_to: 0,
        op_code: OP_COMPRESSED,
    };
    let mut out = Vec::with_capacity(header.length as usize);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Unwraps an `OP_COMPRESSED` body (everything after the header) into the original opcode and
/// decompressed inner body bytes.
pub fn unwrap_reply(header: Header, body: &[u8]) -> Result<(i32, Vec<u8>), WireError> {
    if header.op_code != OP_COMPRESSED {
        return Err(WireError::UnexpectedOpcode {
            expected: OP_COMPRESSED,
            actual: header.op_code,
        });
    }
    if body.len() < 9 {
        return Err(WireError::Malformed("OP_COMPRESSED body shorter than its fixed fields".into()));
    }
    let original_opcode = i32::from_le_bytes(body[0..4].try_into().unwrap());
    let uncompressed_size = i32::from_le_bytes(body[4..8].try_into().unwrap());
    if uncompressed_size < 0 {
        return Err(WireError::Malformed("negative uncompressedSize".into()));
    }
    let compressor_id = body[8];
    let compressed = &body[9..];
    let decompressed = decompress(compressor_id, compressed, uncompressed_size as usize)?;
    if decompressed.len() != uncompressed_size as usize {
        return Err(WireError::LengthMismatch {
            declared: uncompressed_size,
            actual: decompressed.len() as i32,
        });
    }
    Ok((original_opcode, decompressed))
}
