//! The 16-byte message header common to every wire protocol message.

pub const OP_MSG: i32 = 2013;
pub const OP_COMPRESSED: i32 = 2012;
pub const OP_QUERY: i32 = 2004;

pub const HEADER_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl Header {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.response_to.to_le_bytes());
        out[12..16].copy_from_slice(&self.op_code.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        Self {
            length: i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            request_id: i32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            response_to: i32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            op_code: i32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        }
    }
}

use std::sync::atomic::{AtomicI32, Ordering};

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Generates a process-unique request id. Identical request ids must never be outstanding on the
/// same connection at once; a monotonically increasing counter guarantees that as
/// long as it doesn't wrap within the lifetime of a single connection, which in practice it
/// never does.
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}
