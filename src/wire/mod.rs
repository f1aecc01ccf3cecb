//! Wire protocol framing: `OP_MSG` request/reply messages with `Kind 0`/`Kind 1` sections and
//! optional `OP_COMPRESSED` wrapping.

pub mod compression;
pub mod header;
pub mod message;

#[cfg(test)]
mod test;

pub use compression::Compressor;
pub use header::{Header, OP_COMPRESSED, OP_MSG};
pub use message::{Message, MessageFlags, Section};

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum WireError {
    #[error("unexpected opcode: expected {expected}, got {actual}")]
    UnexpectedOpcode { expected: i32, actual: i32 },
    #[error("declared message length {declared} does not match actual length {actual}")]
    LengthMismatch { declared: i32, actual: i32 },
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("server sent a compressed reply but compression is illegal on this connection")]
    CompressedReplyIllegal,
    #[error("unknown compressor id: {0}")]
    UnknownCompressor(u8),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("the connection has `moreToCome` pending and cannot accept a new request")]
    MoreToComePending,
}

/// Commands that must never be sent compressed, because compressing the handshake/auth exchange
/// could leak information about its (still-negotiating) state.
pub const SENSITIVE_COMMANDS: &[&str] = &[
    "hello",
    "ismaster",
    "isMaster",
    "saslstart",
    "saslStart",
    "saslcontinue",
    "saslContinue",
    "authenticate",
    "getnonce",
    "createuser",
    "createUser",
    "updateuser",
    "updateUser",
    "copydbsaslstart",
    "copydbSaslStart",
    "copydbgetnonce",
    "copydbGetNonce",
    "copydb",
];

pub fn is_sensitive_command(name: &str) -> bool {
    SENSITIVE_COMMANDS.iter().any(|s| s.eq_ignore_ascii_case(name))
}
