//! Protocol error types.

use thiserror::Error;

/// Errors that can occur during protocol parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid packet opcode: {0:#04x}")]
    InvalidOpcode(u8),

    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("Invalid UTF-8 string")]
    InvalidString,

    #[error("Non-finite coordinate in packet {0:#04x}")]
    NonFinite(u8),

    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}
