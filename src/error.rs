//! # SimpleBinary Error Handling
//!
//! This module defines the SimpleBinaryError enum, which represents the
//! different error types that can occur in the simplebinary-rs crate.
//!
//! The framing and integrity variants carry the fields the exchange
//! controller needs to react: `InvalidChecksum` and `UnknownItemAddress`
//! report how many bytes the malformed frame occupies so the stream can
//! resynchronize without discarding the tail.

use crate::util::recvbuffer::RecvBufferError;
use thiserror::Error;

/// Represents the different error types that can occur in the SimpleBinary crate.
#[derive(Debug, Error)]
pub enum SimpleBinaryError {
    /// Indicates an error on the underlying serial port or TCP connection.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The buffer holds fewer bytes than the frame at its head declares.
    /// Recoverable by waiting for more bytes; nothing may be consumed.
    #[error("Incomplete frame: need more bytes")]
    IncompleteFrame,

    /// The CRC trailer does not match the frame content.
    #[error("Invalid CRC: expected 0x{expected:02X}, calculated 0x{calculated:02X}")]
    InvalidChecksum {
        expected: u8,
        calculated: u8,
        /// Declared length of the malformed frame; the caller discards
        /// exactly this many bytes.
        frame_len: usize,
    },

    /// A data frame referenced an item address with no configuration entry.
    #[error("Device {device}: no item configured at address {item_address}")]
    UnknownItemAddress {
        device: u8,
        item_address: u16,
        frame_len: usize,
    },

    /// The leading bytes do not match any known frame shape.
    #[error("Unrecognized message kind 0x{kind:02X}")]
    UnrecognizedMessage { kind: u8 },

    /// Indicates an invariant violation in the receive buffer.
    #[error("Receive buffer error: {0}")]
    Buffer(#[from] RecvBufferError),

    /// Indicates an error in the item or channel configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Indicates a channel worker failure (worker task gone, queue closed).
    #[error("Channel error: {0}")]
    ChannelError(String),
}
