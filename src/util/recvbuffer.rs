//! # ReceiveBuffer - Mode-Tagged Streaming Buffer
//!
//! This module provides the fixed-capacity receive buffer that sits between
//! the transport and the frame codec. The buffer is always in one of two
//! explicit modes:
//!
//! - `Filling`: bytes arriving from the transport are appended at the write
//!   cursor.
//! - `Scanning`: the codec reads from the read cursor up to the frozen
//!   write limit.
//!
//! Mode transitions (`flip` into Scanning, `compact` back into Filling)
//! never drop or reorder bytes: `compact` slides the unconsumed tail to
//! offset 0 so a frame split across two transport reads is reassembled on
//! the next append. Illegal sequencing (such as appending while Scanning)
//! is reported as a `ModeError` instead of silently corrupting the stream.
//!
//! ## Usage
//!
//! ```rust
//! use simplebinary_rs::util::ReceiveBuffer;
//!
//! let mut buffer = ReceiveBuffer::new();
//! buffer.append(&[0x01, 0x02, 0x03]).unwrap();
//! buffer.flip().unwrap();
//! assert_eq!(buffer.unread(), &[0x01, 0x02, 0x03]);
//! buffer.advance(2).unwrap();
//! buffer.compact().unwrap();
//! assert_eq!(buffer.occupied(), 1);
//! ```

use crate::constants::RECEIVE_BUFFER_CAPACITY;
use thiserror::Error;

/// The two explicit states of the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Accepting appended bytes from the transport.
    Filling,
    /// Being scanned by the codec; the write boundary is frozen.
    Scanning,
}

/// Invariant violations reported by ReceiveBuffer operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecvBufferError {
    #[error("Illegal {operation} while buffer is in {mode:?} mode")]
    ModeError {
        operation: &'static str,
        mode: BufferMode,
    },

    #[error("Buffer overrun: capacity {capacity} bytes exceeded")]
    Overrun { capacity: usize },
}

/// Fixed-capacity byte buffer with explicit Filling/Scanning modes.
///
/// Invariant: the bytes between the read position and the write limit are
/// exactly the unconsumed, not-yet-decoded data.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    /// Write cursor while Filling, read cursor while Scanning.
    position: usize,
    /// Frozen write boundary while Scanning; unused while Filling.
    limit: usize,
    /// Consumption boundary while Scanning; `rewind` returns the read
    /// cursor here so undecoded bytes can be retried.
    mark: usize,
    mode: BufferMode,
}

impl ReceiveBuffer {
    /// Create a buffer with the default protocol capacity.
    pub fn new() -> Self {
        Self::with_capacity(RECEIVE_BUFFER_CAPACITY)
    }

    /// Create a buffer with an explicit fixed capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        ReceiveBuffer {
            data: vec![0; capacity],
            position: 0,
            limit: 0,
            mark: 0,
            mode: BufferMode::Filling,
        }
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of buffered bytes: everything written while Filling, or the
    /// frozen scan window while Scanning.
    pub fn occupied(&self) -> usize {
        match self.mode {
            BufferMode::Filling => self.position,
            BufferMode::Scanning => self.limit,
        }
    }

    /// Append bytes arriving from the transport. Only legal while Filling.
    ///
    /// Exceeding the fixed capacity is an `Overrun`: the buffer is cleared
    /// (total loss of synchronization) and the fault is reported upstream.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), RecvBufferError> {
        if self.mode != BufferMode::Filling {
            return Err(RecvBufferError::ModeError {
                operation: "append",
                mode: self.mode,
            });
        }
        if self.position + bytes.len() > self.data.len() {
            self.clear();
            return Err(RecvBufferError::Overrun {
                capacity: self.data.len(),
            });
        }
        self.data[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    /// Switch from Filling to Scanning, freezing the write boundary.
    pub fn flip(&mut self) -> Result<(), RecvBufferError> {
        if self.mode != BufferMode::Filling {
            return Err(RecvBufferError::ModeError {
                operation: "flip",
                mode: self.mode,
            });
        }
        self.limit = self.position;
        self.position = 0;
        self.mark = 0;
        self.mode = BufferMode::Scanning;
        Ok(())
    }

    /// View of the unconsumed region. Empty while Filling.
    pub fn unread(&self) -> &[u8] {
        match self.mode {
            BufferMode::Filling => &[],
            BufferMode::Scanning => &self.data[self.position..self.limit],
        }
    }

    /// View of the whole buffered region, regardless of the read cursor.
    /// Used for diagnostics dumps.
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.occupied()]
    }

    /// Consume `count` bytes of the scan window. Only legal while Scanning.
    pub fn advance(&mut self, count: usize) -> Result<(), RecvBufferError> {
        if self.mode != BufferMode::Scanning {
            return Err(RecvBufferError::ModeError {
                operation: "advance",
                mode: self.mode,
            });
        }
        self.position = (self.position + count).min(self.limit);
        self.mark = self.position;
        Ok(())
    }

    /// Reset the read cursor to the start of the still-unconsumed region
    /// without discarding bytes. Used when a decode attempt fails with an
    /// incomplete frame so the same bytes are retried after more arrive.
    pub fn rewind(&mut self) -> Result<(), RecvBufferError> {
        if self.mode != BufferMode::Scanning {
            return Err(RecvBufferError::ModeError {
                operation: "rewind",
                mode: self.mode,
            });
        }
        self.position = self.mark;
        Ok(())
    }

    /// Slide the unconsumed tail to offset 0 and switch back to Filling.
    pub fn compact(&mut self) -> Result<(), RecvBufferError> {
        if self.mode != BufferMode::Scanning {
            return Err(RecvBufferError::ModeError {
                operation: "compact",
                mode: self.mode,
            });
        }
        let remaining = self.limit - self.position;
        self.data.copy_within(self.position..self.limit, 0);
        self.position = remaining;
        self.limit = 0;
        self.mark = 0;
        self.mode = BufferMode::Filling;
        Ok(())
    }

    /// Discard everything and return to an empty Filling state. Legal in
    /// any mode; this is the resynchronization-loss escape hatch.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = 0;
        self.mark = 0;
        self.mode = BufferMode::Filling;
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}
