//! SimpleBinary Protocol Constants
//!
//! This module defines the wire-format constants and engine policy constants
//! used by the SimpleBinary master implementation.

use std::time::Duration;

// ----------------------------------------------------------------------------
// Frame kind bytes (third byte of every frame)
// ----------------------------------------------------------------------------

/// Master -> slave: ask whether the device has new data to report
pub const KIND_CHECK_NEW_DATA: u8 = 0xD0;

/// Master -> slave: read one item by address
pub const KIND_READ: u8 = 0xD1;

/// Bidirectional: item data (master write command or slave value report)
pub const KIND_DATA: u8 = 0xDA;

// Slave -> master control kinds
pub const KIND_OK: u8 = 0xE0;
pub const KIND_RESEND: u8 = 0xE1;
pub const KIND_NO_DATA: u8 = 0xE2;
pub const KIND_UNKNOWN_DATA: u8 = 0xE3;
pub const KIND_UNKNOWN_ADDRESS: u8 = 0xE4;
pub const KIND_SAVE_ERROR: u8 = 0xE5;
pub const KIND_HELLO: u8 = 0xE6;

/// Inclusive range reserved for control kinds; bytes inside the range that
/// are not mapped above decode as unsupported control messages.
pub const KIND_CONTROL_FIRST: u8 = 0xE0;
pub const KIND_CONTROL_LAST: u8 = 0xEF;

// ----------------------------------------------------------------------------
// Frame layout
// ----------------------------------------------------------------------------

/// Every frame starts with [address][message id][kind]
pub const FRAME_HEADER_LEN: usize = 3;

/// Shortest complete frame on the wire (a control frame: header + CRC)
pub const MIN_FRAME_LEN: usize = 4;

/// Force flag value in a CHECK_NEW_DATA body
pub const CHECK_FORCE_ALL: u8 = 0x01;
pub const CHECK_CHANGED_ONLY: u8 = 0x00;

// ----------------------------------------------------------------------------
// Engine policy
// ----------------------------------------------------------------------------

/// Maximum number of resend attempts per outbound item
pub const MAX_RESEND_COUNT: u8 = 2;

/// How long a channel waits for a reply before declaring a timeout
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default poll cadence for the scheduler
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Fixed capacity of the per-channel receive buffer
pub const RECEIVE_BUFFER_CAPACITY: usize = 256;

/// Below this many buffered bytes an unrecognized message means total loss
/// of synchronization; the buffer is cleared instead of resynchronized
/// byte by byte.
pub const RESYNC_MIN_BUFFERED: usize = 5;
