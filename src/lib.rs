//! # simplebinary-rs - A Rust Crate for the SimpleBinary Fieldbus Protocol
//!
//! The simplebinary-rs crate implements the master side of the SimpleBinary
//! protocol, a fixed-framing binary protocol for exchanging item values with
//! PLC-style slave devices over a serial line or a TCP connection.
//!
//! ## Features
//!
//! - Connect to slave devices over serial (8N1) or TCP transports
//! - Compile read, write and check-new-data command frames with CRC-8 trailers
//! - Queue outbound commands with priority insertion, duplicate suppression
//!   and demotion of non-responding devices
//! - One request in flight per channel, with bounded resends and a response
//!   timeout driving device liveness classification
//! - Decode slave value reports and control messages from a byte stream,
//!   resynchronizing after corruption
//! - Poll devices on a fixed cadence, either reading every item or asking
//!   each device whether it has news
//! - Support for logging and error handling
//!
//! ## Usage
//!
//! To use the simplebinary-rs crate in your Rust project, add the following
//! to your Cargo.toml file:
//!
//! ```toml
//! [dependencies]
//! simplebinary-rs = "1.0.0"
//! ```
//!
//! Then, in your Rust code, you can import the necessary modules and functions:
//!
//! ```rust
//! use simplebinary_rs::{
//!     DeviceManager, ConfigFile, SimpleBinaryError,
//!     init_logger, log_info,
//! };
//! ```

pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod manager;
pub mod proto;
pub mod transport;
pub mod util;

pub use crate::error::SimpleBinaryError;
pub use crate::logging::{init_logger, log_info};

// Core engine types
pub use channel::{Channel, ChannelConfig, ChannelHandle, DeviceState, LogSink, ValueSink};
pub use config::{ConfigFile, Direction, ItemDescriptor, ItemRegistry, PollMode, Value, ValueType};
pub use manager::DeviceManager;
pub use proto::{DecodedMessage, OutboundItem};
pub use transport::{MockTransport, SerialTransport, TcpTransport, Transport};
