//! Byte transports a channel can run over: serial line, TCP connection,
//! and a mock for tests.
//!
//! A transport only moves bytes. Writes go through [`Transport::write`];
//! reads are pushed by a reader task into the `mpsc` channel handed to the
//! transport at construction, so the channel runner receives chunks as
//! `select!`-able events instead of blocking on a read call.

pub mod mock;
pub mod serial;
pub mod tcp;

pub use mock::MockTransport;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use crate::error::SimpleBinaryError;
use async_trait::async_trait;

/// Size of the read chunks the reader tasks forward.
const READ_CHUNK: usize = 256;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying connection and start the reader task.
    async fn open(&self) -> Result<(), SimpleBinaryError>;

    /// Stop the reader task and drop the connection. Idempotent.
    async fn close(&self);

    /// Write one complete frame.
    async fn write(&self, data: &[u8]) -> Result<(), SimpleBinaryError>;
}
