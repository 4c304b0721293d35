//! In-memory transport for exchange-cycle tests: records written frames
//! and fails on demand.

use crate::error::SimpleBinaryError;
use crate::transport::Transport;
use crate::util::lock;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MockTransport {
    opened: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
    next_write_error: Mutex<Option<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport::default()
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Frames written so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).clone()
    }

    pub fn clear_sent(&self) {
        lock(&self.sent).clear();
    }

    /// Make the next `write` fail with the given message.
    pub fn fail_next_write(&self, message: &str) {
        *lock(&self.next_write_error) = Some(message.to_string());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<(), SimpleBinaryError> {
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.opened.store(false, Ordering::SeqCst);
    }

    async fn write(&self, data: &[u8]) -> Result<(), SimpleBinaryError> {
        if let Some(message) = lock(&self.next_write_error).take() {
            return Err(SimpleBinaryError::TransportError(message));
        }
        lock(&self.sent).push(data.to_vec());
        Ok(())
    }
}
