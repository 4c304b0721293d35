//! Utility modules shared across the crate.

pub mod recvbuffer;

pub use recvbuffer::{BufferMode, ReceiveBuffer, RecvBufferError};

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex, recovering the guard if a panicking thread poisoned it.
/// The engine state behind each lock stays consistent across every fault
/// path, so a poisoned guard is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
