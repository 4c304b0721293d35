//! Async driver of one channel.
//!
//! The `Channel` itself is synchronous state behind locks; the runner owns
//! the event loop that feeds it: poll ticks, bytes from the transport
//! reader, host commands and the response timeout. Everything funnels
//! through one `select!` so triggers never race each other inside a task.

use crate::channel::Channel;
use crate::config::Value;
use crate::error::SimpleBinaryError;
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Commands the host side can inject into a running channel.
#[derive(Debug)]
pub enum ChannelEvent {
    SendValue { item: String, value: Value },
    Shutdown,
}

/// Cloneable host-side handle to a running channel.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    events: mpsc::Sender<ChannelEvent>,
}

impl ChannelHandle {
    /// Queue a write command for a named item on this channel.
    pub async fn send_value(&self, item: &str, value: Value) -> Result<(), SimpleBinaryError> {
        self.events
            .send(ChannelEvent::SendValue {
                item: item.to_string(),
                value,
            })
            .await
            .map_err(|_| {
                SimpleBinaryError::ChannelError("channel task is gone".to_string())
            })
    }

    /// Ask the channel task to close its transport and stop.
    pub async fn shutdown(&self) {
        let _ = self.events.send(ChannelEvent::Shutdown).await;
    }
}

/// Event loop wrapper around one channel.
pub struct ChannelRunner {
    channel: Arc<Channel>,
    events: mpsc::Receiver<ChannelEvent>,
    data: mpsc::Receiver<Vec<u8>>,
}

impl ChannelRunner {
    /// Pair a runner with the handle the host keeps. `data` carries raw
    /// chunks from the transport's reader task.
    pub fn new(channel: Arc<Channel>, data: mpsc::Receiver<Vec<u8>>) -> (Self, ChannelHandle) {
        let (tx, rx) = mpsc::channel(32);
        (
            ChannelRunner {
                channel,
                events: rx,
                data,
            },
            ChannelHandle { events: tx },
        )
    }

    /// Drive the channel until shutdown. Intended to be spawned.
    pub async fn run(mut self) {
        let mut poll = tokio::time::interval(self.channel.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("{} - channel task started", self.channel.name());

        loop {
            let deadline = self.channel.response_deadline();

            tokio::select! {
                _ = poll.tick() => {
                    self.channel.check_new_data().await;
                }
                chunk = self.data.recv() => {
                    match chunk {
                        Some(bytes) => self.channel.on_bytes_available(&bytes).await,
                        None => {
                            warn!("{} - transport reader closed", self.channel.name());
                            break;
                        }
                    }
                }
                event = self.events.recv() => {
                    match event {
                        Some(ChannelEvent::SendValue { item, value }) => {
                            if let Err(e) = self.channel.send_value(&item, &value).await {
                                error!(
                                    "{} - sending value for '{item}' failed: {e}",
                                    self.channel.name()
                                );
                            }
                        }
                        Some(ChannelEvent::Shutdown) | None => break,
                    }
                }
                _ = sleep_until_deadline(deadline.map(|(at, _)| at)), if deadline.is_some() => {
                    if let Some((_, generation)) = deadline {
                        self.channel.on_response_timeout(generation).await;
                    }
                }
            }
        }

        self.channel.close().await;
        debug!("{} - channel task stopped", self.channel.name());
    }
}

async fn sleep_until_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
