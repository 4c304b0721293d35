//! # Channel Engine
//!
//! One `Channel` serves one physical endpoint (serial port or TCP
//! connection) and owns everything the half-duplex exchange needs: the
//! outbound command queue, the receive buffer, the per-device state table
//! and the waiting-for-reply state machine.
//!
//! The exchange cycle is: dequeue -> transmit -> await -> decode ->
//! dispatch/resend/advance. At most one request is outstanding per channel;
//! every state-changing path ends by re-attempting the scheduling pass so
//! work is never stranded. The dequeue-and-reorder step runs under a
//! non-blocking try-lock: a trigger that cannot acquire it does nothing and
//! relies on the next trigger (poll tick, bytes arrived, timeout) to make
//! progress.

pub mod devices;
pub mod queue;
pub mod runner;

pub use devices::{DeviceState, DeviceStateTable};
pub use queue::CommandQueue;
pub use runner::{ChannelHandle, ChannelRunner};

use crate::config::{ItemRegistry, PollMode, Value};
use crate::constants::{
    DEFAULT_POLL_INTERVAL, MAX_RESEND_COUNT, RESPONSE_TIMEOUT, RESYNC_MIN_BUFFERED,
};
use crate::error::SimpleBinaryError;
use crate::proto::frame::{
    self, ControlKind, DecodedMessage, MessageKind, OutboundItem,
};
use crate::transport::Transport;
use crate::util::{lock, BufferMode, ReceiveBuffer};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

/// Receiver of decoded (item, value) pairs; the host side of the engine.
pub trait ValueSink: Send + Sync {
    fn publish(&self, item: &str, value: &Value);
}

/// Sink that only logs incoming values, used by the CLI binary.
#[derive(Debug, Default)]
pub struct LogSink;

impl ValueSink for LogSink {
    fn publish(&self, item: &str, value: &Value) {
        info!("{item} = {value}");
    }
}

/// Construction parameters of one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub poll_mode: PollMode,
    pub poll_interval: Duration,
    pub response_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(name: &str, poll_mode: PollMode) -> Self {
        ChannelConfig {
            name: name.to_string(),
            poll_mode,
            poll_interval: DEFAULT_POLL_INTERVAL,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }
}

/// Waiting-for-reply state of the exchange cycle.
#[derive(Debug, Default)]
struct ExchangeState {
    awaiting_reply: bool,
    last_sent: Option<OutboundItem>,
    deadline: Option<Instant>,
    /// Incremented per transmit so a stale timeout cannot cancel a newer
    /// exchange.
    generation: u64,
}

/// One communication channel: queue, buffer, device states and the
/// exchange state machine.
pub struct Channel {
    name: String,
    poll_mode: PollMode,
    poll_interval: Duration,
    response_timeout: Duration,
    items: Arc<ItemRegistry>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ValueSink>,
    connected: AtomicBool,
    queue: Mutex<CommandQueue>,
    /// Serializes the dequeue-and-reorder step; acquired non-blocking.
    process_lock: Mutex<()>,
    exchange: Mutex<ExchangeState>,
    devices: Mutex<DeviceStateTable>,
    rx: Mutex<ReceiveBuffer>,
    /// Per-device message id counters for WRITE frames.
    message_ids: Mutex<HashMap<u8, u8>>,
}

impl Channel {
    pub fn new(
        config: ChannelConfig,
        items: Arc<ItemRegistry>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ValueSink>,
    ) -> Self {
        let devices = DeviceStateTable::new(&config.name);
        Channel {
            name: config.name,
            poll_mode: config.poll_mode,
            poll_interval: config.poll_interval,
            response_timeout: config.response_timeout,
            items,
            transport,
            sink,
            connected: AtomicBool::new(false),
            queue: Mutex::new(CommandQueue::new()),
            process_lock: Mutex::new(()),
            exchange: Mutex::new(ExchangeState::default()),
            devices: Mutex::new(devices),
            rx: Mutex::new(ReceiveBuffer::new()),
            message_ids: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the transport and reset the exchange state.
    pub async fn open(&self) -> Result<(), SimpleBinaryError> {
        self.transport.open().await?;
        {
            let mut exchange = lock(&self.exchange);
            exchange.awaiting_reply = false;
            exchange.deadline = None;
        }
        lock(&self.rx).clear();
        self.connected.store(true, Ordering::SeqCst);
        info!("{} - connected", self.name);
        Ok(())
    }

    pub async fn close(&self) {
        self.transport.close().await;
        self.connected.store(false, Ordering::SeqCst);
        info!("{} - closed", self.name);
    }

    async fn reconnect(&self) {
        info!("{} - trying to reconnect", self.name);
        self.close().await;
        if let Err(e) = self.open().await {
            error!("{} - reconnect failed: {e}", self.name);
        }
    }

    /// True only when no reply is outstanding; gates every scheduling pass.
    pub fn can_send(&self) -> bool {
        !lock(&self.exchange).awaiting_reply
    }

    pub fn device_state(&self, address: u8) -> DeviceState {
        lock(&self.devices).get(address)
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn queue_snapshot(&self) -> Vec<OutboundItem> {
        lock(&self.queue).snapshot()
    }

    fn next_message_id(&self, device: u8) -> u8 {
        let mut ids = lock(&self.message_ids);
        let id = ids.entry(device).or_insert(0);
        *id = id.wrapping_add(1);
        *id
    }

    /// Compile and enqueue a WRITE command for a named item, then attempt
    /// to send. WRITE commands are never deduplicated.
    pub async fn send_value(
        &self,
        item_name: &str,
        value: &Value,
    ) -> Result<(), SimpleBinaryError> {
        let descriptor = self
            .items
            .get(item_name)
            .ok_or_else(|| {
                SimpleBinaryError::ConfigError(format!("unknown item '{item_name}'"))
            })?;
        if descriptor.channel != self.name {
            return Err(SimpleBinaryError::ConfigError(format!(
                "item '{item_name}' is bound to channel '{}'",
                descriptor.channel
            )));
        }
        if !descriptor.direction.is_output() {
            return Err(SimpleBinaryError::ConfigError(format!(
                "item '{item_name}' is not writable"
            )));
        }

        let message_id = self.next_message_id(descriptor.device_address);
        let item = frame::compile_write(descriptor, value, message_id)?;
        debug!("{} - adding write command into queue", self.name);
        lock(&self.queue).enqueue(item);
        self.process_queue().await;
        Ok(())
    }

    /// Enqueue a CHECK_NEW_DATA request at the tail, suppressed when an
    /// equal one is already pending.
    fn offer_new_data_check(&self, device: u8, force_all: bool) {
        debug!(
            "{} - offer_new_data_check device={device} force={force_all}",
            self.name
        );
        lock(&self.queue).enqueue(frame::compile_check_new_data(device, force_all));
    }

    /// Put a CHECK_NEW_DATA request for a device in front of the queue.
    fn offer_new_data_check_priority(&self, device: u8, force_all: bool) {
        lock(&self.queue).enqueue_priority(frame::compile_check_new_data(device, force_all));
    }

    /// The scheduling pass: dequeue (with dead-device reordering) and
    /// transmit. Non-reentrant and non-blocking; a pass that cannot
    /// acquire exclusivity returns immediately and relies on the next
    /// trigger.
    pub async fn process_queue(&self) {
        debug!(
            "{} - processing command queue, length {}",
            self.name,
            self.queue_len()
        );

        if !self.can_send() {
            debug!("{} - processing command queue - waiting", self.name);
            return;
        }

        let to_send = {
            let _guard = match self.process_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    debug!("{} - command queue locked, leaving scheduling pass", self.name);
                    return;
                }
            };
            let mut queue = lock(&self.queue);
            let devices = lock(&self.devices);
            queue.take_next(&devices)
        };

        if let Some(item) = to_send {
            self.send_data_out(item).await;
        }
    }

    /// Transmit one item and arm the response timeout. A transmit failure
    /// is treated as a disconnect and answered with a reconnect attempt.
    async fn send_data_out(&self, item: OutboundItem) {
        debug!(
            "{} - sending {} bytes: {}",
            self.name,
            item.data.len(),
            hex::encode(&item.data)
        );

        match self.transport.write(&item.data).await {
            Ok(()) => {
                let mut exchange = lock(&self.exchange);
                exchange.awaiting_reply = true;
                exchange.deadline = Some(Instant::now() + self.response_timeout);
                exchange.generation += 1;
                exchange.last_sent = Some(item);
            }
            Err(e) => {
                error!("{} - error writing to transport: {e}", self.name);
                self.reconnect().await;
            }
        }
    }

    /// Deadline and generation of the armed response timeout, if any.
    pub fn response_deadline(&self) -> Option<(Instant, u64)> {
        let exchange = lock(&self.exchange);
        if exchange.awaiting_reply {
            exchange.deadline.map(|at| (at, exchange.generation))
        } else {
            None
        }
    }

    /// The response timeout fired with no reply: return to IDLE, classify
    /// the device as not responding and re-trigger scheduling.
    pub async fn on_response_timeout(&self, generation: u64) {
        let timed_out_device = {
            let mut exchange = lock(&self.exchange);
            if !exchange.awaiting_reply || exchange.generation != generation {
                return;
            }
            exchange.awaiting_reply = false;
            exchange.deadline = None;
            exchange.last_sent.as_ref().map(|item| item.device)
        };

        warn!("{} - receiving data timed out", self.name);
        if let Some(device) = timed_out_device {
            lock(&self.devices).set(device, DeviceState::NotResponding);
        }
        self.process_queue().await;
    }

    /// Bytes arrived from the transport: append, scan for frames, dispatch
    /// every decoded message, compact, then re-attempt scheduling if any
    /// outcome asked for it.
    pub async fn on_bytes_available(&self, data: &[u8]) {
        debug!("{} - received {} bytes", self.name, data.len());

        let mut should_process = false;
        {
            let mut rx = lock(&self.rx);

            if let Err(e) = rx.append(data) {
                // Overrun has already cleared the buffer: synchronization
                // with the stream is lost until the next frame boundary.
                error!("{} - receive buffer fault: {e}", self.name);
                return;
            }
            if let Err(e) = rx.flip() {
                error!("{} - receive buffer fault: {e}", self.name);
                rx.clear();
                return;
            }

            loop {
                let unread = rx.unread();
                if unread.is_empty() {
                    break;
                }
                let received_id = unread[0];

                match frame::try_decode(unread, &self.items, &self.name, false) {
                    Ok((message, consumed)) => {
                        if rx.advance(consumed).is_err() {
                            break;
                        }
                        should_process |= self.dispatch(message);
                    }
                    Err(SimpleBinaryError::IncompleteFrame) => {
                        // wait for the rest of the frame
                        if let Err(e) = rx.rewind() {
                            error!("{} - receive buffer fault: {e}", self.name);
                            rx.clear();
                        }
                        break;
                    }
                    Err(SimpleBinaryError::InvalidChecksum {
                        expected,
                        calculated,
                        frame_len,
                    }) => {
                        error!(
                            "{} - invalid CRC while reading: expected 0x{expected:02X}, calculated 0x{calculated:02X}",
                            self.name
                        );
                        self.print_communication_info(&rx);
                        let _ = rx.advance(frame_len);
                        self.resend_last();
                        should_process = true;
                    }
                    Err(SimpleBinaryError::UnknownItemAddress {
                        device, frame_len, ..
                    }) => {
                        self.print_communication_info(&rx);
                        let _ = rx.advance(frame_len);
                        {
                            let mut exchange = lock(&self.exchange);
                            exchange.awaiting_reply = false;
                            exchange.deadline = None;
                        }
                        lock(&self.devices).set(device, DeviceState::DataError);
                        should_process = true;
                    }
                    Err(SimpleBinaryError::UnrecognizedMessage { kind }) => {
                        warn!(
                            "{} - incoming unknown message (kind 0x{kind:02X})",
                            self.name
                        );
                        self.print_communication_info(&rx);

                        if rx.unread().len() < RESYNC_MIN_BUFFERED {
                            // not enough left to ever hold a complete
                            // message: total loss of synchronization
                            rx.clear();
                            warn!("{} - unknown message: input buffer cleared", self.name);
                            lock(&self.devices).set(received_id, DeviceState::DataError);
                            {
                                let mut exchange = lock(&self.exchange);
                                exchange.awaiting_reply = false;
                                exchange.deadline = None;
                            }
                            should_process = true;
                            break;
                        }
                        // drop one byte and retry from the new position
                        let _ = rx.advance(1);
                    }
                    Err(e) => {
                        error!("{} - reading incoming data error: {e}", self.name);
                        rx.clear();
                        break;
                    }
                }
            }

            if rx.mode() == BufferMode::Scanning {
                if let Err(e) = rx.compact() {
                    error!("{} - receive buffer fault: {e}", self.name);
                    rx.clear();
                }
            }
        }

        if should_process {
            self.process_queue().await;
        }
    }

    /// Route one decoded message. Returns true when the scheduling pass
    /// must be re-attempted.
    fn dispatch(&self, message: DecodedMessage) -> bool {
        match message {
            DecodedMessage::ValueUpdate {
                device,
                item,
                value,
                ..
            } => {
                {
                    let mut exchange = lock(&self.exchange);
                    exchange.awaiting_reply = false;
                    exchange.deadline = None;
                }
                lock(&self.devices).set(device, DeviceState::Connected);

                debug!(
                    "{} - device {} incoming data - item:{}/value:{}",
                    self.name, device, item.name, value
                );
                self.sink.publish(&item.name, &value);

                // data answered a "check new data" request: keep the
                // cadence tight by asking again right away, without force
                let answered_check = {
                    let exchange = lock(&self.exchange);
                    exchange
                        .last_sent
                        .as_ref()
                        .map(|sent| (sent.kind, sent.device))
                };
                if let Some((MessageKind::CheckNewData, checked_device)) = answered_check {
                    debug!(
                        "{} - device {} repeat CHECK_NEW_DATA command",
                        self.name, checked_device
                    );
                    self.offer_new_data_check_priority(checked_device, false);
                }
                true
            }
            DecodedMessage::Control { device, kind, .. } => {
                debug!(
                    "{} - device {} incoming control message {:?}",
                    self.name, device, kind
                );

                match kind {
                    ControlKind::Ok => {
                        {
                            let mut exchange = lock(&self.exchange);
                            exchange.awaiting_reply = false;
                            exchange.deadline = None;
                            if let Some(sent) = exchange.last_sent.as_mut() {
                                sent.resend_count = 0;
                            }
                        }
                        lock(&self.devices).set(device, DeviceState::Connected);
                        true
                    }
                    ControlKind::NoData => {
                        {
                            let mut exchange = lock(&self.exchange);
                            exchange.awaiting_reply = false;
                            exchange.deadline = None;
                        }
                        lock(&self.devices).set(device, DeviceState::Connected);
                        true
                    }
                    ControlKind::ResendRequest => {
                        info!("{} - device {} requests resend", self.name, device);
                        lock(&self.devices).set(device, DeviceState::Connected);
                        self.resend_last();
                        true
                    }
                    ControlKind::UnknownData
                    | ControlKind::UnknownAddress
                    | ControlKind::SaveError => {
                        warn!(
                            "{} - device {} reports {:?}",
                            self.name, device, kind
                        );
                        {
                            let mut exchange = lock(&self.exchange);
                            exchange.awaiting_reply = false;
                            exchange.deadline = None;
                        }
                        lock(&self.devices).set(device, DeviceState::DataError);
                        true
                    }
                    ControlKind::Hello => {
                        debug!("{} - device {} says hello", self.name, device);
                        lock(&self.devices).set(device, DeviceState::Connected);
                        false
                    }
                    ControlKind::Unsupported(byte) => {
                        warn!(
                            "{} - device {} - unsupported message type 0x{byte:02X}",
                            self.name, device
                        );
                        {
                            let mut exchange = lock(&self.exchange);
                            exchange.awaiting_reply = false;
                            exchange.deadline = None;
                        }
                        lock(&self.devices).set(device, DeviceState::DataError);
                        true
                    }
                }
            }
        }
    }

    /// Re-enqueue the last sent item at the head of the queue while its
    /// resend budget lasts; beyond the budget the device is classified
    /// RESPONSE_ERROR and the item dropped.
    fn resend_last(&self) {
        let last = {
            let mut exchange = lock(&self.exchange);
            exchange.awaiting_reply = false;
            exchange.deadline = None;
            exchange.last_sent.clone()
        };

        let Some(mut item) = last else {
            warn!("{} - resend requested but nothing to resend", self.name);
            return;
        };

        if item.resend_count < MAX_RESEND_COUNT {
            item.resend_count += 1;
            debug!(
                "{} - device {} resend attempt {}",
                self.name, item.device, item.resend_count
            );
            lock(&self.queue).enqueue_priority(item);
        } else {
            warn!(
                "{} - device {} - max resend attempts reached",
                self.name, item.device
            );
            lock(&self.devices).set(item.device, DeviceState::ResponseError);
        }
    }

    /// The poll scheduler: enqueue read or check-new-data requests for the
    /// channel's items according to the configured strategy, then attempt
    /// to send.
    pub async fn check_new_data(&self) {
        if !self.is_connected() {
            return;
        }
        debug!(
            "{} - check_new_data() in mode {:?} is called",
            self.name, self.poll_mode
        );

        match self.poll_mode {
            PollMode::OnScan => {
                for descriptor in self.items.for_channel(&self.name) {
                    if descriptor.direction.is_input() {
                        debug!(
                            "{} - check_new_data() item={} direction={:?}",
                            self.name, descriptor.name, descriptor.direction
                        );
                        lock(&self.queue).enqueue(frame::compile_read(descriptor));
                    }
                }
            }
            PollMode::OnChange => {
                for device in self.items.device_addresses(&self.name) {
                    let state = lock(&self.devices).get(device);
                    let force_all = matches!(
                        state,
                        DeviceState::Unknown
                            | DeviceState::NotResponding
                            | DeviceState::ResponseError
                    );
                    debug!(
                        "{} - check_new_data() device={device} force={force_all}",
                        self.name
                    );
                    if force_all {
                        self.offer_new_data_check_priority(device, true);
                    } else {
                        self.offer_new_data_check(device, false);
                    }
                }
            }
        }

        self.process_queue().await;
    }

    /// Dump the receive buffer and the last sent frame for diagnostics.
    fn print_communication_info(&self, rx: &ReceiveBuffer) {
        info!(
            "{} - data in input buffer: {}",
            self.name,
            hex::encode(rx.contents())
        );
        let exchange = lock(&self.exchange);
        if let Some(sent) = exchange.last_sent.as_ref() {
            info!(
                "{} - last sent data: {}",
                self.name,
                hex::encode(&sent.data)
            );
        }
    }
}
