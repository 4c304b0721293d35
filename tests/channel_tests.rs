//! Exchange-cycle tests driving a channel against the mock transport:
//! polling, dispatch, resend bounds, resynchronization and timeouts.

use simplebinary_rs::channel::{Channel, ChannelConfig, DeviceState, ValueSink};
use simplebinary_rs::config::{
    Direction, ItemDescriptor, ItemRegistry, PollMode, Value, ValueType,
};
use simplebinary_rs::constants::{
    KIND_CHECK_NEW_DATA, KIND_DATA, KIND_NO_DATA, KIND_OK, KIND_READ, KIND_RESEND,
};
use simplebinary_rs::proto::crc8;
use simplebinary_rs::transport::MockTransport;
use std::sync::{Arc, Mutex};

/// Sink that records every published (item, value) pair.
#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }
}

impl ValueSink for RecordingSink {
    fn publish(&self, item: &str, value: &Value) {
        self.published
            .lock()
            .unwrap()
            .push((item.to_string(), value.clone()));
    }
}

/// temp1 (read, float) and relay (write, bit), both on device 3.
fn single_device_registry() -> ItemRegistry {
    let mut items = ItemRegistry::new();
    items.insert(ItemDescriptor {
        name: "temp1".into(),
        channel: "port".into(),
        device_address: 3,
        item_address: 10,
        direction: Direction::Read,
        value_type: ValueType::Float,
    });
    items.insert(ItemDescriptor {
        name: "relay".into(),
        channel: "port".into(),
        device_address: 3,
        item_address: 5,
        direction: Direction::Write,
        value_type: ValueType::Bit,
    });
    items
}

/// temp1 on device 3 plus temp2 (read, word) on device 2.
fn two_device_registry() -> ItemRegistry {
    let mut items = single_device_registry();
    items.insert(ItemDescriptor {
        name: "temp2".into(),
        channel: "port".into(),
        device_address: 2,
        item_address: 20,
        direction: Direction::Read,
        value_type: ValueType::Word,
    });
    items
}

async fn open_channel(
    poll_mode: PollMode,
    items: ItemRegistry,
) -> (Channel, Arc<MockTransport>, Arc<RecordingSink>) {
    let transport = Arc::new(MockTransport::new());
    let sink = Arc::new(RecordingSink::default());
    let channel = Channel::new(
        ChannelConfig::new("port", poll_mode),
        Arc::new(items),
        transport.clone(),
        sink.clone(),
    );
    channel.open().await.unwrap();
    (channel, transport, sink)
}

fn control_frame(device: u8, kind: u8) -> Vec<u8> {
    let mut frame = vec![device, 0, kind];
    frame.push(crc8(&frame));
    frame
}

fn data_frame(device: u8, message_id: u8, item_address: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![device, message_id, KIND_DATA];
    frame.extend_from_slice(&item_address.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.push(crc8(&frame));
    frame
}

fn check_frame(device: u8, force: bool) -> Vec<u8> {
    let mut frame = vec![device, 0, KIND_CHECK_NEW_DATA, u8::from(force)];
    frame.push(crc8(&frame));
    frame
}

/// Tests the on-change poll cycle end to end: an unknown device gets a
/// forced check, its data answer is published, the device becomes
/// connected and the next check goes out without the force flag.
#[tokio::test]
async fn test_on_change_poll_cycle() {
    let (channel, transport, sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    channel.check_new_data().await;
    assert_eq!(transport.sent_frames(), vec![check_frame(3, true)]);
    assert!(!channel.can_send());

    channel
        .on_bytes_available(&data_frame(3, 0x11, 10, &21.5f32.to_le_bytes()))
        .await;

    assert_eq!(sink.published(), vec![("temp1".to_string(), Value::Float(21.5))]);
    assert_eq!(channel.device_state(3), DeviceState::Connected);
    assert_eq!(
        transport.sent_frames(),
        vec![check_frame(3, true), check_frame(3, false)]
    );
}

/// Tests the on-scan poll cycle: one READ per input item, duplicate polls
/// suppressed while the first is still pending.
#[tokio::test]
async fn test_on_scan_poll_cycle() {
    let (channel, transport, sink) =
        open_channel(PollMode::OnScan, single_device_registry()).await;

    channel.check_new_data().await;
    let read_temp1 = {
        let mut frame = vec![3, 0, KIND_READ, 10, 0];
        frame.push(crc8(&frame));
        frame
    };
    // the write-only relay item is not polled
    assert_eq!(transport.sent_frames(), vec![read_temp1]);

    // while the reply is outstanding further polls queue one copy at most
    channel.check_new_data().await;
    channel.check_new_data().await;
    assert_eq!(channel.queue_len(), 1);

    channel
        .on_bytes_available(&data_frame(3, 1, 10, &2.25f32.to_le_bytes()))
        .await;
    assert_eq!(sink.published(), vec![("temp1".to_string(), Value::Float(2.25))]);
    // the queued READ went out right after the reply
    assert_eq!(transport.sent_frames().len(), 2);
}

/// Tests that a frame with a broken CRC is retransmitted at most twice and
/// the device is then classified as a response error.
#[tokio::test]
async fn test_resend_budget_exhaustion() {
    let (channel, transport, _sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    channel.check_new_data().await;
    assert_eq!(transport.sent_frames().len(), 1);

    let mut corrupted = control_frame(3, KIND_OK);
    let last = corrupted.len() - 1;
    corrupted[last] = corrupted[last].wrapping_add(1);

    // first and second corruption: resend
    channel.on_bytes_available(&corrupted).await;
    assert_eq!(transport.sent_frames().len(), 2);
    channel.on_bytes_available(&corrupted).await;
    assert_eq!(transport.sent_frames().len(), 3);

    // third corruption: budget exhausted, item dropped
    channel.on_bytes_available(&corrupted).await;
    assert_eq!(transport.sent_frames().len(), 3);
    assert_eq!(channel.device_state(3), DeviceState::ResponseError);
    assert!(channel.can_send());
    assert_eq!(channel.queue_len(), 0);

    let frames = transport.sent_frames();
    assert_eq!(frames[0], frames[1]);
    assert_eq!(frames[1], frames[2]);
}

/// Tests that a slave resend request retransmits the last frame.
#[tokio::test]
async fn test_resend_request_from_device() {
    let (channel, transport, _sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    channel.check_new_data().await;
    channel
        .on_bytes_available(&control_frame(3, KIND_RESEND))
        .await;

    let frames = transport.sent_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], frames[1]);
}

/// Tests that a short burst of garbage clears the buffer and flags the
/// apparent sender, and decoding recovers on the next valid frame.
#[tokio::test]
async fn test_resync_clears_short_garbage() {
    let (channel, _transport, _sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    channel.on_bytes_available(&[7, 1, 0x42]).await;
    assert_eq!(channel.device_state(7), DeviceState::DataError);

    channel.on_bytes_available(&control_frame(3, KIND_OK)).await;
    assert_eq!(channel.device_state(3), DeviceState::Connected);
}

/// Tests that a data frame split across two transport reads is reassembled
/// and published exactly once.
#[tokio::test]
async fn test_split_frame_reassembly() {
    let (channel, _transport, sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    let frame = data_frame(3, 1, 10, &21.5f32.to_le_bytes());
    channel.on_bytes_available(&frame[..4]).await;
    // nothing decodable yet
    assert!(sink.published().is_empty());
    assert_eq!(channel.device_state(3), DeviceState::Unknown);

    channel.on_bytes_available(&frame[4..]).await;
    assert_eq!(sink.published(), vec![("temp1".to_string(), Value::Float(21.5))]);
    assert_eq!(channel.device_state(3), DeviceState::Connected);
}

/// Tests byte-by-byte resynchronization: garbage in front of a valid data
/// frame is dropped one byte at a time until the frame decodes.
#[tokio::test]
async fn test_resync_byte_by_byte() {
    let (channel, _transport, sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    let mut stream = vec![0x42; 6];
    stream.extend_from_slice(&data_frame(3, 0, 10, &21.5f32.to_le_bytes()));
    channel.on_bytes_available(&stream).await;

    assert_eq!(sink.published(), vec![("temp1".to_string(), Value::Float(21.5))]);
    assert_eq!(channel.device_state(3), DeviceState::Connected);
}

/// Tests that the response timeout classifies the device as not responding
/// and the next poll forces a full refresh.
#[tokio::test]
async fn test_timeout_marks_device_not_responding() {
    let (channel, transport, _sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    channel.check_new_data().await;
    let (_, generation) = channel.response_deadline().unwrap();

    channel.on_response_timeout(generation).await;
    assert_eq!(channel.device_state(3), DeviceState::NotResponding);
    assert!(channel.can_send());

    channel.check_new_data().await;
    assert_eq!(
        transport.sent_frames(),
        vec![check_frame(3, true), check_frame(3, true)]
    );
}

/// Tests that a timeout armed for an already answered exchange is ignored.
#[tokio::test]
async fn test_stale_timeout_is_ignored() {
    let (channel, _transport, _sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    channel.check_new_data().await;
    let (_, generation) = channel.response_deadline().unwrap();

    channel.on_bytes_available(&control_frame(3, KIND_OK)).await;
    assert_eq!(channel.device_state(3), DeviceState::Connected);

    channel.on_response_timeout(generation).await;
    assert_eq!(channel.device_state(3), DeviceState::Connected);
}

/// Tests that pending work for a non-responding device yields to other
/// devices but stays queued.
#[tokio::test]
async fn test_dead_device_work_is_demoted() {
    let (channel, transport, sink) =
        open_channel(PollMode::OnChange, two_device_registry()).await;

    // first poll: both devices unknown, device 3's forced check goes first
    channel.check_new_data().await;
    assert_eq!(transport.sent_frames(), vec![check_frame(3, true)]);

    // device 3 never answers
    let (_, generation) = channel.response_deadline().unwrap();
    channel.on_response_timeout(generation).await;
    assert_eq!(channel.device_state(3), DeviceState::NotResponding);
    // the queued check for device 2 went out instead
    assert_eq!(
        transport.sent_frames(),
        vec![check_frame(3, true), check_frame(2, true)]
    );

    // device 2 answers with data, then reports no further news
    channel
        .on_bytes_available(&data_frame(2, 5, 20, &0x1234u16.to_le_bytes()))
        .await;
    assert_eq!(sink.published(), vec![("temp2".to_string(), Value::Word(0x1234))]);
    channel
        .on_bytes_available(&control_frame(2, KIND_NO_DATA))
        .await;
    assert!(channel.can_send());
    transport.clear_sent();

    // second poll: the dead device's forced check is enqueued with
    // priority but demoted behind device 2's work when dequeuing
    channel.check_new_data().await;
    assert_eq!(transport.sent_frames(), vec![check_frame(2, false)]);
    let pending = channel.queue_snapshot();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].device, 3);
    assert_eq!(pending[0].force_flag(), Some(true));
}

/// Tests the host write path: compiled frame layout, per-device message
/// ids and rejection of non-writable or unknown items.
#[tokio::test]
async fn test_write_path() {
    let (channel, transport, _sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    channel.send_value("relay", &Value::Bit(true)).await.unwrap();
    let mut expected = vec![3, 1, KIND_DATA, 5, 0, 1];
    expected.push(crc8(&expected));
    assert_eq!(transport.sent_frames(), vec![expected.clone()]);

    channel.on_bytes_available(&control_frame(3, KIND_OK)).await;

    channel.send_value("relay", &Value::Bit(false)).await.unwrap();
    let frames = transport.sent_frames();
    // second write carries the next message id
    assert_eq!(frames[1][1], 2);

    assert!(channel.send_value("temp1", &Value::Float(1.0)).await.is_err());
    assert!(channel.send_value("nosuch", &Value::Bit(true)).await.is_err());
}

/// Tests that a transport write failure triggers a reconnect instead of
/// leaving the channel wedged half-open.
#[tokio::test]
async fn test_write_failure_reconnects() {
    let (channel, transport, _sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    transport.fail_next_write("wire cut");
    channel.check_new_data().await;

    assert!(transport.is_open());
    assert!(channel.is_connected());
    assert!(channel.can_send());
    assert_eq!(transport.sent_frames().len(), 0);
}

/// Tests that overrunning the receive buffer drops the buffered bytes and
/// decoding recovers afterwards.
#[tokio::test]
async fn test_buffer_overrun_recovers() {
    let (channel, _transport, _sink) =
        open_channel(PollMode::OnChange, single_device_registry()).await;

    channel.on_bytes_available(&vec![0x42; 300]).await;
    channel.on_bytes_available(&control_frame(3, KIND_OK)).await;
    assert_eq!(channel.device_state(3), DeviceState::Connected);
}

/// Tests that polling is inert while the channel is closed.
#[tokio::test]
async fn test_no_polling_while_disconnected() {
    let transport = Arc::new(MockTransport::new());
    let sink = Arc::new(RecordingSink::default());
    let channel = Channel::new(
        ChannelConfig::new("port", PollMode::OnChange),
        Arc::new(single_device_registry()),
        transport.clone(),
        sink,
    );

    channel.check_new_data().await;
    assert!(transport.sent_frames().is_empty());
    assert_eq!(channel.queue_len(), 0);
}
