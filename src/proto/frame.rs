//! # SimpleBinary Frame Codec
//!
//! This module encodes outbound command frames and decodes inbound frames
//! from the head of a byte stream, using the `nom` crate's streaming
//! parsers so a partially received frame surfaces as `IncompleteFrame`
//! rather than a hard failure.
//!
//! ## Frame layout
//!
//! Every frame is `[address][message id][kind][body...][crc8]`:
//!
//! - `0xD0` CHECK_NEW_DATA (master -> slave): body is one force-flag byte.
//! - `0xD1` READ (master -> slave): body is the item address, u16 LE.
//! - `0xDA` DATA (both directions): body is the item address, u16 LE,
//!   followed by the value payload. The payload length is not on the wire;
//!   it is derived from the configured value type of the item address.
//! - `0xE0..=0xEF` control kinds (slave -> master): no body.
//!
//! The CRC trailer is CRC-8 (poly 0x07, init 0x00) over all preceding
//! frame bytes.
//!
//! READ and CHECK_NEW_DATA frames carry message id 0: identical requests
//! must stay byte-identical so queue duplicate suppression can match them.
//! WRITE frames carry the per-device incrementing id the slave echoes in
//! resend requests.
//!
//! ## Error Handling
//!
//! Decoding reports the fault taxonomy the exchange controller dispatches
//! on: `IncompleteFrame` (wait for more bytes, consume nothing),
//! `InvalidChecksum` (discard exactly the malformed frame, resend),
//! `UnknownItemAddress` (configuration mismatch, no resend) and
//! `UnrecognizedMessage` (resynchronize byte by byte). Decode is
//! restartable: it never consumes input itself; the caller advances the
//! receive buffer by the reported frame length only on success or on a
//! skippable fault.

use crate::config::{ItemDescriptor, ItemRegistry, Value};
use crate::constants::{
    CHECK_CHANGED_ONLY, CHECK_FORCE_ALL, FRAME_HEADER_LEN, KIND_CHECK_NEW_DATA,
    KIND_CONTROL_FIRST, KIND_CONTROL_LAST, KIND_DATA, KIND_HELLO, KIND_NO_DATA, KIND_OK,
    KIND_READ, KIND_RESEND, KIND_SAVE_ERROR, KIND_UNKNOWN_ADDRESS, KIND_UNKNOWN_DATA,
    MIN_FRAME_LEN,
};
use crate::error::SimpleBinaryError;
use bytes::{BufMut, Bytes, BytesMut};
use log::warn;
use nom::bytes::streaming::take;
use nom::number::streaming::{le_u16, u8 as stream_u8};
use nom::sequence::tuple;
use nom::IResult;

/// Kind of an outbound command, mirrored by the queue's scheduling rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Write,
    Read,
    CheckNewData,
}

/// A compiled outbound command frame, owned by the queue until dequeued.
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub device: u8,
    pub kind: MessageKind,
    pub message_id: u8,
    /// The complete encoded frame, CRC trailer included.
    pub data: Bytes,
    pub resend_count: u8,
}

impl OutboundItem {
    /// True for kinds subject to duplicate suppression (everything but
    /// WRITE commands).
    pub fn deduplicated(&self) -> bool {
        self.kind != MessageKind::Write
    }

    /// Force flag of a CHECK_NEW_DATA frame, None for other kinds.
    pub fn force_flag(&self) -> Option<bool> {
        if self.kind == MessageKind::CheckNewData {
            self.data.get(FRAME_HEADER_LEN).map(|b| *b == CHECK_FORCE_ALL)
        } else {
            None
        }
    }
}

/// Control message kinds a slave can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Ok,
    ResendRequest,
    NoData,
    UnknownData,
    UnknownAddress,
    SaveError,
    Hello,
    /// A byte in the control range with no assigned meaning; a semantic
    /// rejection, not transport corruption.
    Unsupported(u8),
}

impl ControlKind {
    fn from_byte(kind: u8) -> ControlKind {
        match kind {
            KIND_OK => ControlKind::Ok,
            KIND_RESEND => ControlKind::ResendRequest,
            KIND_NO_DATA => ControlKind::NoData,
            KIND_UNKNOWN_DATA => ControlKind::UnknownData,
            KIND_UNKNOWN_ADDRESS => ControlKind::UnknownAddress,
            KIND_SAVE_ERROR => ControlKind::SaveError,
            KIND_HELLO => ControlKind::Hello,
            other => ControlKind::Unsupported(other),
        }
    }
}

/// One message decoded from the head of the stream. Transient: constructed
/// per decode call and consumed immediately by the exchange controller.
#[derive(Debug, Clone)]
pub enum DecodedMessage {
    ValueUpdate {
        device: u8,
        message_id: u8,
        item: ItemDescriptor,
        value: Value,
    },
    Control {
        device: u8,
        message_id: u8,
        kind: ControlKind,
    },
}

impl DecodedMessage {
    pub fn device(&self) -> u8 {
        match self {
            DecodedMessage::ValueUpdate { device, .. } => *device,
            DecodedMessage::Control { device, .. } => *device,
        }
    }
}

/// Calculates the CRC-8 trailer (poly 0x07, init 0x00) over `data`.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn finish_frame(mut buf: BytesMut) -> Bytes {
    let trailer = crc8(&buf);
    buf.put_u8(trailer);
    buf.freeze()
}

/// Compiles a WRITE command frame for a named item.
pub fn compile_write(
    item: &ItemDescriptor,
    value: &Value,
    message_id: u8,
) -> Result<OutboundItem, SimpleBinaryError> {
    if value.value_type() != item.value_type {
        return Err(SimpleBinaryError::ConfigError(format!(
            "item '{}' expects {:?}, got {:?}",
            item.name,
            item.value_type,
            value.value_type()
        )));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + 2 + item.value_type.payload_len() + 1);
    buf.put_u8(item.device_address);
    buf.put_u8(message_id);
    buf.put_u8(KIND_DATA);
    buf.put_u16_le(item.item_address);
    value.encode_le(&mut buf);

    Ok(OutboundItem {
        device: item.device_address,
        kind: MessageKind::Write,
        message_id,
        data: finish_frame(buf),
        resend_count: 0,
    })
}

/// Compiles a READ command frame for a configured item.
pub fn compile_read(item: &ItemDescriptor) -> OutboundItem {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + 3);
    buf.put_u8(item.device_address);
    buf.put_u8(0);
    buf.put_u8(KIND_READ);
    buf.put_u16_le(item.item_address);

    OutboundItem {
        device: item.device_address,
        kind: MessageKind::Read,
        message_id: 0,
        data: finish_frame(buf),
        resend_count: 0,
    }
}

/// Compiles a CHECK_NEW_DATA command frame for a device. `force_all` asks
/// the device to report every value as if changed, used to resynchronize
/// after an outage.
pub fn compile_check_new_data(device: u8, force_all: bool) -> OutboundItem {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + 2);
    buf.put_u8(device);
    buf.put_u8(0);
    buf.put_u8(KIND_CHECK_NEW_DATA);
    buf.put_u8(if force_all { CHECK_FORCE_ALL } else { CHECK_CHANGED_ONLY });

    OutboundItem {
        device,
        kind: MessageKind::CheckNewData,
        message_id: 0,
        data: finish_frame(buf),
        resend_count: 0,
    }
}

fn parse_header(input: &[u8]) -> IResult<&[u8], (u8, u8, u8)> {
    tuple((stream_u8, stream_u8, stream_u8))(input)
}

fn incomplete(_: nom::Err<nom::error::Error<&[u8]>>) -> SimpleBinaryError {
    // The streaming parsers used here only fail for want of input.
    SimpleBinaryError::IncompleteFrame
}

/// Attempts to decode one message from the head of `input`.
///
/// On success returns the message and the number of bytes it occupied;
/// the caller advances the receive buffer by exactly that amount. On
/// failure nothing has been consumed; the error variant tells the caller
/// how to recover (see module docs). With `verify_only` the same
/// validation runs without logging, used to probe readiness without side
/// effects.
pub fn try_decode(
    input: &[u8],
    items: &ItemRegistry,
    channel: &str,
    verify_only: bool,
) -> Result<(DecodedMessage, usize), SimpleBinaryError> {
    let (rest, (device, message_id, kind)) = parse_header(input).map_err(incomplete)?;

    match kind {
        KIND_DATA => {
            let (rest, item_address) = le_u16(rest).map_err(incomplete)?;
            let descriptor = match items.find(channel, device, item_address) {
                Some(d) => d.clone(),
                None => {
                    if !verify_only {
                        warn!(
                            "{channel} - device {device} sent data for unconfigured item address {item_address}"
                        );
                    }
                    return Err(SimpleBinaryError::UnknownItemAddress {
                        device,
                        item_address,
                        frame_len: FRAME_HEADER_LEN + 2,
                    });
                }
            };

            let payload_len = descriptor.value_type.payload_len();
            let (rest, payload) = take(payload_len)(rest).map_err(incomplete)?;
            let (_, expected) = stream_u8(rest).map_err(incomplete)?;

            let frame_len = FRAME_HEADER_LEN + 2 + payload_len + 1;
            let calculated = crc8(&input[..frame_len - 1]);
            if expected != calculated {
                return Err(SimpleBinaryError::InvalidChecksum {
                    expected,
                    calculated,
                    frame_len,
                });
            }

            let value = Value::decode_le(descriptor.value_type, payload);
            Ok((
                DecodedMessage::ValueUpdate {
                    device,
                    message_id,
                    item: descriptor,
                    value,
                },
                frame_len,
            ))
        }
        k if (KIND_CONTROL_FIRST..=KIND_CONTROL_LAST).contains(&k) => {
            let (_, expected) = stream_u8(rest).map_err(incomplete)?;

            let calculated = crc8(&input[..FRAME_HEADER_LEN]);
            if expected != calculated {
                return Err(SimpleBinaryError::InvalidChecksum {
                    expected,
                    calculated,
                    frame_len: MIN_FRAME_LEN,
                });
            }

            Ok((
                DecodedMessage::Control {
                    device,
                    message_id,
                    kind: ControlKind::from_byte(k),
                },
                MIN_FRAME_LEN,
            ))
        }
        other => Err(SimpleBinaryError::UnrecognizedMessage { kind: other }),
    }
}

/// Performs the same validation as [`try_decode`] without surfacing to the
/// dispatch path; returns the device address when a complete valid frame
/// heads the buffer.
pub fn verify_data_only(input: &[u8], items: &ItemRegistry, channel: &str) -> Option<u8> {
    try_decode(input, items, channel, true)
        .ok()
        .map(|(message, _)| message.device())
}
