//! Unit tests for the frame codec: command compilation, CRC trailers, and
//! decoding of slave data and control frames.

use simplebinary_rs::config::{Direction, ItemDescriptor, ItemRegistry, Value, ValueType};
use simplebinary_rs::constants::{
    KIND_CHECK_NEW_DATA, KIND_DATA, KIND_HELLO, KIND_NO_DATA, KIND_OK, KIND_READ, KIND_RESEND,
    KIND_SAVE_ERROR, KIND_UNKNOWN_ADDRESS, KIND_UNKNOWN_DATA,
};
use simplebinary_rs::proto::{
    compile_check_new_data, compile_read, compile_write, crc8, try_decode, verify_data_only,
    ControlKind, DecodedMessage,
};
use simplebinary_rs::SimpleBinaryError;

fn word_item(device: u8, address: u16) -> ItemDescriptor {
    ItemDescriptor {
        name: format!("word{device}-{address}"),
        channel: "port".into(),
        device_address: device,
        item_address: address,
        direction: Direction::ReadWrite,
        value_type: ValueType::Word,
    }
}

fn registry() -> ItemRegistry {
    let mut items = ItemRegistry::new();
    items.insert(ItemDescriptor {
        name: "temp1".into(),
        channel: "port".into(),
        device_address: 3,
        item_address: 10,
        direction: Direction::Read,
        value_type: ValueType::Float,
    });
    items.insert(word_item(3, 20));
    items
}

/// Tests the byte layout of a compiled WRITE frame: header, little-endian
/// item address and payload, CRC trailer.
#[test]
fn test_write_frame_layout() {
    let item = word_item(2, 0x0102);
    let frame = compile_write(&item, &Value::Word(0x0A0B), 7).unwrap();

    let expected_body = [2, 7, KIND_DATA, 0x02, 0x01, 0x0B, 0x0A];
    assert_eq!(&frame.data[..7], &expected_body);
    assert_eq!(frame.data[7], crc8(&expected_body));
    assert_eq!(frame.data.len(), 8);
    assert_eq!(frame.message_id, 7);
    assert!(!frame.deduplicated());
}

/// Tests that a WRITE with the wrong value type is rejected before it
/// reaches the queue.
#[test]
fn test_write_type_mismatch_is_config_error() {
    let item = word_item(2, 1);
    let err = compile_write(&item, &Value::Float(1.0), 1).unwrap_err();
    assert!(matches!(err, SimpleBinaryError::ConfigError(_)));
}

/// Tests the byte layout of a compiled READ frame and that it carries
/// message id 0.
#[test]
fn test_read_frame_layout() {
    let frame = compile_read(&word_item(5, 0x1234));

    let expected_body = [5, 0, KIND_READ, 0x34, 0x12];
    assert_eq!(&frame.data[..5], &expected_body);
    assert_eq!(frame.data[5], crc8(&expected_body));
    assert_eq!(frame.message_id, 0);
    assert!(frame.deduplicated());
}

/// Tests that forced and non-forced CHECK_NEW_DATA frames differ only in
/// the force-flag byte and report it through `force_flag`.
#[test]
fn test_check_new_data_frame_layout() {
    let normal = compile_check_new_data(9, false);
    let forced = compile_check_new_data(9, true);

    assert_eq!(&normal.data[..4], &[9, 0, KIND_CHECK_NEW_DATA, 0x00]);
    assert_eq!(&forced.data[..4], &[9, 0, KIND_CHECK_NEW_DATA, 0x01]);
    assert_eq!(normal.force_flag(), Some(false));
    assert_eq!(forced.force_flag(), Some(true));
    assert_ne!(normal.data, forced.data);
}

/// Tests that every assigned control kind byte decodes to its variant.
#[test]
fn test_control_kinds_decode() {
    let items = registry();
    let cases = [
        (KIND_OK, ControlKind::Ok),
        (KIND_RESEND, ControlKind::ResendRequest),
        (KIND_NO_DATA, ControlKind::NoData),
        (KIND_UNKNOWN_DATA, ControlKind::UnknownData),
        (KIND_UNKNOWN_ADDRESS, ControlKind::UnknownAddress),
        (KIND_SAVE_ERROR, ControlKind::SaveError),
        (KIND_HELLO, ControlKind::Hello),
        (0xE9, ControlKind::Unsupported(0xE9)),
    ];

    for (byte, expected) in cases {
        let mut frame = vec![3, 0x20, byte];
        frame.push(crc8(&frame));

        let (message, consumed) = try_decode(&frame, &items, "port", false).unwrap();
        assert_eq!(consumed, 4);
        match message {
            DecodedMessage::Control {
                device,
                message_id,
                kind,
            } => {
                assert_eq!(device, 3);
                assert_eq!(message_id, 0x20);
                assert_eq!(kind, expected);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Tests that a slave DATA frame decodes into a value update with the
/// payload length taken from the item configuration.
#[test]
fn test_data_frame_decodes_word_value() {
    let items = registry();
    let mut frame = vec![3, 1, KIND_DATA, 20, 0, 0xCD, 0xAB];
    frame.push(crc8(&frame));

    let (message, consumed) = try_decode(&frame, &items, "port", false).unwrap();
    assert_eq!(consumed, frame.len());
    match message {
        DecodedMessage::ValueUpdate { item, value, .. } => {
            assert_eq!(item.item_address, 20);
            assert_eq!(value, Value::Word(0xABCD));
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

/// Tests that a truncated DATA frame reports IncompleteFrame and a later
/// retry with the full bytes succeeds.
#[test]
fn test_incomplete_data_frame() {
    let items = registry();
    let mut frame = vec![3, 1, KIND_DATA, 10, 0];
    frame.extend_from_slice(&2.25f32.to_le_bytes());
    frame.push(crc8(&frame));

    for cut in 1..frame.len() {
        assert!(matches!(
            try_decode(&frame[..cut], &items, "port", false),
            Err(SimpleBinaryError::IncompleteFrame)
        ));
    }
    assert!(try_decode(&frame, &items, "port", false).is_ok());
}

/// Tests that a corrupted CRC reports the exact frame length to discard.
#[test]
fn test_invalid_checksum_reports_frame_len() {
    let items = registry();

    let mut control = vec![3, 0, KIND_OK];
    let good = crc8(&control);
    control.push(good.wrapping_add(1));
    match try_decode(&control, &items, "port", false) {
        Err(SimpleBinaryError::InvalidChecksum {
            expected,
            calculated,
            frame_len,
        }) => {
            assert_eq!(expected, good.wrapping_add(1));
            assert_eq!(calculated, good);
            assert_eq!(frame_len, 4);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let mut data = vec![3, 1, KIND_DATA, 10, 0];
    data.extend_from_slice(&2.25f32.to_le_bytes());
    data.push(crc8(&data).wrapping_add(1));
    match try_decode(&data, &items, "port", false) {
        Err(SimpleBinaryError::InvalidChecksum { frame_len, .. }) => {
            assert_eq!(frame_len, data.len());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

/// Tests that a DATA frame for an unconfigured item address is reported
/// with the number of bytes decoded so far, so the caller can skip them.
#[test]
fn test_unknown_item_address() {
    let items = registry();
    let frame = vec![3, 1, KIND_DATA, 99, 0, 0, 0, 0, 0, 0];
    match try_decode(&frame, &items, "port", false) {
        Err(SimpleBinaryError::UnknownItemAddress {
            device,
            item_address,
            frame_len,
        }) => {
            assert_eq!(device, 3);
            assert_eq!(item_address, 99);
            assert_eq!(frame_len, 5);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

/// Tests that a byte outside every known frame shape is an unrecognized
/// message, the trigger for byte-by-byte resynchronization.
#[test]
fn test_unrecognized_kind() {
    let items = registry();
    let frame = [3, 0, 0x42, 0, 0];
    assert!(matches!(
        try_decode(&frame, &items, "port", false),
        Err(SimpleBinaryError::UnrecognizedMessage { kind: 0x42 })
    ));
}

/// Tests the side-effect-free probe used to check whether a complete valid
/// frame heads the buffer.
#[test]
fn test_verify_data_only() {
    let items = registry();
    let mut frame = vec![3, 0, KIND_NO_DATA];
    frame.push(crc8(&frame));

    assert_eq!(verify_data_only(&frame, &items, "port"), Some(3));
    assert_eq!(verify_data_only(&frame[..3], &items, "port"), None);
    assert_eq!(verify_data_only(&[3, 0, 0x42, 0], &items, "port"), None);
}
