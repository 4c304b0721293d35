//! SimpleBinary wire protocol: frame layout, CRC, encode and decode.

pub mod frame;

pub use frame::{
    compile_check_new_data, compile_read, compile_write, crc8, try_decode, verify_data_only,
    ControlKind, DecodedMessage, MessageKind, OutboundItem,
};
