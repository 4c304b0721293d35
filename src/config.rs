//! # Item and Channel Configuration
//!
//! This module defines the binding configuration the engine consumes: a
//! mapping from item identifiers to protocol item descriptors (channel,
//! device address, item address, direction, value type), plus the channel
//! declarations used by the CLI to construct transports.
//!
//! Configurations are loaded from JSON with serde.

use crate::error::SimpleBinaryError;
use bytes::{BufMut, BytesMut};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Data direction of a configured item, seen from the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Slave reports the value; the master polls it.
    Read,
    /// Master writes the value; never polled.
    Write,
    /// Both directions.
    ReadWrite,
}

impl Direction {
    /// True for items the poll scheduler reads from the device.
    pub fn is_input(&self) -> bool {
        matches!(self, Direction::Read | Direction::ReadWrite)
    }

    /// True for items the host may write to the device.
    pub fn is_output(&self) -> bool {
        matches!(self, Direction::Write | Direction::ReadWrite)
    }
}

/// Value types carried by the protocol, with fixed little-endian payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bit,
    Byte,
    Word,
    DWord,
    Float,
}

impl ValueType {
    /// Payload length in bytes of a value of this type.
    pub fn payload_len(&self) -> usize {
        match self {
            ValueType::Bit | ValueType::Byte => 1,
            ValueType::Word => 2,
            ValueType::DWord | ValueType::Float => 4,
        }
    }
}

/// A decoded or to-be-encoded item value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bit(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    Float(f32),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bit(_) => ValueType::Bit,
            Value::Byte(_) => ValueType::Byte,
            Value::Word(_) => ValueType::Word,
            Value::DWord(_) => ValueType::DWord,
            Value::Float(_) => ValueType::Float,
        }
    }

    /// Append the little-endian payload encoding to `out`.
    pub fn encode_le(&self, out: &mut BytesMut) {
        match self {
            Value::Bit(b) => out.put_u8(u8::from(*b)),
            Value::Byte(b) => out.put_u8(*b),
            Value::Word(w) => out.put_u16_le(*w),
            Value::DWord(d) => out.put_u32_le(*d),
            Value::Float(f) => out.put_f32_le(*f),
        }
    }

    /// Decode a payload of exactly `ty.payload_len()` bytes.
    ///
    /// Callers guarantee the length; the codec derives it from the item
    /// descriptor before slicing.
    pub fn decode_le(ty: ValueType, payload: &[u8]) -> Value {
        match ty {
            ValueType::Bit => Value::Bit(payload[0] != 0),
            ValueType::Byte => Value::Byte(payload[0]),
            ValueType::Word => Value::Word(u16::from_le_bytes([payload[0], payload[1]])),
            ValueType::DWord => Value::DWord(u32::from_le_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])),
            ValueType::Float => Value::Float(f32::from_le_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bit(b) => write!(f, "{}", u8::from(*b)),
            Value::Byte(b) => write!(f, "{b}"),
            Value::Word(w) => write!(f, "{w}"),
            Value::DWord(d) => write!(f, "{d}"),
            Value::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Binding of one item identifier to a protocol address.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDescriptor {
    /// Item identifier as known to the host (e.g. "temp1").
    pub name: String,
    /// Channel the item's device is attached to.
    pub channel: String,
    /// Bus address of the slave device.
    pub device_address: u8,
    /// Item address inside the device.
    pub item_address: u16,
    pub direction: Direction,
    pub value_type: ValueType,
}

/// Lookup table from item identifiers to descriptors, with the reverse
/// lookups the codec and scheduler need.
#[derive(Debug, Clone, Default)]
pub struct ItemRegistry {
    items: HashMap<String, ItemDescriptor>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        ItemRegistry {
            items: HashMap::new(),
        }
    }

    /// Build a registry from a list of descriptors; duplicate item names
    /// are a configuration error.
    pub fn from_descriptors(
        descriptors: Vec<ItemDescriptor>,
    ) -> Result<Self, SimpleBinaryError> {
        let mut registry = ItemRegistry::new();
        for descriptor in descriptors {
            if registry.items.contains_key(&descriptor.name) {
                return Err(SimpleBinaryError::ConfigError(format!(
                    "duplicate item name '{}'",
                    descriptor.name
                )));
            }
            registry.items.insert(descriptor.name.clone(), descriptor);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, descriptor: ItemDescriptor) {
        self.items.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ItemDescriptor> {
        self.items.get(name)
    }

    /// Find the descriptor a slave data frame refers to.
    pub fn find(&self, channel: &str, device_address: u8, item_address: u16) -> Option<&ItemDescriptor> {
        self.items.values().find(|d| {
            d.channel == channel
                && d.device_address == device_address
                && d.item_address == item_address
        })
    }

    /// All items bound to one channel.
    pub fn for_channel<'a>(
        &'a self,
        channel: &'a str,
    ) -> impl Iterator<Item = &'a ItemDescriptor> {
        self.items.values().filter(move |d| d.channel == channel)
    }

    /// Distinct device addresses configured on one channel, sorted for
    /// deterministic polling order.
    pub fn device_addresses(&self, channel: &str) -> Vec<u8> {
        let mut addresses: Vec<u8> = self
            .for_channel(channel)
            .map(|d| d.device_address)
            .collect();
        addresses.sort_unstable();
        addresses.dedup();
        addresses
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Polling strategy of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// Enqueue a READ per configured input item on every tick.
    OnScan,
    /// Enqueue a CHECK_NEW_DATA per device on every tick, forced for
    /// devices that need resynchronization.
    OnChange,
}

/// Serial endpoint parameters of a channel declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialEndpoint {
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
}

fn default_baudrate() -> u32 {
    9600
}

/// One channel declaration from the configuration file. Exactly one of
/// `serial`/`tcp` must be present.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDef {
    pub name: String,
    pub poll_mode: PollMode,
    #[serde(default)]
    pub serial: Option<SerialEndpoint>,
    #[serde(default)]
    pub tcp: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,
}

/// Top-level configuration file layout.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub channels: Vec<ChannelDef>,
    pub items: Vec<ItemDescriptor>,
}

impl ConfigFile {
    /// Parse a configuration file from JSON text.
    pub fn from_json(text: &str) -> Result<Self, SimpleBinaryError> {
        serde_json::from_str(text)
            .map_err(|e| SimpleBinaryError::ConfigError(e.to_string()))
    }
}
