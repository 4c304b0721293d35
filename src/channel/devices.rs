//! Per-device liveness state, consulted by the queue for scheduling and by
//! the poll scheduler for the force-refresh decision.

use log::info;
use std::collections::HashMap;

/// Liveness classification of one slave device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No exchange outcome observed yet.
    Unknown,
    /// Last exchange succeeded.
    Connected,
    /// The response timeout fired for this device's outstanding request.
    NotResponding,
    /// The resend budget for an outstanding item was exhausted.
    ResponseError,
    /// The device answered with a semantic rejection or undecodable data.
    DataError,
}

/// Address -> state table for one channel. Mutated only by the exchange
/// controller; read by the queue and the poll scheduler.
#[derive(Debug)]
pub struct DeviceStateTable {
    channel: String,
    states: HashMap<u8, DeviceState>,
}

impl DeviceStateTable {
    pub fn new(channel: &str) -> Self {
        DeviceStateTable {
            channel: channel.to_string(),
            states: HashMap::new(),
        }
    }

    /// Current state of a device, `Unknown` until the first outcome.
    pub fn get(&self, address: u8) -> DeviceState {
        self.states
            .get(&address)
            .copied()
            .unwrap_or(DeviceState::Unknown)
    }

    /// Record a state transition; logged only when the state changes.
    pub fn set(&mut self, address: u8, state: DeviceState) {
        let previous = self.get(address);
        if previous != state {
            info!(
                "{} - device {} state {:?} -> {:?}",
                self.channel, address, previous, state
            );
        }
        self.states.insert(address, state);
    }

    /// True when the queue should demote this device's pending items.
    pub fn is_not_responding(&self, address: u8) -> bool {
        self.get(address) == DeviceState::NotResponding
    }
}
