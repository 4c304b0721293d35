//! Outbound command queue with priority insertion, duplicate suppression
//! and dead-device demotion.
//!
//! The queue is FIFO by default. READ and CHECK_NEW_DATA requests with a
//! byte-identical encoded payload are suppressed while an equal one is
//! already pending; WRITE commands are never deduplicated. When the head
//! item's device is not responding and other work is queued, the whole
//! queue is partitioned so every other device is served first, preserving
//! relative order within both groups.

use crate::channel::devices::DeviceStateTable;
use crate::proto::frame::OutboundItem;
use log::debug;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct CommandQueue {
    items: VecDeque<OutboundItem>,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue {
            items: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when an equal-payload item is already pending.
    fn contains_payload(&self, item: &OutboundItem) -> bool {
        self.items.iter().any(|queued| queued.data == item.data)
    }

    fn suppress(&self, item: &OutboundItem) -> bool {
        item.deduplicated() && self.contains_payload(item)
    }

    /// Append at the tail. Returns false when the item was suppressed as a
    /// duplicate READ/CHECK_NEW_DATA request.
    pub fn enqueue(&mut self, item: OutboundItem) -> bool {
        if self.suppress(&item) {
            debug!("device {} - request already in queue", item.device);
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Insert at the head. Same duplicate suppression as `enqueue`.
    pub fn enqueue_priority(&mut self, item: OutboundItem) -> bool {
        if self.suppress(&item) {
            debug!("device {} - priority request already in queue", item.device);
            return false;
        }
        self.items.push_front(item);
        true
    }

    /// Take the next item to transmit.
    ///
    /// Fast path: the head device is responding, or it is the only pending
    /// work, so the head is taken unchanged. Otherwise all items of the
    /// unresponsive head device are demoted behind everything else
    /// (stable in both groups) and the new head is taken, which may still
    /// belong to the dead device if nothing else was queued.
    pub fn take_next(&mut self, devices: &DeviceStateTable) -> Option<OutboundItem> {
        let first = self.items.pop_front()?;

        if !devices.is_not_responding(first.device) || self.items.is_empty() {
            return Some(first);
        }

        debug!(
            "device {} not responding - reordering queue ({} pending)",
            first.device,
            self.items.len() + 1
        );

        let mut dead_group: Vec<OutboundItem> = vec![first];
        let mut other_group: Vec<OutboundItem> = Vec::new();
        let dead_device = dead_group[0].device;

        while let Some(item) = self.items.pop_front() {
            if item.device == dead_device {
                dead_group.push(item);
            } else {
                other_group.push(item);
            }
        }

        self.items.extend(other_group);
        self.items.extend(dead_group);

        self.items.pop_front()
    }

    /// Snapshot of the pending items, used by diagnostics and tests.
    pub fn snapshot(&self) -> Vec<OutboundItem> {
        self.items.iter().cloned().collect()
    }
}
