// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::Packet;
use crate::ring_buffer::Producer;

/// Destination of the packets of a logger.
pub trait PacketWriter: Send + Sync {
    /// Writes `count` packets populated by `fill` as a single message.
    /// Returns false if the message was dropped.
    fn write(&self, count: usize, fill: &mut dyn FnMut(&mut [Packet])) -> bool;
}

/// Writes packets into a ring buffer through its own producer slot.
pub struct RingBufferPacketWriter {
    producer: Producer<Packet>,
}

impl RingBufferPacketWriter {
    pub fn new(producer: Producer<Packet>) -> Self {
        Self { producer }
    }
}

impl PacketWriter for RingBufferPacketWriter {
    fn write(&self, count: usize, fill: &mut dyn FnMut(&mut [Packet])) -> bool {
        self.producer.produce(count, |slots| fill(slots))
    }
}
