// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::Packet;
use crate::ring_buffer::RingBuffer;
use std::sync::Arc;

/// Source of packet chunks for an [`EntryParser`](crate::EntryParser).
pub trait PacketReader: Send + Sync {
    /// Passes the next available chunk to `read`, which returns how many
    /// packets it consumed. Returns that count, or 0 when nothing was
    /// available.
    fn read(&self, read: &mut dyn FnMut(&[Packet]) -> usize) -> usize;
}

pub struct RingBufferPacketReader {
    ring: Arc<RingBuffer<Packet>>,
}

impl RingBufferPacketReader {
    pub fn new(ring: Arc<RingBuffer<Packet>>) -> Self {
        Self { ring }
    }
}

impl PacketReader for RingBufferPacketReader {
    fn read(&self, read: &mut dyn FnMut(&[Packet]) -> usize) -> usize {
        self.ring.consume(|chunk| read(chunk))
    }
}
