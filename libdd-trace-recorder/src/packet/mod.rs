// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size transport envelope.
//!
//! A serialized record is split into one or more [`Packet`]s sharing a stream
//! id. Packets of a stream carry consecutive indices starting at 0 and every
//! packet but the last has its `has_next` flag set.

mod reader;
mod stream_id;
mod writer;

pub use reader::{PacketReader, RingBufferPacketReader};
pub use stream_id::StreamIdAllocator;
pub use writer::{PacketWriter, RingBufferPacketWriter};

use std::fmt;

pub const PACKET_SIZE: usize = 128;
pub const PACKET_HEADER_SIZE: usize = 8;
pub const PACKET_DATA_SIZE: usize = PACKET_SIZE - PACKET_HEADER_SIZE;
pub const CACHE_LINE_SIZE: usize = 64;

const HAS_NEXT_BIT: u16 = 0x8000;
const SIZE_MASK: u16 = 0x7fff;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Packet {
    pub stream_id: u32,
    pub index: u16,
    /// `has_next` in the top bit, payload size in the low 15 bits.
    flags: u16,
    data: [u8; PACKET_DATA_SIZE],
}

const _: () = assert!(std::mem::size_of::<Packet>() == PACKET_SIZE);
const _: () = assert!(PACKET_SIZE % CACHE_LINE_SIZE == 0);
const _: () = assert!(PACKET_DATA_SIZE <= SIZE_MASK as usize);

impl Packet {
    /// Builds a packet, or `None` if `payload` exceeds [`PACKET_DATA_SIZE`].
    pub fn new(stream_id: u32, index: u16, has_next: bool, payload: &[u8]) -> Option<Self> {
        if payload.len() > PACKET_DATA_SIZE {
            return None;
        }
        let mut data = [0u8; PACKET_DATA_SIZE];
        data[..payload.len()].copy_from_slice(payload);
        let mut flags = payload.len() as u16;
        if has_next {
            flags |= HAS_NEXT_BIT;
        }
        Some(Self {
            stream_id,
            index,
            flags,
            data,
        })
    }

    pub fn has_next(&self) -> bool {
        self.flags & HAS_NEXT_BIT != 0
    }

    pub fn size(&self) -> usize {
        ((self.flags & SIZE_MASK) as usize).min(PACKET_DATA_SIZE)
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.size()]
    }

    /// Splits `bytes` into the packets of stream `stream_id`.
    pub fn split(stream_id: u32, bytes: &[u8]) -> Vec<Packet> {
        let mut packets = vec![Packet::default(); packet_count(bytes.len())];
        fill_packets(stream_id, bytes, &mut packets);
        packets
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            stream_id: 0,
            index: 0,
            flags: 0,
            data: [0; PACKET_DATA_SIZE],
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("stream_id", &self.stream_id)
            .field("index", &self.index)
            .field("has_next", &self.has_next())
            .field("size", &self.size())
            .finish()
    }
}

/// Number of packets needed to carry `len` bytes.
pub fn packet_count(len: usize) -> usize {
    len.div_ceil(PACKET_DATA_SIZE)
}

/// Writes the fragments of `bytes` into `packets`, which must hold exactly
/// [`packet_count`] packets.
pub fn fill_packets(stream_id: u32, bytes: &[u8], packets: &mut [Packet]) {
    debug_assert_eq!(packets.len(), packet_count(bytes.len()));
    let last = packets.len().saturating_sub(1);
    for (index, (packet, chunk)) in packets
        .iter_mut()
        .zip(bytes.chunks(PACKET_DATA_SIZE))
        .enumerate()
    {
        packet.stream_id = stream_id;
        packet.index = index as u16;
        packet.flags = chunk.len() as u16;
        if index != last {
            packet.flags |= HAS_NEXT_BIT;
        }
        packet.data[..chunk.len()].copy_from_slice(chunk);
    }
}
