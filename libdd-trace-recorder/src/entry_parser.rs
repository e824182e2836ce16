// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reassembly of records from packet chunks.
//!
//! Streams are demultiplexed by id, so packets from several producers may be
//! interleaved within a chunk. A stream that skips, repeats or reorders an
//! index is discarded; nothing tries to recover it.

use crate::packet::{Packet, PacketReader};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_POOL_CAPACITY: usize = 8;

/// A bounded pool of reassembly buffers.
///
/// Buffers handed back with [`put`](Self::put) are cleared and kept for reuse
/// while the pool is below capacity, otherwise dropped.
pub struct BufferPool {
    capacity: usize,
    buffers: Vec<Vec<u8>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: Vec::with_capacity(capacity),
        }
    }

    pub fn get(&mut self) -> Vec<u8> {
        self.buffers.pop().unwrap_or_default()
    }

    pub fn put(&mut self, mut buffer: Vec<u8>) {
        if self.buffers.len() < self.capacity {
            buffer.clear();
            self.buffers.push(buffer);
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

struct StreamBuffer {
    stream_id: u32,
    next_index: u16,
    bytes: Vec<u8>,
}

/// Rebuilds records from the packets produced by a
/// [`TraceLogger`](crate::TraceLogger).
pub struct EntryParser {
    reader: Arc<dyn PacketReader>,
    streams: Vec<StreamBuffer>,
    pool: BufferPool,
}

impl EntryParser {
    pub fn new(reader: Arc<dyn PacketReader>) -> Self {
        Self::with_pool_capacity(reader, DEFAULT_POOL_CAPACITY)
    }

    pub fn with_pool_capacity(reader: Arc<dyn PacketReader>, capacity: usize) -> Self {
        Self {
            reader,
            streams: Vec::new(),
            pool: BufferPool::new(capacity),
        }
    }

    /// Reads one chunk from the reader and calls `on_entry` with every record
    /// completed by it, in packet order. Returns the number of packets read.
    pub fn parse<F>(&mut self, mut on_entry: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        let Self {
            reader,
            streams,
            pool,
        } = self;
        reader.read(&mut |chunk| {
            for packet in chunk {
                Self::parse_packet(streams, pool, packet, &mut on_entry);
            }
            chunk.len()
        })
    }

    /// Drops every partially reassembled stream.
    pub fn reset(&mut self) {
        for stream in self.streams.drain(..) {
            self.pool.put(stream.bytes);
        }
    }

    /// Number of streams waiting for more packets.
    pub fn pending_streams(&self) -> usize {
        self.streams.len()
    }

    fn parse_packet<F>(
        streams: &mut Vec<StreamBuffer>,
        pool: &mut BufferPool,
        packet: &Packet,
        on_entry: &mut F,
    ) where
        F: FnMut(&[u8]),
    {
        if packet.index == 0 {
            if let Some(pos) = streams.iter().position(|s| s.stream_id == packet.stream_id) {
                debug!(
                    stream_id = packet.stream_id,
                    "Discarding incomplete stream superseded by a new one"
                );
                pool.put(streams.swap_remove(pos).bytes);
            }
            if !packet.has_next() {
                on_entry(packet.payload());
                return;
            }
            let mut bytes = pool.get();
            bytes.extend_from_slice(packet.payload());
            streams.push(StreamBuffer {
                stream_id: packet.stream_id,
                next_index: 1,
                bytes,
            });
            return;
        }

        let Some(pos) = streams.iter().position(|s| s.stream_id == packet.stream_id) else {
            return;
        };
        let stream = &mut streams[pos];
        if stream.next_index != packet.index {
            debug!(
                stream_id = packet.stream_id,
                expected = stream.next_index,
                actual = packet.index,
                "Discarding stream with out of order packet"
            );
            pool.put(streams.swap_remove(pos).bytes);
            return;
        }

        stream.bytes.extend_from_slice(packet.payload());
        if packet.has_next() {
            stream.next_index = stream.next_index.wrapping_add(1);
        } else {
            // swap_remove keeps the other streams in place, order among them
            // does not matter.
            let stream = streams.swap_remove(pos);
            on_entry(&stream.bytes);
            pool.put(stream.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PACKET_DATA_SIZE;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::sync::Mutex;

    /// Serves a fixed list of packets, all in a single chunk.
    struct TestPacketReader {
        packets: Mutex<Vec<Packet>>,
    }

    impl TestPacketReader {
        fn new(packets: Vec<Packet>) -> Arc<Self> {
            Arc::new(Self {
                packets: Mutex::new(packets),
            })
        }
    }

    impl PacketReader for TestPacketReader {
        fn read(&self, read: &mut dyn FnMut(&[Packet]) -> usize) -> usize {
            let mut packets = self.packets.lock().unwrap();
            if packets.is_empty() {
                return 0;
            }
            let consumed = read(&packets).min(packets.len());
            packets.drain(..consumed);
            consumed
        }
    }

    fn bytes(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
    }

    fn parse_all(packets: Vec<Packet>) -> Vec<Vec<u8>> {
        let mut parser = EntryParser::new(TestPacketReader::new(packets));
        let mut entries = Vec::new();
        while parser.parse(|entry| entries.push(entry.to_vec())) > 0 {}
        entries
    }

    #[test]
    fn test_single_packet_entry() {
        let data = bytes(PACKET_DATA_SIZE, 1);
        assert_eq!(parse_all(Packet::split(0, &data)), vec![data]);
    }

    #[test]
    fn test_double_packet_entry() {
        let data = bytes(PACKET_DATA_SIZE + 1, 2);
        let packets = Packet::split(0, &data);
        assert_eq!(packets.len(), 2);
        assert_eq!(parse_all(packets), vec![data]);
    }

    #[test]
    fn test_triple_packet_entry() {
        let data = bytes(300, 3);
        let packets = Packet::split(0, &data);
        assert_eq!(packets.len(), 3);
        assert_eq!(parse_all(packets), vec![data]);
    }

    #[test]
    fn test_multiple_entries() {
        let first = bytes(10, 1);
        let second = bytes(250, 2);
        let third = bytes(PACKET_DATA_SIZE * 2, 3);
        let mut packets = Packet::split(0, &first);
        packets.extend(Packet::split(1, &second));
        packets.extend(Packet::split(2, &third));
        assert_eq!(parse_all(packets), vec![first, second, third]);
    }

    #[test]
    fn test_mismatched_index_discards_entry() {
        let mut packets = Packet::split(0, &bytes(300, 0));
        packets.remove(1);
        assert!(parse_all(packets).is_empty());
    }

    #[test]
    fn test_duplicate_index_discards_entry() {
        let mut packets = Packet::split(0, &bytes(300, 0));
        let duplicate = packets[1];
        packets.insert(2, duplicate);
        assert!(parse_all(packets).is_empty());
    }

    #[test]
    fn test_mismatched_stream_id_discards_entry() {
        let mut packets = Packet::split(0, &bytes(200, 0));
        packets[1].stream_id = 1;
        assert!(parse_all(packets).is_empty());
    }

    #[test]
    fn test_ignores_previous_incomplete_stream() {
        let mut packets = Packet::split(0, &bytes(200, 0));
        packets.pop();
        let complete = bytes(200, 9);
        packets.extend(Packet::split(1, &complete));
        assert_eq!(parse_all(packets), vec![complete]);
    }

    #[test]
    fn test_concurrent_streams() {
        let a = bytes(200, 1);
        let b = bytes(200, 2);
        let pa = Packet::split(0, &a);
        let pb = Packet::split(1, &b);
        let packets = vec![pa[0], pb[0], pb[1], pa[1]];
        assert_eq!(parse_all(packets), vec![b, a]);
    }

    #[test]
    fn test_stream_spanning_chunks() {
        let data = bytes(300, 4);
        let packets = Packet::split(0, &data);
        let reader = TestPacketReader::new(packets);
        let mut parser = EntryParser::new(reader.clone());

        // Hand the packets over one read at a time.
        struct OneByOne(Arc<TestPacketReader>);
        impl PacketReader for OneByOne {
            fn read(&self, read: &mut dyn FnMut(&[Packet]) -> usize) -> usize {
                self.0.read(&mut |chunk| read(&chunk[..1]))
            }
        }
        parser.reader = Arc::new(OneByOne(reader));

        let mut entries = Vec::new();
        assert_eq!(parser.parse(|e| entries.push(e.to_vec())), 1);
        assert_eq!(parser.pending_streams(), 1);
        while parser.parse(|e| entries.push(e.to_vec())) > 0 {}
        assert_eq!(entries, vec![data]);
        assert_eq!(parser.pending_streams(), 0);
    }

    #[test]
    fn test_reset_drops_pending_streams() {
        let mut packets = Packet::split(0, &bytes(300, 0));
        packets.pop();
        let mut parser = EntryParser::new(TestPacketReader::new(packets));
        parser.parse(|_| panic!("incomplete stream must not be emitted"));
        assert_eq!(parser.pending_streams(), 1);
        parser.reset();
        assert_eq!(parser.pending_streams(), 0);
        assert_eq!(parser.pool.len(), 1);
    }

    #[test]
    fn test_new_stream_replaces_stale_one_with_same_id() {
        let mut packets = Packet::split(0, &bytes(300, 0));
        packets.pop();
        let fresh = bytes(250, 7);
        packets.extend(Packet::split(0, &fresh));
        assert_eq!(parse_all(packets), vec![fresh]);
    }

    #[test]
    fn test_pool_is_bounded() {
        let mut pool = BufferPool::new(2);
        let buffers: Vec<_> = (0..3).map(|_| pool.get()).collect();
        for mut buffer in buffers {
            buffer.extend_from_slice(b"data");
            pool.put(buffer);
        }
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.capacity(), 2);
        assert!(pool.get().is_empty());
    }

    #[test]
    fn test_stress_sequential_streams() {
        let expected: Vec<Vec<u8>> = (0..30).map(|i| bytes(50 + i * 60, i as u8)).collect();
        let packets = expected
            .iter()
            .enumerate()
            .flat_map(|(id, data)| Packet::split(id as u32, data))
            .collect();
        assert_eq!(parse_all(packets), expected);
    }

    #[test]
    fn test_stress_interleaved_streams() {
        let expected: Vec<Vec<u8>> = (0..30).map(|i| bytes(50 + i * 60, i as u8)).collect();
        let mut queues: Vec<Vec<Packet>> = expected
            .iter()
            .enumerate()
            .map(|(id, data)| {
                let mut packets = Packet::split(id as u32, data);
                packets.reverse();
                packets
            })
            .collect();

        // Interleave streams randomly while keeping each stream in order.
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        let mut packets = Vec::new();
        loop {
            let open: Vec<usize> = (0..queues.len())
                .filter(|&i| !queues[i].is_empty())
                .collect();
            let Some(&pick) = open.choose(&mut rng) else {
                break;
            };
            packets.extend(queues[pick].pop());
        }

        let mut entries = parse_all(packets);
        entries.sort_by_key(|entry| entry.len());
        assert_eq!(entries, expected);
    }

    #[test]
    fn test_split_then_parse_round_trip() {
        bolero::check!()
            .with_type::<(u32, Vec<u8>)>()
            .for_each(|(stream_id, data)| {
                let len = data.len().clamp(1, 2048);
                let mut data = data.clone();
                data.resize(len, 0xab);
                let entries = parse_all(Packet::split(*stream_id, &data));
                assert_eq!(entries, vec![data]);
            });
    }
}
