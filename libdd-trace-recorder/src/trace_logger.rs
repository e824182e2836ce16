// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::entry::Entry;
use crate::error::LogError;
use crate::packet::{fill_packets, packet_count, PacketWriter, StreamIdAllocator};
use arc_swap::ArcSwapOption;
use crossbeam_utils::Backoff;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Largest serialized record a logger accepts.
pub const MAX_ENTRY_SIZE: usize = 2048;

/// Serializes records into packets and publishes them through a
/// [`PacketWriter`].
///
/// Timestamps are made relative to the logger's reference time. A logger is
/// scoped to one trace: once [`invalidate`](Self::invalidate)d, every call is
/// a silent no-op.
pub struct TraceLogger {
    writer: ArcSwapOption<Arc<dyn PacketWriter>>,
    /// `log` calls between their writer load and their wake-up.
    in_flight: AtomicUsize,
    reference_uptime_ns: u64,
    stream_ids: Arc<StreamIdAllocator>,
    on_write: Box<dyn Fn() + Send + Sync>,
}

impl TraceLogger {
    pub fn new(
        writer: Arc<dyn PacketWriter>,
        reference_uptime_ns: u64,
        stream_ids: Arc<StreamIdAllocator>,
        on_write: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            writer: ArcSwapOption::from_pointee(writer),
            in_flight: AtomicUsize::new(0),
            reference_uptime_ns,
            stream_ids,
            on_write: Box::new(on_write),
        }
    }

    pub fn reference_uptime_ns(&self) -> u64 {
        self.reference_uptime_ns
    }

    /// Writes `entry`, with its timestamp rebased on the reference time.
    ///
    /// Entries stamped before the reference time are skipped and reported as
    /// written, as are all entries once the logger is invalidated.
    pub fn log(&self, mut entry: Entry) -> Result<(), LogError> {
        let _in_flight = InFlight::enter(&self.in_flight);
        let guard = self.writer.load();
        let Some(writer) = &*guard else {
            return Ok(());
        };

        let Some(elapsed) = entry.timestamp_ns.checked_sub(self.reference_uptime_ns) else {
            debug!(
                entry_type = ?entry.entry_type,
                timestamp_ns = entry.timestamp_ns,
                reference_ns = self.reference_uptime_ns,
                "Skipping entry that predates the trace"
            );
            return Ok(());
        };
        entry.timestamp_ns = elapsed;

        let bytes = entry.encode()?;
        if bytes.len() > MAX_ENTRY_SIZE {
            error!(
                entry_type = ?entry.entry_type,
                size = bytes.len(),
                "Dropping entry above the {MAX_ENTRY_SIZE} byte limit"
            );
            return Err(LogError::Oversized {
                size: bytes.len(),
                max: MAX_ENTRY_SIZE,
            });
        }

        let stream_id = self.stream_ids.next_id();
        let written = writer.write(packet_count(bytes.len()), &mut |packets| {
            fill_packets(stream_id, &bytes, packets)
        });
        if !written {
            debug!(stream_id, size = bytes.len(), "Ring buffer full, entry dropped");
            return Err(LogError::BufferFull);
        }
        (self.on_write)();
        Ok(())
    }

    /// Detaches the writer. Concurrent `log` calls either complete against the
    /// old writer or become no-ops.
    ///
    /// Returns once the calls that still hold the old writer are done, so no
    /// packet of this logger reaches the ring afterwards. `log` never blocks,
    /// which bounds the wait.
    pub fn invalidate(&self) {
        self.writer.store(None);
        fence(Ordering::SeqCst);
        let backoff = Backoff::new();
        while self.in_flight.load(Ordering::Acquire) > 0 {
            backoff.snooze();
        }
    }

    pub fn is_valid(&self) -> bool {
        self.writer.load().is_some()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        // Pairs with the fence in `invalidate`: either this call sees the
        // detached writer or `invalidate` sees this call.
        fence(Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}
