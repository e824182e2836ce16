// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::entry_parser::EntryParser;
use crate::ids::TraceId;
use crate::sync::MutexExt;
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Destination of the records of a trace.
///
/// `receive_record` is only called from the consumer thread, once per record
/// and in the order the records were written.
pub trait TraceSink: Send + Sync {
    fn start(&self, trace_id: TraceId);
    fn end(&self, successful: bool);
    fn receive_record(&self, record: &[u8]);
}

pub type CompletionFn = Box<dyn FnOnce() + Send>;

/// Sink of the trace currently writing into a ring.
///
/// Notifications carry the slot rather than a sink, so a notification
/// processed after its trace ended delivers to whoever owns the ring by then.
/// Records drained while the slot is empty are discarded.
#[derive(Default)]
pub struct SinkSlot {
    sink: ArcSwapOption<Arc<dyn TraceSink>>,
}

impl SinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            sink: ArcSwapOption::from_pointee(sink),
        }
    }

    pub fn set(&self, sink: Arc<dyn TraceSink>) {
        self.sink.store(Some(Arc::new(sink)));
    }

    pub fn clear(&self) {
        self.sink.store(None);
    }

    pub fn get(&self) -> Option<Arc<dyn TraceSink>> {
        self.sink.load_full().map(|sink| Arc::clone(&*sink))
    }
}

enum Message {
    Drain {
        parser: Arc<Mutex<EntryParser>>,
        sink: Arc<SinkSlot>,
        on_done: Option<CompletionFn>,
    },
    Stop {
        on_done: Option<CompletionFn>,
    },
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Running,
            2 => LoopState::Stopped,
            _ => LoopState::Idle,
        }
    }
}

/// Work queue drained by a single background thread.
///
/// Each notification makes the loop reassemble every record currently
/// available and forward them to the sink held by the notification's
/// [`SinkSlot`], then run its completion callback. Since notifications are
/// processed in order, waiting for a callback guarantees that everything
/// written before the notification was queued has been drained.
pub struct TraceBufferConsumer {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    state: AtomicU8,
}

impl Default for TraceBufferConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBufferConsumer {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            state: AtomicU8::new(LoopState::Idle as u8),
        }
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Runs the loop on the calling thread until a stop request is processed.
    /// Returns immediately if the loop is already running elsewhere.
    pub fn start_loop(&self) {
        let started = [LoopState::Idle, LoopState::Stopped].iter().any(|from| {
            self.state
                .compare_exchange(
                    *from as u8,
                    LoopState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        });
        if !started {
            warn!("Trace buffer consumer loop is already running");
            return;
        }
        debug!("Trace buffer consumer loop started");

        // The consumer keeps a sender alive, so the channel never disconnects.
        while let Ok(message) = self.receiver.recv() {
            match message {
                Message::Drain {
                    parser,
                    sink,
                    on_done,
                } => {
                    let sink = sink.get();
                    let mut discarded = 0usize;
                    let mut parser = parser.lock_or_panic();
                    while parser.parse(|record| match &sink {
                        Some(sink) => sink.receive_record(record),
                        None => discarded += 1,
                    }) > 0
                    {}
                    drop(parser);
                    if discarded > 0 {
                        debug!(discarded, "No active sink, records discarded");
                    }
                    if let Some(on_done) = on_done {
                        on_done();
                    }
                }
                Message::Stop { on_done } => {
                    if let Some(on_done) = on_done {
                        on_done();
                    }
                    break;
                }
            }
        }

        self.state
            .store(LoopState::Stopped as u8, Ordering::Release);
        debug!("Trace buffer consumer loop stopped");
    }

    /// Starts the loop on a new named thread.
    pub fn spawn(self: &Arc<Self>, thread_name: &str) -> std::io::Result<JoinHandle<()>> {
        let consumer = self.clone();
        std::thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || consumer.start_loop())
    }

    /// Asks the loop to drain `parser` into the sink held by `sink`, then to
    /// run `on_done`.
    pub fn notify(
        &self,
        parser: Arc<Mutex<EntryParser>>,
        sink: Arc<SinkSlot>,
        on_done: Option<CompletionFn>,
    ) {
        self.send(Message::Drain {
            parser,
            sink,
            on_done,
        });
    }

    /// Asks the loop to exit once the pending notifications are processed.
    /// `on_done` runs on the consumer thread right before it exits.
    pub fn stop_loop(&self, on_done: Option<CompletionFn>) {
        self.send(Message::Stop { on_done });
    }

    /// Number of notifications waiting to be processed.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    fn send(&self, message: Message) {
        // Cannot fail, `self.receiver` keeps the channel connected.
        if self.sender.send(message).is_err() {
            warn!("Trace buffer consumer queue is disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, PacketWriter, RingBufferPacketReader, RingBufferPacketWriter};
    use crate::ring_buffer::RingBuffer;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<Vec<u8>>>,
    }

    impl TraceSink for RecordingSink {
        fn start(&self, _trace_id: TraceId) {}
        fn end(&self, _successful: bool) {}
        fn receive_record(&self, record: &[u8]) {
            self.records.lock().unwrap().push(record.to_vec());
        }
    }

    struct TestFixture {
        consumer: Arc<TraceBufferConsumer>,
        writer: RingBufferPacketWriter,
        parser: Arc<Mutex<EntryParser>>,
        sink: Arc<RecordingSink>,
        slot: Arc<SinkSlot>,
    }

    impl TestFixture {
        fn new() -> Self {
            let ring = Arc::new(RingBuffer::<Packet>::new(1, 64).unwrap());
            let writer = RingBufferPacketWriter::new(ring.register_producer().unwrap());
            let parser = Arc::new(Mutex::new(EntryParser::new(Arc::new(
                RingBufferPacketReader::new(ring),
            ))));
            let sink = Arc::new(RecordingSink::default());
            Self {
                consumer: Arc::new(TraceBufferConsumer::new()),
                writer,
                parser,
                slot: Arc::new(SinkSlot::with_sink(sink.clone())),
                sink,
            }
        }

        fn write(&self, stream_id: u32, bytes: &[u8]) {
            let packets = Packet::split(stream_id, bytes);
            assert!(self
                .writer
                .write(packets.len(), &mut |slots| slots.copy_from_slice(&packets)));
        }

        /// Queues a notification and waits for its completion callback.
        fn barrier(&self) {
            let (tx, rx) = mpsc::channel();
            self.consumer.notify(
                self.parser.clone(),
                self.slot.clone(),
                Some(Box::new(move || tx.send(()).unwrap())),
            );
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        fn stop(&self, handle: JoinHandle<()>) {
            self.consumer.stop_loop(None);
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_records_reach_sink_before_completion() {
        let fixture = TestFixture::new();
        let handle = fixture.consumer.spawn("test-consumer").unwrap();

        fixture.write(0, b"first");
        fixture.write(1, &[7u8; 300]);
        fixture.write(2, b"third");
        fixture.barrier();

        let records = fixture.sink.records.lock().unwrap().clone();
        assert_eq!(
            records,
            vec![b"first".to_vec(), vec![7u8; 300], b"third".to_vec()]
        );
        fixture.stop(handle);
    }

    #[test]
    fn test_stop_runs_callback_and_stops() {
        let fixture = TestFixture::new();
        assert_eq!(fixture.consumer.state(), LoopState::Idle);
        let handle = fixture.consumer.spawn("test-consumer").unwrap();

        let (tx, rx) = mpsc::channel();
        fixture
            .consumer
            .stop_loop(Some(Box::new(move || tx.send(()).unwrap())));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(fixture.consumer.state(), LoopState::Stopped);
    }

    #[test]
    fn test_loop_can_restart_after_stop() {
        let fixture = TestFixture::new();
        let handle = fixture.consumer.spawn("test-consumer").unwrap();
        fixture.stop(handle);

        fixture.write(0, b"after restart");
        let handle = fixture.consumer.spawn("test-consumer").unwrap();
        fixture.barrier();
        assert_eq!(fixture.consumer.state(), LoopState::Running);
        assert_eq!(
            *fixture.sink.records.lock().unwrap(),
            vec![b"after restart".to_vec()]
        );
        fixture.stop(handle);
    }

    #[test]
    fn test_notifications_queue_until_loop_starts() {
        let fixture = TestFixture::new();
        fixture.write(0, b"queued");
        fixture
            .consumer
            .notify(fixture.parser.clone(), fixture.slot.clone(), None);
        assert_eq!(fixture.consumer.pending(), 1);

        let handle = fixture.consumer.spawn("test-consumer").unwrap();
        fixture.barrier();
        assert_eq!(fixture.consumer.pending(), 0);
        assert_eq!(
            *fixture.sink.records.lock().unwrap(),
            vec![b"queued".to_vec()]
        );
        fixture.stop(handle);
    }

    #[test]
    fn test_empty_slot_discards_records() {
        let fixture = TestFixture::new();
        let handle = fixture.consumer.spawn("test-consumer").unwrap();

        fixture.slot.clear();
        fixture.write(0, b"abandoned");
        fixture.barrier();
        assert!(fixture.sink.records.lock().unwrap().is_empty());

        fixture.slot.set(fixture.sink.clone());
        fixture.write(1, b"kept");
        fixture.barrier();
        assert_eq!(*fixture.sink.records.lock().unwrap(), vec![b"kept".to_vec()]);
        fixture.stop(handle);
    }

    #[test]
    fn test_queued_notification_follows_slot() {
        let fixture = TestFixture::new();
        let replacement = Arc::new(RecordingSink::default());
        fixture.write(0, b"late");
        fixture
            .consumer
            .notify(fixture.parser.clone(), fixture.slot.clone(), None);
        fixture.slot.set(replacement.clone());

        let handle = fixture.consumer.spawn("test-consumer").unwrap();
        fixture.barrier();
        assert!(fixture.sink.records.lock().unwrap().is_empty());
        assert_eq!(*replacement.records.lock().unwrap(), vec![b"late".to_vec()]);
        fixture.stop(handle);
    }
}
