// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace, span and annotation lifecycle.
//!
//! A [`TraceController`] owns a ring buffer and hands one logger per plugin
//! to every trace. At most one trace is active at a time: starting a trace
//! while another one is active fails the latter with
//! [`ErrorCode::TraceLimitExceeded`].
//!
//! Finalizing a trace queues a drain on the [`TraceBufferConsumer`] whose
//! completion recycles the ring and only then ends the sink. The next
//! `start_trace` waits for that completion, so a sink never receives `end`
//! before all the records of its trace, and records of two traces never
//! share a ring. Drains deliver to the controller's [`SinkSlot`], which only
//! holds a sink between the start of its trace and that completion.
//!
//! Public methods must not be called from plugin callbacks: the controller
//! lock is held while plugins run.

mod context;

use crate::buffer_consumer::{SinkSlot, TraceBufferConsumer, TraceSink};
use crate::clock::EventTime;
use crate::config::{CollectorConfig, TraceConfiguration};
use crate::entry::{
    Annotation, AppInfo, Entry, EntryType, ErrorCode, TraceError, TraceMetadata,
};
use crate::entry_parser::EntryParser;
use crate::global_state::{GlobalConfiguration, GlobalState, GlobalStateObserver};
use crate::ids::{AnnotationId, SpanId, TraceId};
use crate::observer::{TraceEventObserver, TraceEventSubject};
use crate::packet::{
    Packet, PacketWriter, RingBufferPacketReader, RingBufferPacketWriter, StreamIdAllocator,
};
use crate::plugin::PluginRegistry;
use crate::ring_buffer::RingBuffer;
use crate::sync::{CompletionBarrier, MutexExt};
use crate::trace_logger::TraceLogger;
use context::{Span, TraceContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, warn};

const TIMEOUT_DESCRIPTION: &str = "The trace did not complete within the timeout duration.";
const EXCEPTION_DESCRIPTION: &str = "An exception was raised";
const DISABLED_DESCRIPTION: &str =
    "The trace was aborted because a new global configuration disabled tracing.";
const DESTRUCTED_DESCRIPTION: &str =
    "The trace was aborted because the TraceController that managed it was destructed.";

pub struct TraceController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    ring: Arc<RingBuffer<Packet>>,
    parser: Arc<Mutex<EntryParser>>,
    consumer: Arc<TraceBufferConsumer>,
    registry: PluginRegistry,
    /// Writer of each registered plugin, by registration index.
    plugin_writers: Vec<Arc<dyn PacketWriter>>,
    state_writer: Arc<dyn PacketWriter>,
    stream_ids: Arc<StreamIdAllocator>,
    app_info: AppInfo,
    trace: Mutex<Option<TraceContext>>,
    active_sink: Arc<SinkSlot>,
    /// Set when a trace was dropped without recycling the ring.
    abandoned: AtomicBool,
    completion: Arc<CompletionBarrier>,
    observers: TraceEventSubject,
}

impl TraceController {
    /// Creates a controller whose records are drained by `consumer`. The
    /// consumer loop must be running for traces to complete.
    pub fn new(
        config: &CollectorConfig,
        registry: PluginRegistry,
        consumer: Arc<TraceBufferConsumer>,
        global_state: &GlobalState,
        app_info: AppInfo,
    ) -> anyhow::Result<Self> {
        let ring = Arc::new(RingBuffer::new(registry.len() + 1, config.slot_count())?);
        let state_writer: Arc<dyn PacketWriter> =
            Arc::new(RingBufferPacketWriter::new(ring.register_producer()?));
        let mut plugin_writers: Vec<Arc<dyn PacketWriter>> = Vec::with_capacity(registry.len());
        for _ in registry.plugins() {
            plugin_writers.push(Arc::new(RingBufferPacketWriter::new(
                ring.register_producer()?,
            )));
        }
        let parser = EntryParser::with_pool_capacity(
            Arc::new(RingBufferPacketReader::new(ring.clone())),
            config.reassembly_pool_capacity(),
        );

        let inner = Arc::new(ControllerInner {
            ring,
            parser: Arc::new(Mutex::new(parser)),
            consumer,
            registry,
            plugin_writers,
            state_writer,
            stream_ids: Arc::new(StreamIdAllocator::default()),
            app_info,
            trace: Mutex::new(None),
            active_sink: Arc::new(SinkSlot::new()),
            abandoned: AtomicBool::new(false),
            completion: Arc::new(CompletionBarrier::default()),
            observers: TraceEventSubject::default(),
        });
        let weak = Arc::downgrade(&inner);
        let observer: Weak<dyn GlobalStateObserver> = weak;
        global_state.subscribe(observer);
        Ok(Self { inner })
    }

    /// Starts a trace, failing the active one if any. Blocks while the
    /// previous trace is still being drained.
    pub fn start_trace(
        &self,
        config: &TraceConfiguration,
        sink: Arc<dyn TraceSink>,
        session_id: &str,
        interaction_name: &str,
    ) -> TraceId {
        self.start_trace_at(config, sink, session_id, interaction_name, EventTime::now())
    }

    pub fn start_trace_at(
        &self,
        config: &TraceConfiguration,
        sink: Arc<dyn TraceSink>,
        session_id: &str,
        interaction_name: &str,
        time: EventTime,
    ) -> TraceId {
        self.inner
            .start_trace(config, sink, session_id, interaction_name, time)
    }

    /// Ends the active trace successfully if it is named `interaction_name`.
    pub fn end_trace(&self, interaction_name: &str) -> Option<TraceId> {
        self.end_trace_at(interaction_name, EventTime::now())
    }

    pub fn end_trace_at(&self, interaction_name: &str, time: EventTime) -> Option<TraceId> {
        let id = self.inner.finish_trace(interaction_name, |id| Entry::trace_end(id, time))?;
        self.inner.observers.trace_ended(id);
        Some(id)
    }

    /// Fails the active trace with `error` if it is named `interaction_name`.
    pub fn abort_trace(&self, interaction_name: &str, error: TraceError) -> Option<TraceId> {
        self.abort_trace_at(interaction_name, error, EventTime::now())
    }

    pub fn abort_trace_at(
        &self,
        interaction_name: &str,
        error: TraceError,
        time: EventTime,
    ) -> Option<TraceId> {
        let id = self.inner.finish_trace(interaction_name, |id| {
            Entry::trace_failure(id, time, error.clone())
        })?;
        self.inner.observers.trace_failed(id, &error);
        Some(id)
    }

    /// Fails the active trace with [`ErrorCode::TraceTimeout`] if it is named
    /// `interaction_name`.
    pub fn timeout_trace(&self, interaction_name: &str) -> Option<TraceId> {
        self.timeout_trace_at(interaction_name, EventTime::now())
    }

    pub fn timeout_trace_at(&self, interaction_name: &str, time: EventTime) -> Option<TraceId> {
        self.abort_trace_at(
            interaction_name,
            TraceError::new(ErrorCode::TraceTimeout, TIMEOUT_DESCRIPTION),
            time,
        )
    }

    /// Attaches a key/value pair to the active trace if it is named
    /// `interaction_name`.
    pub fn annotate_trace(
        &self,
        interaction_name: &str,
        key: &str,
        value: &str,
    ) -> Option<AnnotationId> {
        self.annotate_trace_at(interaction_name, key, value, EventTime::now())
    }

    pub fn annotate_trace_at(
        &self,
        interaction_name: &str,
        key: &str,
        value: &str,
        time: EventTime,
    ) -> Option<AnnotationId> {
        let mut state = self.inner.trace.lock_or_panic();
        let Some(context) = state
            .as_mut()
            .filter(|context| context.interaction_name == interaction_name)
        else {
            debug!(interaction_name, "No matching trace to annotate");
            return None;
        };
        let id = context.next_annotation_id();
        let annotation = Annotation {
            id,
            key: key.to_owned(),
            value: value.to_owned(),
        };
        log_entry(
            &context.state_logger,
            Entry::trace_annotation(context.id, time, annotation),
        );
        Some(id)
    }

    pub fn start_span(&self, name: &str) -> Option<SpanId> {
        self.start_span_at(name, EventTime::now())
    }

    pub fn start_span_at(&self, name: &str, time: EventTime) -> Option<SpanId> {
        let mut state = self.inner.trace.lock_or_panic();
        let Some(context) = state.as_mut() else {
            debug!(name, "No active trace, span not started");
            return None;
        };
        let id = context.push_span(name.to_owned());
        log_entry(&context.state_logger, Entry::span_start(id, time, name));
        Some(id)
    }

    /// Ends the most recently started open span named `name`.
    pub fn end_span(&self, name: &str) -> Option<SpanId> {
        self.end_span_at(name, EventTime::now())
    }

    pub fn end_span_at(&self, name: &str, time: EventTime) -> Option<SpanId> {
        self.inner.end_span(|span| span.name == name, time)
    }

    pub fn end_span_by_id(&self, span_id: SpanId) -> Option<SpanId> {
        self.end_span_by_id_at(span_id, EventTime::now())
    }

    pub fn end_span_by_id_at(&self, span_id: SpanId, time: EventTime) -> Option<SpanId> {
        self.inner.end_span(|span| span.id == span_id, time)
    }

    /// Annotates the most recently started open span named `name`.
    pub fn annotate_span(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Option<(SpanId, AnnotationId)> {
        self.annotate_span_at(name, key, value, EventTime::now())
    }

    pub fn annotate_span_at(
        &self,
        name: &str,
        key: &str,
        value: &str,
        time: EventTime,
    ) -> Option<(SpanId, AnnotationId)> {
        self.inner
            .annotate_span(|span| span.name == name, key, value, time)
    }

    pub fn annotate_span_by_id(
        &self,
        span_id: SpanId,
        key: &str,
        value: &str,
    ) -> Option<(SpanId, AnnotationId)> {
        self.annotate_span_by_id_at(span_id, key, value, EventTime::now())
    }

    pub fn annotate_span_by_id_at(
        &self,
        span_id: SpanId,
        key: &str,
        value: &str,
        time: EventTime,
    ) -> Option<(SpanId, AnnotationId)> {
        self.inner
            .annotate_span(|span| span.id == span_id, key, value, time)
    }

    /// Writes `entry` through the trace-state logger of the active trace.
    pub fn log(&self, entry: Entry) {
        let state = self.inner.trace.lock_or_panic();
        match state.as_ref() {
            Some(context) => log_entry(&context.state_logger, entry),
            None => debug!(entry_type = ?entry.entry_type, "No active trace, entry dropped"),
        }
    }

    pub fn active_trace_id(&self) -> Option<TraceId> {
        self.inner.trace.lock_or_panic().as_ref().map(|c| c.id)
    }

    pub fn add_observer(&self, observer: &Arc<dyn TraceEventObserver>) {
        self.inner.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn TraceEventObserver>) {
        self.inner.observers.remove(observer);
    }
}

impl ControllerInner {
    fn start_trace(
        &self,
        config: &TraceConfiguration,
        sink: Arc<dyn TraceSink>,
        session_id: &str,
        interaction_name: &str,
        time: EventTime,
    ) -> TraceId {
        let trace_id = TraceId::new();
        let previous = {
            let mut state = self.trace.lock_or_panic();
            let description = format!("New \"{interaction_name}\" trace was started.");
            let previous = self.invalidate_current_trace(&mut state, |id| {
                Entry::trace_failure(
                    id,
                    time,
                    TraceError::new(ErrorCode::TraceLimitExceeded, description),
                )
            });

            self.completion.wait();
            if self.abandoned.swap(false, Ordering::AcqRel) {
                debug!("Recycling the ring of an abandoned trace");
                self.queue_recycle(|| {});
                self.completion.wait();
            }
            self.stream_ids.reset();
            self.active_sink.set(sink.clone());
            sink.start(trace_id);

            let state_logger = Arc::new(self.logger(self.state_writer.clone(), time));
            let metadata = TraceMetadata {
                session_id: session_id.to_owned(),
                start_date_sec: chrono::Utc::now().timestamp(),
                interaction_name: interaction_name.to_owned(),
            };
            log_entry(&state_logger, Entry::trace_start(trace_id, time, metadata));
            log_entry(&state_logger, Entry::app_info(time, self.app_info.clone()));

            let mut plugin_loggers = Vec::new();
            for (index, plugin) in self.registry.enabled_for(config) {
                let Some(writer) = self.plugin_writers.get(index) else {
                    continue;
                };
                let logger = Arc::new(self.logger(writer.clone(), time));
                plugin.start(logger.clone(), config);
                plugin_loggers.push((plugin.clone(), logger));
            }
            debug!(
                %trace_id,
                interaction_name,
                plugins = plugin_loggers.len(),
                "Trace started"
            );

            *state = Some(TraceContext::new(
                trace_id,
                interaction_name.to_owned(),
                sink,
                state_logger,
                plugin_loggers,
            ));
            previous
        };

        if let Some((previous_id, entry)) = previous {
            if let Some(error) = entry.error() {
                self.observers.trace_failed(previous_id, error);
            }
        }
        self.observers.trace_started(trace_id);
        trace_id
    }

    /// Finalizes the active trace if it is named `interaction_name`.
    fn finish_trace(
        &self,
        interaction_name: &str,
        final_entry: impl FnOnce(TraceId) -> Entry,
    ) -> Option<TraceId> {
        let mut state = self.trace.lock_or_panic();
        match state.as_ref() {
            None => {
                debug!(interaction_name, "No active trace to finish");
                return None;
            }
            Some(context) if context.interaction_name != interaction_name => {
                debug!(
                    interaction_name,
                    active = %context.interaction_name,
                    "Trace name mismatch, not finishing"
                );
                return None;
            }
            Some(_) => {}
        }
        self.invalidate_current_trace(&mut state, final_entry)
            .map(|(id, _)| id)
    }

    /// Ends every plugin, writes the final entry and queues the drain that
    /// recycles the ring and ends the sink.
    fn invalidate_current_trace(
        &self,
        state: &mut Option<TraceContext>,
        final_entry: impl FnOnce(TraceId) -> Entry,
    ) -> Option<(TraceId, Entry)> {
        let context = state.take()?;
        let entry = final_entry(context.id);
        let successful = entry.entry_type == EntryType::TraceEnd;

        for (plugin, logger) in &context.plugin_loggers {
            match entry.error() {
                Some(error) => plugin.abort(error),
                None => plugin.end(logger.clone()),
            }
            logger.invalidate();
        }

        let dropped = self.ring.drop_count();
        if dropped > 0 {
            warn!(trace_id = %context.id, dropped, "Ring buffer dropped packets during trace");
            log_entry(
                &context.state_logger,
                Entry::ringbuffer_metrics(EventTime::new(entry.timestamp_ns, entry.tid), dropped),
            );
        }
        log_entry(&context.state_logger, entry.clone());
        context.state_logger.invalidate();

        let sink = context.sink.clone();
        self.queue_recycle(move || sink.end(successful));
        debug!(trace_id = %context.id, successful, "Trace finished");
        Some((context.id, entry))
    }

    fn end_span(&self, predicate: impl Fn(&Span) -> bool, time: EventTime) -> Option<SpanId> {
        let mut state = self.trace.lock_or_panic();
        let Some(context) = state.as_mut() else {
            debug!("No active trace, span not ended");
            return None;
        };
        let Some(span) = context.pop_span(predicate) else {
            debug!("No matching open span to end");
            return None;
        };
        log_entry(&context.state_logger, Entry::span_end(span.id, time));
        Some(span.id)
    }

    fn annotate_span(
        &self,
        predicate: impl Fn(&Span) -> bool,
        key: &str,
        value: &str,
        time: EventTime,
    ) -> Option<(SpanId, AnnotationId)> {
        let mut state = self.trace.lock_or_panic();
        let Some(context) = state.as_mut() else {
            debug!("No active trace, span not annotated");
            return None;
        };
        let Some(span_id) = context.find_span(predicate).map(|span| span.id) else {
            debug!("No matching open span to annotate");
            return None;
        };
        let id = context.next_annotation_id();
        let annotation = Annotation {
            id,
            key: key.to_owned(),
            value: value.to_owned(),
        };
        log_entry(
            &context.state_logger,
            Entry::span_annotation(span_id, time, annotation),
        );
        Some((span_id, id))
    }

    /// Arms the completion barrier and queues a drain whose completion
    /// empties the ring for the next trace, then runs `then`.
    fn queue_recycle(&self, then: impl FnOnce() + Send + 'static) {
        self.completion.arm();
        let ring = self.ring.clone();
        let parser = self.parser.clone();
        let active_sink = self.active_sink.clone();
        let completion = self.completion.clone();
        self.consumer.notify(
            self.parser.clone(),
            self.active_sink.clone(),
            Some(Box::new(move || {
                ring.clear();
                ring.reset_drop_counter();
                parser.lock_or_panic().reset();
                active_sink.clear();
                completion.release();
                then();
            })),
        );
    }

    fn logger(&self, writer: Arc<dyn PacketWriter>, time: EventTime) -> TraceLogger {
        let consumer = self.consumer.clone();
        let parser = self.parser.clone();
        let active_sink = self.active_sink.clone();
        TraceLogger::new(writer, time.uptime_ns, self.stream_ids.clone(), move || {
            consumer.notify(parser.clone(), active_sink.clone(), None)
        })
    }

    fn fail_current_trace(&self, code: ErrorCode, description: &str) {
        let error = TraceError::new(code, description);
        let time = EventTime::now();
        let failed = {
            let mut state = self.trace.lock_or_panic();
            self.invalidate_current_trace(&mut state, |id| {
                Entry::trace_failure(id, time, error.clone())
            })
        };
        if let Some((id, _)) = failed {
            self.observers.trace_failed(id, &error);
        }
    }
}

impl GlobalStateObserver for ControllerInner {
    fn exception_killswitch_raised(&self) {
        let error = TraceError::new(ErrorCode::ExceptionRaised, EXCEPTION_DESCRIPTION);
        let aborted = {
            let mut state = self.trace.lock_or_panic();
            let Some(context) = state.take() else {
                return;
            };
            for (plugin, logger) in &context.plugin_loggers {
                plugin.abort(&error);
                logger.invalidate();
            }
            context.state_logger.invalidate();
            // Whatever is left in the ring is discarded and recycled by the
            // next `start_trace`.
            self.active_sink.clear();
            self.abandoned.store(true, Ordering::Release);
            context.id
        };
        warn!(trace_id = %aborted, "Trace aborted by the exception kill-switch");
        self.observers.trace_failed(aborted, &error);
    }

    fn configuration_changed(&self, configuration: Option<&GlobalConfiguration>) {
        if configuration.is_some_and(|config| config.enabled) {
            return;
        }
        self.fail_current_trace(ErrorCode::ConfigurationDisabledTracing, DISABLED_DESCRIPTION);
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        let error = TraceError::new(ErrorCode::ControllerDestructed, DESTRUCTED_DESCRIPTION);
        let time = EventTime::now();
        let failed = {
            let mut state = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
            self.invalidate_current_trace(&mut state, |id| {
                Entry::trace_failure(id, time, error.clone())
            })
        };
        if let Some((id, _)) = failed {
            self.observers.trace_failed(id, &error);
        }
    }
}

fn log_entry(logger: &TraceLogger, entry: Entry) {
    if let Err(err) = logger.log(entry) {
        debug!(%err, "Trace state entry dropped");
    }
}
