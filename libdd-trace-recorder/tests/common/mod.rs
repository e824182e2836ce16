// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use libdd_trace_recorder::clock::EventTime;
use libdd_trace_recorder::entry::{AppInfo, Backtrace};
use libdd_trace_recorder::{
    CollectorConfig, Entry, EntryType, ErrorCode, GlobalConfiguration, GlobalState, Plugin,
    PluginRegistry, TraceBufferConsumer, TraceConfiguration, TraceController, TraceError,
    TraceEventObserver, TraceId, TraceLogger, TraceSink,
};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const FEATURE: &str = "test-plugin";
pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct SinkState {
    started: Vec<TraceId>,
    entries: Vec<Entry>,
    ended: Option<bool>,
    entries_at_end: usize,
    late_records: usize,
}

/// Decodes and keeps every record it receives.
#[derive(Default)]
pub struct TestSink {
    state: Mutex<SinkState>,
    condvar: Condvar,
}

impl TestSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Waits for `end` and returns whether the trace was successful.
    pub fn wait_for_end(&self) -> bool {
        let state = self.state.lock().unwrap();
        let (state, timeout) = self
            .condvar
            .wait_timeout_while(state, TIMEOUT, |state| state.ended.is_none())
            .unwrap();
        assert!(!timeout.timed_out(), "sink was never ended");
        state.ended.unwrap()
    }

    pub fn ended(&self) -> Option<bool> {
        self.state.lock().unwrap().ended
    }

    pub fn started(&self) -> Vec<TraceId> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.state.lock().unwrap().entries.clone()
    }

    pub fn entry_types(&self) -> Vec<EntryType> {
        self.entries().iter().map(|e| e.entry_type).collect()
    }

    /// Number of entries received when `end` was called.
    pub fn entries_at_end(&self) -> usize {
        self.state.lock().unwrap().entries_at_end
    }

    /// Records received after `end`, they are not kept.
    pub fn late_records(&self) -> usize {
        self.state.lock().unwrap().late_records
    }
}

impl TraceSink for TestSink {
    fn start(&self, trace_id: TraceId) {
        self.state.lock().unwrap().started.push(trace_id);
    }

    fn end(&self, successful: bool) {
        let mut state = self.state.lock().unwrap();
        state.ended = Some(successful);
        state.entries_at_end = state.entries.len();
        self.condvar.notify_all();
    }

    fn receive_record(&self, record: &[u8]) {
        let entry = Entry::decode(record).unwrap();
        let mut state = self.state.lock().unwrap();
        if state.ended.is_some() {
            state.late_records += 1;
            return;
        }
        state.entries.push(entry);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PluginEvent {
    Start,
    End,
    Abort(ErrorCode),
}

/// Logs `start_entries` entries on start and one entry on end.
pub struct TestPlugin {
    start_entries: usize,
    start_entry_frames: u64,
    events: Mutex<Vec<PluginEvent>>,
    logger: Mutex<Option<Arc<TraceLogger>>>,
}

impl TestPlugin {
    pub fn new(start_entries: usize) -> Arc<Self> {
        Self::with_frames(start_entries, 4)
    }

    /// Start entries are backtraces of `frames` frames.
    pub fn with_frames(start_entries: usize, frames: u64) -> Arc<Self> {
        Arc::new(Self {
            start_entries,
            start_entry_frames: frames,
            events: Mutex::new(Vec::new()),
            logger: Mutex::new(None),
        })
    }

    pub fn events(&self) -> Vec<PluginEvent> {
        self.events.lock().unwrap().clone()
    }

    /// The logger handed to the last `start`.
    pub fn logger(&self) -> Option<Arc<TraceLogger>> {
        self.logger.lock().unwrap().clone()
    }
}

impl Plugin for TestPlugin {
    fn should_enable(&self, config: &TraceConfiguration) -> bool {
        config.is_feature_enabled(FEATURE)
    }

    fn start(&self, logger: Arc<TraceLogger>, _config: &TraceConfiguration) {
        self.events.lock().unwrap().push(PluginEvent::Start);
        for _ in 0..self.start_entries {
            let backtrace = Backtrace {
                thread_name: "sampler".to_owned(),
                priority: 0,
                addresses: (0..self.start_entry_frames)
                    .map(|i| 0xffff_0000_0000 + i)
                    .collect(),
            };
            let _ = logger.log(Entry::backtrace(EventTime::now(), backtrace));
        }
        *self.logger.lock().unwrap() = Some(logger);
    }

    fn end(&self, logger: Arc<TraceLogger>) {
        self.events.lock().unwrap().push(PluginEvent::End);
        let _ = logger.log(Entry::log(EventTime::now(), "plugin end"));
    }

    fn abort(&self, error: &TraceError) {
        self.events.lock().unwrap().push(PluginEvent::Abort(error.code));
    }
}

/// Logs from its own thread for as long as its logger is valid, like a
/// sampler running next to the traced code.
#[derive(Default)]
pub struct ThreadedPlugin {
    workers: Mutex<Vec<JoinHandle<usize>>>,
}

impl ThreadedPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Joins every worker and returns how many entries they wrote.
    pub fn join_workers(&self) -> usize {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        workers.into_iter().map(|w| w.join().unwrap()).sum()
    }
}

impl Plugin for ThreadedPlugin {
    fn should_enable(&self, config: &TraceConfiguration) -> bool {
        config.is_feature_enabled(FEATURE)
    }

    fn start(&self, logger: Arc<TraceLogger>, _config: &TraceConfiguration) {
        let worker = std::thread::spawn(move || {
            let mut written = 0;
            while logger.is_valid() {
                if logger.log(Entry::log(EventTime::now(), "tick")).is_ok() {
                    written += 1;
                }
                std::thread::yield_now();
            }
            written
        });
        self.workers.lock().unwrap().push(worker);
    }

    fn end(&self, _logger: Arc<TraceLogger>) {}

    fn abort(&self, _error: &TraceError) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObservedEvent {
    Started(TraceId),
    Ended(TraceId),
    Failed(TraceId, ErrorCode),
}

#[derive(Default)]
pub struct TestObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl TestObserver {
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TraceEventObserver for TestObserver {
    fn trace_started(&self, trace_id: TraceId) {
        self.events
            .lock()
            .unwrap()
            .push(ObservedEvent::Started(trace_id));
    }

    fn trace_ended(&self, trace_id: TraceId) {
        self.events.lock().unwrap().push(ObservedEvent::Ended(trace_id));
    }

    fn trace_failed(&self, trace_id: TraceId, error: &TraceError) {
        self.events
            .lock()
            .unwrap()
            .push(ObservedEvent::Failed(trace_id, error.code));
    }
}

/// A running consumer loop plus the global state controllers subscribe to.
/// The loop is stopped when the fixture is dropped.
pub struct TestFixture {
    pub consumer: Arc<TraceBufferConsumer>,
    pub global_state: Arc<GlobalState>,
    handle: Option<JoinHandle<()>>,
}

impl TestFixture {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
        let consumer = Arc::new(TraceBufferConsumer::new());
        let handle = consumer
            .spawn(CollectorConfig::default().consumer_thread_name())
            .unwrap();
        Self {
            consumer,
            global_state: Arc::new(GlobalState::new(Some(GlobalConfiguration {
                enabled: true,
            }))),
            handle: Some(handle),
        }
    }

    pub fn controller(&self, plugins: Vec<Arc<dyn Plugin>>) -> TraceController {
        self.controller_with_config(&CollectorConfig::default(), plugins)
    }

    pub fn controller_with_config(
        &self,
        config: &CollectorConfig,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> TraceController {
        TraceController::new(
            config,
            plugins.into_iter().collect::<PluginRegistry>(),
            self.consumer.clone(),
            &self.global_state,
            AppInfo {
                app_id: "com.example.app".to_owned(),
                app_version: "1.2.3".to_owned(),
                device_model: "test-device".to_owned(),
                os_version: "17.0".to_owned(),
            },
        )
        .unwrap()
    }
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        self.consumer.stop_loop(None);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

pub fn plugin_config() -> TraceConfiguration {
    TraceConfiguration::default().with_feature(FEATURE)
}
