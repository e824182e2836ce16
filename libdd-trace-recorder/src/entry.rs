// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Records carried through the pipeline, MessagePack encoded.

use crate::clock::EventTime;
use crate::ids::{AnnotationId, SpanId, TraceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    TraceStart,
    TraceEnd,
    TraceFailure,
    TraceAnnotation,
    SpanStart,
    SpanEnd,
    SpanAnnotation,
    AppInfo,
    Backtrace,
    RingbufferMetrics,
    Log,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    #[default]
    Undefined,
    /// A new trace was started while this one was active.
    TraceLimitExceeded,
    TraceTimeout,
    ExceptionRaised,
    ConfigurationDisabledTracing,
    ControllerDestructed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Undefined => "UNDEFINED",
            ErrorCode::TraceLimitExceeded => "TRACE_LIMIT_EXCEEDED",
            ErrorCode::TraceTimeout => "TRACE_TIMEOUT",
            ErrorCode::ExceptionRaised => "EXCEPTION_RAISED",
            ErrorCode::ConfigurationDisabledTracing => "CONFIGURATION_DISABLED_TRACING",
            ErrorCode::ControllerDestructed => "CONTROLLER_DESTRUCTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a trace ended unsuccessfully.
#[derive(Clone, Debug, Default, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {description}")]
pub struct TraceError {
    pub code: ErrorCode,
    pub description: String,
}

impl TraceError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub session_id: String,
    /// Wall-clock start of the trace, in seconds since the Unix epoch.
    pub start_date_sec: i64,
    pub interaction_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: String,
    pub app_version: String,
    pub device_model: String,
    pub os_version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanMetadata {
    pub name: String,
}

/// A sampled call stack, as captured by the platform sampler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backtrace {
    pub thread_name: String,
    pub priority: i32,
    pub addresses: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingBufferMetrics {
    pub dropped_packets: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    None,
    TraceMetadata(TraceMetadata),
    AppInfo(AppInfo),
    Annotation(Annotation),
    SpanMetadata(SpanMetadata),
    Error(TraceError),
    Backtrace(Backtrace),
    RingBufferMetrics(RingBufferMetrics),
    Message(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub entry_type: EntryType,
    /// Trace id for trace records, span id for span records.
    pub group_id: Option<TraceId>,
    /// Monotonic uptime when built, rewritten relative to the trace start
    /// when logged.
    pub timestamp_ns: u64,
    pub tid: u64,
    pub payload: Payload,
}

impl Entry {
    pub fn new(
        entry_type: EntryType,
        group_id: Option<TraceId>,
        time: EventTime,
        payload: Payload,
    ) -> Self {
        Self {
            entry_type,
            group_id,
            timestamp_ns: time.uptime_ns,
            tid: time.tid,
            payload,
        }
    }

    pub fn trace_start(trace_id: TraceId, time: EventTime, metadata: TraceMetadata) -> Self {
        Self::new(
            EntryType::TraceStart,
            Some(trace_id),
            time,
            Payload::TraceMetadata(metadata),
        )
    }

    pub fn trace_end(trace_id: TraceId, time: EventTime) -> Self {
        Self::new(EntryType::TraceEnd, Some(trace_id), time, Payload::None)
    }

    pub fn trace_failure(trace_id: TraceId, time: EventTime, error: TraceError) -> Self {
        Self::new(
            EntryType::TraceFailure,
            Some(trace_id),
            time,
            Payload::Error(error),
        )
    }

    pub fn trace_annotation(trace_id: TraceId, time: EventTime, annotation: Annotation) -> Self {
        Self::new(
            EntryType::TraceAnnotation,
            Some(trace_id),
            time,
            Payload::Annotation(annotation),
        )
    }

    pub fn span_start(span_id: SpanId, time: EventTime, name: impl Into<String>) -> Self {
        Self::new(
            EntryType::SpanStart,
            Some(span_id),
            time,
            Payload::SpanMetadata(SpanMetadata { name: name.into() }),
        )
    }

    pub fn span_end(span_id: SpanId, time: EventTime) -> Self {
        Self::new(EntryType::SpanEnd, Some(span_id), time, Payload::None)
    }

    pub fn span_annotation(span_id: SpanId, time: EventTime, annotation: Annotation) -> Self {
        Self::new(
            EntryType::SpanAnnotation,
            Some(span_id),
            time,
            Payload::Annotation(annotation),
        )
    }

    pub fn app_info(time: EventTime, app_info: AppInfo) -> Self {
        Self::new(EntryType::AppInfo, None, time, Payload::AppInfo(app_info))
    }

    pub fn backtrace(time: EventTime, backtrace: Backtrace) -> Self {
        Self::new(
            EntryType::Backtrace,
            None,
            time,
            Payload::Backtrace(backtrace),
        )
    }

    pub fn ringbuffer_metrics(time: EventTime, dropped_packets: u32) -> Self {
        Self::new(
            EntryType::RingbufferMetrics,
            None,
            time,
            Payload::RingBufferMetrics(RingBufferMetrics { dropped_packets }),
        )
    }

    pub fn log(time: EventTime, message: impl Into<String>) -> Self {
        Self::new(EntryType::Log, None, time, Payload::Message(message.into()))
    }

    pub fn error(&self) -> Option<&TraceError> {
        match &self.payload {
            Payload::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn annotation(&self) -> Option<&Annotation> {
        match &self.payload {
            Payload::Annotation(annotation) => Some(annotation),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}
