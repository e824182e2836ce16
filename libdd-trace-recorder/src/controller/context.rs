// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::buffer_consumer::TraceSink;
use crate::ids::{AnnotationId, SpanId, TraceId};
use crate::plugin::Plugin;
use crate::trace_logger::TraceLogger;
use std::sync::Arc;

pub(super) struct Span {
    pub id: SpanId,
    pub name: String,
}

/// State of the active trace.
pub(super) struct TraceContext {
    pub id: TraceId,
    pub interaction_name: String,
    pub sink: Arc<dyn TraceSink>,
    pub state_logger: Arc<TraceLogger>,
    pub plugin_loggers: Vec<(Arc<dyn Plugin>, Arc<TraceLogger>)>,
    spans: Vec<Span>,
    last_annotation_id: AnnotationId,
}

impl TraceContext {
    pub fn new(
        id: TraceId,
        interaction_name: String,
        sink: Arc<dyn TraceSink>,
        state_logger: Arc<TraceLogger>,
        plugin_loggers: Vec<(Arc<dyn Plugin>, Arc<TraceLogger>)>,
    ) -> Self {
        Self {
            id,
            interaction_name,
            sink,
            state_logger,
            plugin_loggers,
            spans: Vec::new(),
            last_annotation_id: 0,
        }
    }

    pub fn next_annotation_id(&mut self) -> AnnotationId {
        self.last_annotation_id += 1;
        self.last_annotation_id
    }

    pub fn push_span(&mut self, name: String) -> SpanId {
        let id = SpanId::new();
        self.spans.push(Span { id, name });
        id
    }

    /// Removes the most recently started span matching `predicate`.
    pub fn pop_span(&mut self, predicate: impl Fn(&Span) -> bool) -> Option<Span> {
        let pos = self.spans.iter().rposition(predicate)?;
        Some(self.spans.remove(pos))
    }

    /// The most recently started span matching `predicate`.
    pub fn find_span(&self, predicate: impl Fn(&Span) -> bool) -> Option<&Span> {
        self.spans.iter().rev().find(|span| predicate(span))
    }

    #[cfg(test)]
    pub fn open_spans(&self) -> usize {
        self.spans.len()
    }
}
