// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::ring_buffer::MAX_SLOTS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_SLOT_COUNT: usize = 1000;
pub const DEFAULT_REASSEMBLY_POOL_CAPACITY: usize = 8;
pub const DEFAULT_CONSUMER_THREAD_NAME: &str = "dd-trace-consumer";

/// Sizing of the pipeline owned by a [`TraceController`](crate::TraceController).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Packets the ring buffer holds at once.
    slot_count: usize,
    reassembly_pool_capacity: usize,
    consumer_thread_name: String,
}

impl CollectorConfig {
    pub fn new(
        slot_count: usize,
        reassembly_pool_capacity: usize,
        consumer_thread_name: Option<String>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            (1..=MAX_SLOTS).contains(&slot_count),
            "Slot count must be between 1 and {MAX_SLOTS}, got {slot_count}"
        );
        let consumer_thread_name =
            consumer_thread_name.unwrap_or_else(|| DEFAULT_CONSUMER_THREAD_NAME.to_owned());
        anyhow::ensure!(
            !consumer_thread_name.contains('\0'),
            "Thread name {consumer_thread_name:?} contains a null byte"
        );
        Ok(Self {
            slot_count,
            reassembly_pool_capacity,
            consumer_thread_name,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn reassembly_pool_capacity(&self) -> usize {
        self.reassembly_pool_capacity
    }

    pub fn consumer_thread_name(&self) -> &str {
        &self.consumer_thread_name
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            reassembly_pool_capacity: DEFAULT_REASSEMBLY_POOL_CAPACITY,
            consumer_thread_name: DEFAULT_CONSUMER_THREAD_NAME.to_owned(),
        }
    }
}

/// What a single trace collects. Plugins consult it to decide whether they
/// take part in a trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfiguration {
    /// Deadline after which the caller is expected to time the trace out.
    timeout: Option<Duration>,
    /// Interval between stack samples, sampling is off when unset.
    backtrace_interval: Option<Duration>,
    features: BTreeSet<String>,
}

impl TraceConfiguration {
    pub fn new(
        timeout: Option<Duration>,
        backtrace_interval: Option<Duration>,
        features: impl IntoIterator<Item = String>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            timeout.map_or(true, |t| !t.is_zero()),
            "Trace timeout must not be zero"
        );
        anyhow::ensure!(
            backtrace_interval.map_or(true, |i| !i.is_zero()),
            "Backtrace sampling interval must not be zero"
        );
        Ok(Self {
            timeout,
            backtrace_interval,
            features: features.into_iter().collect(),
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn backtrace_interval(&self) -> Option<Duration> {
        self.backtrace_interval
    }

    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }
}
