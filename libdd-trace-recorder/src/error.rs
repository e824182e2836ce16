// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("ring buffer needs at least one slot")]
    NoSlots,
    #[error("ring buffer slot count {0} exceeds the addressable maximum {max}", max = crate::ring_buffer::MAX_SLOTS)]
    TooManySlots(usize),
    #[error("ring buffer needs at least one producer")]
    NoProducers,
    #[error("all {0} producer slots are registered")]
    ProducersExhausted(usize),
}

/// Why a record did not reach the ring buffer.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("serialized record is {size} bytes, above the {max} byte limit")]
    Oversized { size: usize, max: usize },
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),
    #[error("no room left in the ring buffer")]
    BufferFull,
}
