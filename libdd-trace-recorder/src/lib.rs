// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! On-device collection pipeline for profiling traces.
//!
//! Data flows from instrumentation through a [`TraceLogger`], which fragments
//! each serialized [`Entry`] into fixed-size [`Packet`]s and publishes them on a
//! lock-free multi-producer/single-consumer [`RingBuffer`]. A single background
//! [`TraceBufferConsumer`] drains the ring, reassembles the packets with an
//! [`EntryParser`] and forwards every complete record to a [`TraceSink`].
//!
//! The [`TraceController`] owns the ring and drives the trace, span and
//! annotation lifecycle, fanning out to the registered [`Plugin`]s.

pub mod buffer_consumer;
pub mod clock;
pub mod config;
pub mod controller;
pub mod entry;
pub mod entry_parser;
pub mod error;
pub mod global_state;
pub mod ids;
pub mod observer;
pub mod packet;
pub mod plugin;
pub mod ring_buffer;
mod sync;
pub mod trace_logger;

pub use buffer_consumer::{LoopState, SinkSlot, TraceBufferConsumer, TraceSink};
pub use clock::EventTime;
pub use config::{CollectorConfig, TraceConfiguration};
pub use controller::TraceController;
pub use entry::{Entry, EntryType, ErrorCode, Payload, TraceError};
pub use entry_parser::EntryParser;
pub use error::{LogError, RingBufferError};
pub use global_state::{GlobalConfiguration, GlobalState, GlobalStateObserver};
pub use ids::TraceId;
pub use observer::TraceEventObserver;
pub use packet::{Packet, PacketReader, PacketWriter};
pub use plugin::{Plugin, PluginRegistry};
pub use ring_buffer::{Producer, RingBuffer};
pub use trace_logger::TraceLogger;
