// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lock-free multi-producer/single-consumer ring buffer.
//!
//! Producers reserve a contiguous range of slots with a CAS on the `next`
//! offset, fill it in place and publish it by clearing their `seen_off`
//! marker. The consumer never observes a range that a producer has reserved
//! but not yet published: the smallest in-flight `seen_off` caps what it may
//! read.
//!
//! Offsets are slot indices stored in the low 32 bits of a `u64`. The upper
//! bits of `next` carry a wrap-around counter, which prevents an ABA on the
//! CAS, and a lock bit held while a producer that wraps to the head of the
//! arena records the old tail in `end`.
//!
//! A range that does not fit at the physical tail wraps early to the head,
//! provided it does not overlap data the consumer has not released yet.
//! Nothing here blocks or retries: a reservation that does not fit fails and
//! bumps the drop counter.

use crate::error::RingBufferError;
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const WRAP_LOCK_BIT: u64 = 0x8000_0000_0000_0000;
const OFF_MASK: u64 = 0x0000_0000_ffff_ffff;
const OFF_MAX: u64 = u64::MAX & !WRAP_LOCK_BIT;
const WRAP_COUNTER: u64 = 0x7fff_ffff_0000_0000;

/// Largest slot count a ring can be created with. One spare slot is kept to
/// tell a full arena apart from an empty one.
pub const MAX_SLOTS: usize = (OFF_MASK - 1) as usize;

const _: () = assert!(OFF_MAX & WRAP_LOCK_BIT == 0);
const _: () = assert!(WRAP_COUNTER & OFF_MASK == 0);

#[inline]
fn wrap_incr(counter: u64) -> u64 {
    counter.wrapping_add(0x1_0000_0000) & WRAP_COUNTER
}

struct Worker {
    /// Offset this producer is writing at, `OFF_MAX` when idle. Carries
    /// `WRAP_LOCK_BIT` while the reservation is not settled.
    seen_off: AtomicU64,
    registered: AtomicBool,
    /// Set while a thread is inside `produce` on this worker.
    busy: AtomicBool,
}

impl Worker {
    fn new() -> Self {
        Self {
            seen_off: AtomicU64::new(OFF_MAX),
            registered: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        }
    }
}

/// Bounded MPSC queue of `T` slots.
///
/// Share it behind an [`Arc`], hand each writer a [`Producer`] obtained from
/// [`RingBuffer::register_producer`], and drain it from a single thread with
/// [`RingBuffer::consume`].
pub struct RingBuffer<T> {
    /// Number of slots in the arena, including the spare one.
    space: u64,
    next: CachePadded<AtomicU64>,
    end: AtomicU64,
    written: CachePadded<AtomicU64>,
    consuming: AtomicBool,
    drop_count: AtomicU32,
    workers: Box<[CachePadded<Worker>]>,
    slots: Box<[UnsafeCell<T>]>,
}

// SAFETY: slots are only written by the producer holding the reservation
// covering them and only read by the consumer once that reservation is
// published. `consuming` rejects concurrent consumers.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Copy + Default> RingBuffer<T> {
    /// Creates a ring able to hold `n_slots` items written by up to
    /// `n_producers` registered producers.
    pub fn new(n_producers: usize, n_slots: usize) -> Result<Self, RingBufferError> {
        if n_producers == 0 {
            return Err(RingBufferError::NoProducers);
        }
        if n_slots == 0 {
            return Err(RingBufferError::NoSlots);
        }
        if n_slots > MAX_SLOTS {
            return Err(RingBufferError::TooManySlots(n_slots));
        }
        let space = n_slots + 1;
        Ok(Self {
            space: space as u64,
            next: CachePadded::new(AtomicU64::new(0)),
            end: AtomicU64::new(OFF_MAX),
            written: CachePadded::new(AtomicU64::new(0)),
            consuming: AtomicBool::new(false),
            drop_count: AtomicU32::new(0),
            workers: (0..n_producers)
                .map(|_| CachePadded::new(Worker::new()))
                .collect(),
            slots: (0..space).map(|_| UnsafeCell::new(T::default())).collect(),
        })
    }
}

impl<T> RingBuffer<T> {
    /// Number of items the ring can hold at once.
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn max_producers(&self) -> usize {
        self.workers.len()
    }

    /// Claims a free producer slot. The slot is returned to the ring when the
    /// [`Producer`] is dropped.
    pub fn register_producer(self: &Arc<Self>) -> Result<Producer<T>, RingBufferError> {
        for (index, worker) in self.workers.iter().enumerate() {
            if worker
                .registered
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                worker.seen_off.store(OFF_MAX, Ordering::SeqCst);
                return Ok(Producer {
                    ring: self.clone(),
                    index,
                });
            }
        }
        Err(RingBufferError::ProducersExhausted(self.workers.len()))
    }

    /// Drains the next contiguous chunk of published items.
    ///
    /// `drain` reports how many items of the chunk it processed; those are
    /// released and the remainder stays available for the next call. `drain`
    /// is not invoked when nothing is available. Returns the number of items
    /// released.
    ///
    /// Only one thread may consume at a time; a call racing with another
    /// consumer returns 0 without touching the ring.
    pub fn consume<F>(&self, drain: F) -> usize
    where
        F: FnOnce(&[T]) -> usize,
    {
        if self.consuming.swap(true, Ordering::Acquire) {
            debug!("Concurrent ring buffer consumer rejected");
            return 0;
        }
        let released = match self.peek() {
            Some((offset, len)) => {
                // SAFETY: `peek` only returns published ranges, which no
                // producer writes to until they are released below.
                let chunk = unsafe {
                    std::slice::from_raw_parts(
                        UnsafeCell::raw_get(self.slots.as_ptr().add(offset)),
                        len,
                    )
                };
                let processed = drain(chunk).min(len);
                self.release(processed);
                processed
            }
            None => 0,
        };
        self.consuming.store(false, Ordering::Release);
        released
    }

    /// Discards every published item.
    pub fn clear(&self) {
        while self.consume(|chunk| chunk.len()) > 0 {}
    }

    pub fn drop_count(&self) -> u32 {
        self.drop_count.load(Ordering::Relaxed)
    }

    pub fn increment_drop_counter(&self) {
        let _ = self
            .drop_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                count.checked_add(1)
            });
    }

    pub fn reset_drop_counter(&self) {
        self.drop_count.store(0, Ordering::Relaxed);
    }

    fn stable_next(&self) -> u64 {
        let backoff = Backoff::new();
        loop {
            let next = self.next.load(Ordering::SeqCst);
            if next & WRAP_LOCK_BIT == 0 {
                return next;
            }
            backoff.snooze();
        }
    }

    /// Reserves `len` contiguous slots for `worker`, returning the offset of
    /// the first one.
    fn acquire(&self, worker: &Worker, len: u64) -> Option<u64> {
        let mut seen;
        let mut next;
        let mut target;
        loop {
            seen = self.stable_next();
            next = seen & OFF_MASK;
            worker
                .seen_off
                .store(next | WRAP_LOCK_BIT, Ordering::SeqCst);

            target = next + len;
            let written = self.written.load(Ordering::SeqCst);
            if next < written && target >= written {
                // Would overrun the consumer.
                worker.seen_off.store(OFF_MAX, Ordering::Release);
                return None;
            }

            if target >= self.space {
                let exceed = target > self.space;
                target = if exceed { WRAP_LOCK_BIT | len } else { 0 };
                if target & OFF_MASK >= written {
                    worker.seen_off.store(OFF_MAX, Ordering::Release);
                    return None;
                }
                target |= wrap_incr(seen & WRAP_COUNTER);
            } else {
                target |= seen & WRAP_COUNTER;
            }

            if self
                .next
                .compare_exchange_weak(seen, target, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        worker.seen_off.store(next, Ordering::SeqCst);

        if target & WRAP_LOCK_BIT != 0 {
            // The range did not fit at the tail: remember where the tail data
            // ends and hand out the head of the arena instead.
            self.end.store(next, Ordering::SeqCst);
            next = 0;
            self.next.store(target & !WRAP_LOCK_BIT, Ordering::Release);
        }
        Some(next)
    }

    /// Returns the offset and length of the next readable chunk.
    fn peek(&self) -> Option<(usize, usize)> {
        loop {
            let written = self.written.load(Ordering::SeqCst);
            let next = self.stable_next() & OFF_MASK;
            if written == next {
                return None;
            }

            // The smallest offset still being written, ignoring producers
            // that already wrapped behind `written`.
            let mut ready = OFF_MAX;
            for worker in self.workers.iter() {
                if !worker.registered.load(Ordering::Relaxed) {
                    continue;
                }
                let backoff = Backoff::new();
                let seen_off = loop {
                    let seen_off = worker.seen_off.load(Ordering::SeqCst);
                    if seen_off & WRAP_LOCK_BIT == 0 {
                        break seen_off;
                    }
                    backoff.snooze();
                };
                if seen_off >= written {
                    ready = ready.min(seen_off);
                }
            }

            if next < written {
                let end = self.end.load(Ordering::SeqCst).min(self.space);
                if ready == OFF_MAX && written == end {
                    // Tail fully consumed: continue from the head.
                    self.end.store(OFF_MAX, Ordering::SeqCst);
                    self.written.store(0, Ordering::SeqCst);
                    continue;
                }
                ready = ready.min(end);
            } else {
                ready = ready.min(next);
            }

            let len = ready.saturating_sub(written);
            return (len > 0).then_some((written as usize, len as usize));
        }
    }

    fn release(&self, count: usize) {
        let written = self.written.load(Ordering::SeqCst) + count as u64;
        let written = if written == self.space { 0 } else { written };
        self.written.store(written, Ordering::SeqCst);
    }
}

/// Write handle onto a [`RingBuffer`], one per writer identity.
pub struct Producer<T> {
    ring: Arc<RingBuffer<T>>,
    index: usize,
}

impl<T> Producer<T> {
    /// Reserves `count` contiguous slots, lets `fill` populate them and
    /// publishes them as one message.
    ///
    /// Returns false without blocking when no contiguous range of that size is
    /// free, or when another thread is producing through this same handle.
    /// Every failure increments the ring's drop counter.
    pub fn produce<F>(&self, count: usize, fill: F) -> bool
    where
        F: FnOnce(&mut [T]),
    {
        let ring = &*self.ring;
        let worker = &ring.workers[self.index];
        if count == 0 || count as u64 >= ring.space {
            ring.increment_drop_counter();
            return false;
        }
        if worker.busy.swap(true, Ordering::Acquire) {
            ring.increment_drop_counter();
            return false;
        }

        let produced = match ring.acquire(worker, count as u64) {
            Some(offset) => {
                // SAFETY: the reservation makes [offset, offset + count) ours
                // until `seen_off` is cleared below.
                let slots = unsafe {
                    std::slice::from_raw_parts_mut(
                        UnsafeCell::raw_get(ring.slots.as_ptr().add(offset as usize)),
                        count,
                    )
                };
                fill(slots);
                worker.seen_off.store(OFF_MAX, Ordering::SeqCst);
                true
            }
            None => false,
        };

        worker.busy.store(false, Ordering::Release);
        if !produced {
            ring.increment_drop_counter();
        }
        produced
    }

    pub fn ring(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        let worker = &self.ring.workers[self.index];
        worker.seen_off.store(OFF_MAX, Ordering::SeqCst);
        worker.registered.store(false, Ordering::Release);
    }
}
