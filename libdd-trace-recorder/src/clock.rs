// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Timestamps and thread ids stamped on records.
//!
//! Collaborators that build records themselves (stack samplers, crash
//! handlers) must use [`uptime_ns`] so their timestamps compare with the
//! reference time of the trace loggers.

/// Nanoseconds on the monotonic clock.
#[cfg(unix)]
pub fn uptime_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out pointer and CLOCK_MONOTONIC always exists.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return fallback_uptime_ns();
    }
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64)
}

#[cfg(not(unix))]
pub fn uptime_ns() -> u64 {
    fallback_uptime_ns()
}

fn fallback_uptime_ns() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static BASE: OnceLock<Instant> = OnceLock::new();
    let elapsed = BASE.get_or_init(Instant::now).elapsed();
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

/// OS id of the calling thread.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn current_tid() -> u64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

/// OS id of the calling thread.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn current_tid() -> u64 {
    let mut tid = 0u64;
    // SAFETY: a null thread designates the calling thread, `tid` is a valid
    // out pointer.
    let rc = unsafe { libc::pthread_threadid_np(0 as libc::pthread_t, &mut tid) };
    if rc != 0 {
        return fallback_tid();
    }
    tid
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub fn current_tid() -> u64 {
    fallback_tid()
}

#[cfg_attr(any(target_os = "linux", target_os = "android"), allow(dead_code))]
fn fallback_tid() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TID.with(|tid| *tid)
}

/// When and on which thread an event happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventTime {
    pub uptime_ns: u64,
    pub tid: u64,
}

impl EventTime {
    pub fn now() -> Self {
        Self {
            uptime_ns: uptime_ns(),
            tid: current_tid(),
        }
    }

    pub fn new(uptime_ns: u64, tid: u64) -> Self {
        Self { uptime_ns, tid }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_is_monotonic() {
        let a = uptime_ns();
        let b = uptime_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_tid_differs_between_threads() {
        let here = current_tid();
        assert_eq!(here, current_tid());
        let there = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(here, there);
    }
}
