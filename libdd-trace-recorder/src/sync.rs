// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Condvar, Mutex, MutexGuard};

pub(crate) trait MutexExt<T> {
    fn lock_or_panic(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[inline(always)]
    #[track_caller]
    fn lock_or_panic(&self) -> MutexGuard<'_, T> {
        #[allow(clippy::unwrap_used)]
        self.lock().unwrap()
    }
}

/// Blocks trace transitions until the consumer thread has drained the
/// records of the previous trace.
///
/// The barrier is armed by the thread finalizing a trace and released from
/// the consumer thread once its drain notification has been processed.
#[derive(Default)]
pub(crate) struct CompletionBarrier {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl CompletionBarrier {
    pub fn arm(&self) {
        *self.pending.lock_or_panic() = true;
    }

    pub fn release(&self) {
        *self.pending.lock_or_panic() = false;
        self.condvar.notify_all();
    }

    /// Waits until no drain is pending. Returns immediately when idle.
    pub fn wait(&self) {
        let pending = self.pending.lock_or_panic();
        #[allow(clippy::unwrap_used)]
        let _guard = self.condvar.wait_while(pending, |pending| *pending).unwrap();
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        *self.pending.lock_or_panic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wait_returns_when_idle() {
        let barrier = CompletionBarrier::default();
        barrier.wait();
        assert!(!barrier.is_pending());
    }

    #[test]
    fn wait_blocks_until_released() {
        let barrier = Arc::new(CompletionBarrier::default());
        barrier.arm();
        let releaser = {
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                barrier.release();
            })
        };
        barrier.wait();
        assert!(!barrier.is_pending());
        releaser.join().unwrap();
    }
}
