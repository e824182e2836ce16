// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::entry::TraceError;
use crate::ids::TraceId;
use crate::sync::MutexExt;
use std::sync::{Arc, Mutex, Weak};

/// Receives trace lifecycle transitions. Called outside the controller lock.
pub trait TraceEventObserver: Send + Sync {
    fn trace_started(&self, trace_id: TraceId);
    fn trace_ended(&self, trace_id: TraceId);
    fn trace_failed(&self, trace_id: TraceId, error: &TraceError);
}

/// Weakly held observers. Observers that were dropped are pruned on the next
/// notification.
#[derive(Default)]
pub(crate) struct TraceEventSubject {
    observers: Mutex<Vec<Weak<dyn TraceEventObserver>>>,
}

impl TraceEventSubject {
    pub fn add(&self, observer: &Arc<dyn TraceEventObserver>) {
        self.observers.lock_or_panic().push(Arc::downgrade(observer));
    }

    pub fn remove(&self, observer: &Arc<dyn TraceEventObserver>) {
        let target = Arc::downgrade(observer);
        self.observers
            .lock_or_panic()
            .retain(|o| !Weak::ptr_eq(o, &target) && o.strong_count() > 0);
    }

    pub fn trace_started(&self, trace_id: TraceId) {
        self.for_each(|o| o.trace_started(trace_id));
    }

    pub fn trace_ended(&self, trace_id: TraceId) {
        self.for_each(|o| o.trace_ended(trace_id));
    }

    pub fn trace_failed(&self, trace_id: TraceId, error: &TraceError) {
        self.for_each(|o| o.trace_failed(trace_id, error));
    }

    fn for_each(&self, f: impl Fn(&dyn TraceEventObserver)) {
        let live: Vec<Arc<dyn TraceEventObserver>> = {
            let mut observers = self.observers.lock_or_panic();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            f(observer.as_ref());
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.observers.lock_or_panic().len()
    }
}
