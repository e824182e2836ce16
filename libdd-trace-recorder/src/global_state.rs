// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide switches shared by every controller.
//!
//! A single `GlobalState` is created during process setup and handed to each
//! [`TraceController`](crate::TraceController), which subscribes to it.

use crate::sync::MutexExt;
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfiguration {
    pub enabled: bool,
}

pub trait GlobalStateObserver: Send + Sync {
    /// An exception escaped into the tracing code, everything in flight must
    /// be abandoned.
    fn exception_killswitch_raised(&self);

    /// The global configuration was replaced. `None` means no configuration
    /// is available.
    fn configuration_changed(&self, configuration: Option<&GlobalConfiguration>);
}

#[derive(Default)]
pub struct GlobalState {
    exception_killswitch: AtomicBool,
    configuration: ArcSwapOption<GlobalConfiguration>,
    observers: Mutex<Vec<Weak<dyn GlobalStateObserver>>>,
}

impl GlobalState {
    pub fn new(configuration: Option<GlobalConfiguration>) -> Self {
        Self {
            exception_killswitch: AtomicBool::new(false),
            configuration: ArcSwapOption::from(configuration.map(Arc::new)),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Observers are held weakly. Dropped ones are pruned on the next
    /// subscription or notification.
    pub fn subscribe(&self, observer: Weak<dyn GlobalStateObserver>) {
        let mut observers = self.observers.lock_or_panic();
        observers.retain(|o| o.strong_count() > 0);
        observers.push(observer);
    }

    #[cfg(test)]
    fn observer_count(&self) -> usize {
        self.observers.lock_or_panic().len()
    }

    pub fn configuration(&self) -> Option<Arc<GlobalConfiguration>> {
        self.configuration.load_full()
    }

    pub fn set_configuration(&self, configuration: Option<GlobalConfiguration>) {
        let configuration = configuration.map(Arc::new);
        self.configuration.store(configuration.clone());
        self.notify(|o| o.configuration_changed(configuration.as_deref()));
    }

    pub fn is_exception_killswitch_raised(&self) -> bool {
        self.exception_killswitch.load(Ordering::Acquire)
    }

    /// Raises the kill-switch. Observers are only told the first time.
    pub fn raise_exception_killswitch(&self) {
        if self.exception_killswitch.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!("Exception kill-switch raised, aborting active traces");
        self.notify(|o| o.exception_killswitch_raised());
    }

    /// Tracing may run: a configuration enables it and the kill-switch is down.
    pub fn is_tracing_enabled(&self) -> bool {
        !self.is_exception_killswitch_raised()
            && self
                .configuration()
                .is_some_and(|config| config.enabled)
    }

    fn notify(&self, f: impl Fn(&dyn GlobalStateObserver)) {
        let live: Vec<Arc<dyn GlobalStateObserver>> = {
            let mut observers = self.observers.lock_or_panic();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            f(observer.as_ref());
        }
    }
}
