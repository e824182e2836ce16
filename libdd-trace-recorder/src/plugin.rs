// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::TraceConfiguration;
use crate::entry::TraceError;
use crate::trace_logger::TraceLogger;
use std::sync::Arc;

/// A data source taking part in traces.
///
/// Callbacks run with the controller lock held and must not call back into
/// the [`TraceController`](crate::TraceController).
pub trait Plugin: Send + Sync {
    /// Whether the plugin takes part in traces using `config`.
    fn should_enable(&self, config: &TraceConfiguration) -> bool;

    /// A trace started. `logger` stays valid until `end` or `abort` returns.
    fn start(&self, logger: Arc<TraceLogger>, config: &TraceConfiguration);

    /// The trace completed successfully.
    fn end(&self, logger: Arc<TraceLogger>);

    /// The trace failed.
    fn abort(&self, error: &TraceError);
}

/// The plugins known to a controller, in registration order.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// Indices and plugins enabled by `config`.
    pub fn enabled_for<'a>(
        &'a self,
        config: &'a TraceConfiguration,
    ) -> impl Iterator<Item = (usize, &'a Arc<dyn Plugin>)> + 'a {
        self.plugins
            .iter()
            .enumerate()
            .filter(move |(_, plugin)| plugin.should_enable(config))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl FromIterator<Arc<dyn Plugin>> for PluginRegistry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Plugin>>>(iter: I) -> Self {
        Self {
            plugins: iter.into_iter().collect(),
        }
    }
}
