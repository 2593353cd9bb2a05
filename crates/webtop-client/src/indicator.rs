//! Busy-indicator registrations
//!
//! A registration is created when a call with visible progress starts and
//! removed when its [`BusyGuard`] drops, so success, failure, cancellation
//! and panics all release it exactly once.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

/// Receives indicator lifecycle callbacks (e.g. a spinner in the UI)
pub trait IndicatorSink: Send + Sync {
    fn started(&self, label: &str);
    fn finished(&self, label: &str);
}

/// Registry of in-flight calls showing a busy indicator, keyed by call label
#[derive(Clone, Default)]
pub struct BusyIndicator {
    active: Arc<DashMap<String, Instant>>,
    sink: Option<Arc<dyn IndicatorSink>>,
}

impl BusyIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn IndicatorSink>) -> Self {
        Self {
            active: Arc::new(DashMap::new()),
            sink: Some(sink),
        }
    }

    /// Register a call; the registration lives as long as the guard
    pub fn begin(&self, label: &str) -> BusyGuard {
        self.active.insert(label.to_string(), Instant::now());
        if let Some(sink) = &self.sink {
            sink.started(label);
        }
        BusyGuard {
            label: label.to_string(),
            indicator: self.clone(),
        }
    }

    /// Number of live registrations
    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, label: &str) -> bool {
        self.active.contains_key(label)
    }

    fn finish(&self, label: &str) {
        if let Some((_, started)) = self.active.remove(label) {
            debug!("{} finished after {:?}", label, started.elapsed());
            if let Some(sink) = &self.sink {
                sink.finished(label);
            }
        }
    }
}

/// Live busy-indicator registration
pub struct BusyGuard {
    label: String,
    indicator: BusyIndicator,
}

impl BusyGuard {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.indicator.finish(&self.label);
    }
}
