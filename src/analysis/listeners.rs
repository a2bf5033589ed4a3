//! Extra observers of the raw engine event stream.
//!
//! A [`ListenerRegistry`] is built by the caller and handed to the
//! coordinator; it lives and dies with that coordinator.

use crate::engine::AnalysisEvent;
use std::sync::Arc;
use tracing::debug;

/// Observer of engine events. Called from the event consumer task, just
/// before the dispatcher applies the event.
pub trait AnalysisListener: Send + Sync {
    fn on_event(&self, event: &AnalysisEvent);
}

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Vec<Arc<dyn AnalysisListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn AnalysisListener>) {
        self.listeners.push(listener);
    }

    pub fn with(mut self, listener: Arc<dyn AnalysisListener>) -> Self {
        self.register(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify(&self, event: &AnalysisEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Traces every engine event at debug level.
#[derive(Debug, Default)]
pub struct TracingListener;

impl AnalysisListener for TracingListener {
    fn on_event(&self, event: &AnalysisEvent) {
        match event {
            AnalysisEvent::RowProcessingProgress { table, row } => {
                debug!(event = event.name(), table = %table, row, "Engine event");
            }
            AnalysisEvent::ComponentBegin { component }
            | AnalysisEvent::ComponentSuccess { component, .. }
            | AnalysisEvent::ComponentError { component, .. } => {
                debug!(event = event.name(), component = component.label(), "Engine event");
            }
            _ => debug!(event = event.name(), "Engine event"),
        }
    }
}
