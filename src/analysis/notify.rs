//! Notifications for the presentation layer.
//!
//! [`Notifier`] wraps a [`broadcast::Sender`] so that any number of
//! presenters can follow a run. Every user-facing log line is mirrored to
//! `tracing` as well.

use crate::error::{EngineError, FailureCause};
use crate::models::{Descriptor, ExecutionState, ExpectedRows, Severity};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Default buffer capacity for the notification channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A line in the user-facing run log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub message: String,
    pub severity: Severity,
    pub cause: Option<FailureCause>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Info,
            cause: None,
            timestamp: Utc::now(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::info(message)
        }
    }

    pub fn error(message: impl Into<String>, cause: Option<FailureCause>) -> Self {
        Self {
            severity: Severity::Error,
            cause,
            ..Self::info(message)
        }
    }
}

/// Terminal outcome as shown to the presentation layer.
#[derive(Debug, Clone)]
pub enum TerminalState {
    Succeeded,
    Cancelled,
    Failed(FailureCause),
}

impl TerminalState {
    pub fn execution_state(&self) -> ExecutionState {
        match self {
            TerminalState::Succeeded => ExecutionState::Succeeded,
            TerminalState::Cancelled => ExecutionState::Cancelled,
            TerminalState::Failed(_) => ExecutionState::Failed,
        }
    }
}

/// Everything the presentation layer is told about a run.
#[derive(Debug, Clone)]
pub enum Notification {
    Log(LogEntry),
    Progress {
        table: String,
        current: u64,
        expected: ExpectedRows,
    },
    TableFinished {
        table: String,
    },
    ResultCollectionCreated {
        descriptor: Descriptor,
        display_name: String,
        icon: String,
    },
    /// Bring the first result collection to the front.
    SurfaceFirstResult {
        descriptor: Option<Descriptor>,
    },
    /// Internal invariant violations and rejected engine input.
    Diagnostic(EngineError),
    Terminal(TerminalState),
}

/// Fan-out of [`Notification`]s to presenters.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    /// Create a notifier with a specific buffer capacity.
    ///
    /// Slow subscribers observe `RecvError::Lagged` once the buffer fills.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(notification);
    }

    /// Publish a log line and mirror it to tracing.
    pub fn log(&self, entry: LogEntry) {
        match (entry.severity, &entry.cause) {
            (Severity::Info, _) => info!("{}", entry.message),
            (Severity::Warning, _) => warn!("{}", entry.message),
            (Severity::Error, Some(cause)) => error!(cause = %cause, "{}", entry.message),
            (Severity::Error, None) => error!("{}", entry.message),
        }
        self.publish(Notification::Log(entry));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
