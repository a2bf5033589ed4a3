//! Analysis monitoring.
//!
//! Everything between the job engine's event stream and the presentation
//! layer: progress, error classification, result aggregation, event
//! dispatch and the coordinator that ties one run together.

pub mod aggregator;
pub mod classifier;
pub mod coordinator;
pub mod dispatcher;
pub mod listeners;
pub mod notify;
pub mod progress;

pub use aggregator::{ResultAggregator, ResultCollection};
pub use classifier::{Classification, ErrorClassifier};
pub use coordinator::{JobExecutionCoordinator, RendererFactory, RunOutcome};
pub use dispatcher::{AnalysisEventDispatcher, LogPhase};
pub use listeners::{AnalysisListener, ListenerRegistry, TracingListener};
pub use notify::{LogEntry, Notification, Notifier, TerminalState};
pub use progress::ProgressTracker;
