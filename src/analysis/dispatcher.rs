//! Translation of job engine events into monitor state.
//!
//! The dispatcher is driven by a single consumer task, so events are
//! applied one at a time in the order each producer sent them. Shared
//! state it touches (progress, results) is still safe to read
//! concurrently from other tasks.

use crate::analysis::aggregator::ResultAggregator;
use crate::analysis::classifier::{Classification, ErrorClassifier};
use crate::analysis::notify::{LogEntry, Notification, Notifier, TerminalState};
use crate::analysis::progress::ProgressTracker;
use crate::engine::AnalysisEvent;
use crate::error::{EngineError, FailureCause};
use crate::models::{AnalysisJob, AnalyzerResult, ComponentJob, ExpectedRows};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Phase of the user-facing run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPhase {
    Idle,
    Running,
    Finished,
}

pub struct AnalysisEventDispatcher {
    job: Arc<AnalysisJob>,
    tracker: Arc<ProgressTracker>,
    aggregator: Arc<ResultAggregator>,
    notifier: Notifier,
    classifier: ErrorClassifier,
    phase: LogPhase,
    suppressed_failure: bool,
    cancel_requested: Arc<AtomicBool>,
}

impl AnalysisEventDispatcher {
    pub fn new(
        job: Arc<AnalysisJob>,
        tracker: Arc<ProgressTracker>,
        aggregator: Arc<ResultAggregator>,
        notifier: Notifier,
    ) -> Self {
        Self {
            job,
            tracker,
            aggregator,
            notifier,
            classifier: ErrorClassifier,
            phase: LogPhase::Idle,
            suppressed_failure: false,
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share the run's cancellation flag. Once it is set, failures are
    /// treated as part of the cancellation and never reported as errors.
    pub fn with_cancel_flag(mut self, cancel_requested: Arc<AtomicBool>) -> Self {
        self.cancel_requested = cancel_requested;
        self
    }

    pub fn phase(&self) -> LogPhase {
        self.phase
    }

    /// Whether a job error was absorbed because an earlier failure had
    /// already been reported.
    pub fn saw_suppressed_failure(&self) -> bool {
        self.suppressed_failure
    }

    /// Apply one event. Returns the terminal state the run should move to,
    /// if the event ends the job.
    pub fn apply(&mut self, event: AnalysisEvent) -> Option<TerminalState> {
        match event {
            AnalysisEvent::JobBegin => {
                if self.phase == LogPhase::Idle {
                    self.phase = LogPhase::Running;
                    self.notifier.log(LogEntry::info("Analysis job started"));
                }
                None
            }
            AnalysisEvent::RowProcessingBegin {
                table,
                expected_rows,
            } => {
                self.on_row_processing_begin(&table, expected_rows);
                None
            }
            AnalysisEvent::RowProcessingProgress { table, row } => {
                self.on_row_processing_progress(&table, row);
                None
            }
            AnalysisEvent::RowProcessingSuccess { table } => {
                if let Some(state) = self.tracker.mark_finished(&table) {
                    self.notifier.publish(Notification::Progress {
                        table: table.clone(),
                        current: state.current_row,
                        expected: state.expected_rows,
                    });
                }
                self.notifier.publish(Notification::TableFinished {
                    table: table.clone(),
                });
                self.notifier.log(LogEntry::info(format!(
                    "Processing of {} finished. Generating results ...",
                    table
                )));
                None
            }
            AnalysisEvent::ComponentBegin { component } => {
                self.notifier.log(LogEntry::info(format!(
                    "Starting {} '{}'",
                    component.kind(),
                    component.label()
                )));
                None
            }
            AnalysisEvent::ComponentSuccess { component, result } => {
                self.on_component_success(component, result);
                None
            }
            AnalysisEvent::ComponentError {
                component,
                row,
                cause,
            } => {
                self.on_component_error(&component, row, cause);
                None
            }
            AnalysisEvent::JobSuccess => {
                self.phase = LogPhase::Finished;
                self.notifier
                    .log(LogEntry::info("Analysis job finished successfully"));
                self.notifier.publish(Notification::SurfaceFirstResult {
                    descriptor: self.aggregator.first_descriptor(),
                });
                Some(TerminalState::Succeeded)
            }
            AnalysisEvent::JobError { cause } => self.on_job_error(cause),
        }
    }

    fn on_row_processing_begin(&self, table: &str, expected_rows: ExpectedRows) {
        match expected_rows {
            ExpectedRows::Unknown => {
                self.notifier
                    .log(LogEntry::info(format!("Starting processing of {}", table)));
            }
            ExpectedRows::Known(expected) => {
                self.notifier.log(LogEntry::info(format!(
                    "Starting processing of {} (approx. {} rows)",
                    table, expected
                )));
                let state = self.tracker.set_expected_rows(table, expected);
                self.notifier.publish(Notification::Progress {
                    table: table.to_string(),
                    current: state.current_row,
                    expected: state.expected_rows,
                });
            }
        }
    }

    fn on_row_processing_progress(&self, table: &str, row: u64) {
        match self.tracker.update_progress(table, row) {
            Ok(Some(state)) => self.notifier.publish(Notification::Progress {
                table: table.to_string(),
                current: state.current_row,
                expected: state.expected_rows,
            }),
            Ok(None) => {}
            Err(e) => {
                warn!(table, row, "Rejected progress update: {}", e);
                self.notifier
                    .publish(Notification::Diagnostic(EngineError::Progress(e)));
            }
        }
    }

    fn on_component_success(&self, component: Arc<ComponentJob>, result: AnalyzerResult) {
        let table_name = self
            .job
            .component_table(&component)
            .map(|table| table.name.clone());

        let message = match &table_name {
            Some(table) => format!(
                "{} '{}' finished, adding result to tab of {}",
                capitalize(&component.kind().to_string()),
                component.label(),
                table
            ),
            None => {
                let diagnostic = EngineError::OriginatingTableUnresolved {
                    kind: component.kind(),
                    label: component.label().to_string(),
                };
                error!("{}", diagnostic);
                self.notifier.publish(Notification::Diagnostic(diagnostic));
                format!(
                    "{} '{}' finished, adding result",
                    capitalize(&component.kind().to_string()),
                    component.label()
                )
            }
        };

        self.aggregator.add_shared(component, result);
        self.notifier.log(LogEntry::info(message));
    }

    fn classify(&self, cause: &FailureCause) -> Classification {
        match self.classifier.classify(cause) {
            Classification::UserVisibleError if self.cancel_requested.load(Ordering::Acquire) => {
                Classification::Cancelled
            }
            classification => classification,
        }
    }

    fn on_component_error(&self, component: &ComponentJob, row: Option<u64>, cause: FailureCause) {
        match self.classify(&cause) {
            Classification::UserVisibleError => {
                let mut message = format!(
                    "An error occurred in the {}: {}",
                    component.kind(),
                    component.label()
                );
                if let Some(row) = row {
                    message.push_str(&format!(" (row {})", row));
                }
                self.notifier.log(LogEntry::error(message, Some(cause)));
            }
            Classification::Cancelled | Classification::Suppressed => {
                debug!(
                    component = component.label(),
                    "Not reporting component error: {}", cause
                );
            }
        }
    }

    fn on_job_error(&mut self, cause: FailureCause) -> Option<TerminalState> {
        match self.classify(&cause) {
            Classification::Cancelled => {
                if !matches!(cause, FailureCause::Cancelled) {
                    debug!("Job failed after cancellation was requested: {}", cause);
                }
                self.phase = LogPhase::Finished;
                self.notifier.log(LogEntry::info("Analysis job cancelled"));
                Some(TerminalState::Cancelled)
            }
            Classification::Suppressed => {
                self.suppressed_failure = true;
                None
            }
            Classification::UserVisibleError => {
                self.phase = LogPhase::Finished;
                self.notifier.log(LogEntry::error(
                    "An error occurred in the analysis job!",
                    Some(cause.clone()),
                ));
                Some(TerminalState::Failed(cause))
            }
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentKind, Descriptor, Severity, Table};
    use serde_json::json;
    use tokio::sync::broadcast;

    struct Fixture {
        dispatcher: AnalysisEventDispatcher,
        tracker: Arc<ProgressTracker>,
        aggregator: Arc<ResultAggregator>,
        rx: broadcast::Receiver<Notification>,
        a1: Arc<ComponentJob>,
        a2: Arc<ComponentJob>,
    }

    fn fixture() -> Fixture {
        let a1 = ComponentJob::new(
            Descriptor::new("String analyzer", ComponentKind::Analyzer),
            vec!["name".to_string()],
        )
        .named("A1");
        let a2 = ComponentJob::new(
            Descriptor::new("Number analyzer", ComponentKind::Analyzer),
            vec!["age".to_string()],
        )
        .named("A2");

        let job = Arc::new(AnalysisJob {
            tables: vec![Table::new(
                "T",
                vec!["name".to_string(), "age".to_string()],
                100,
            )],
            components: vec![a1.clone(), a2.clone()],
            ..Default::default()
        });

        let notifier = Notifier::default();
        let rx = notifier.subscribe();
        let tracker = Arc::new(ProgressTracker::new());
        let aggregator = Arc::new(ResultAggregator::new(notifier.clone()));
        let dispatcher = AnalysisEventDispatcher::new(
            job,
            Arc::clone(&tracker),
            Arc::clone(&aggregator),
            notifier,
        );

        Fixture {
            dispatcher,
            tracker,
            aggregator,
            rx,
            a1: Arc::new(a1),
            a2: Arc::new(a2),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn logs(notifications: &[Notification]) -> Vec<&LogEntry> {
        notifications
            .iter()
            .filter_map(|n| match n {
                Notification::Log(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_job_begin_sets_running_phase() {
        let mut f = fixture();
        assert_eq!(f.dispatcher.phase(), LogPhase::Idle);
        assert!(f.dispatcher.apply(AnalysisEvent::JobBegin).is_none());
        assert_eq!(f.dispatcher.phase(), LogPhase::Running);
    }

    #[test]
    fn test_unknown_expected_rows_only_logs() {
        let mut f = fixture();
        f.dispatcher.apply(AnalysisEvent::RowProcessingBegin {
            table: "T".to_string(),
            expected_rows: ExpectedRows::Unknown,
        });

        assert!(f.tracker.state_of("T").is_none());
        let notifications = drain(&mut f.rx);
        assert_eq!(notifications.len(), 1);
        assert_eq!(logs(&notifications)[0].message, "Starting processing of T");
    }

    #[test]
    fn test_known_expected_rows_tracks_table() {
        let mut f = fixture();
        f.dispatcher.apply(AnalysisEvent::RowProcessingBegin {
            table: "T".to_string(),
            expected_rows: ExpectedRows::Known(100),
        });

        let state = f.tracker.state_of("T").unwrap();
        assert_eq!(state.expected_rows, ExpectedRows::Known(100));
        let notifications = drain(&mut f.rx);
        assert!(logs(&notifications)[0].message.contains("approx. 100 rows"));
    }

    #[test]
    fn test_progress_regression_is_reported() {
        let mut f = fixture();
        f.dispatcher.apply(AnalysisEvent::RowProcessingBegin {
            table: "T".to_string(),
            expected_rows: ExpectedRows::Known(100),
        });
        f.dispatcher.apply(AnalysisEvent::RowProcessingProgress {
            table: "T".to_string(),
            row: 60,
        });
        drain(&mut f.rx);

        f.dispatcher.apply(AnalysisEvent::RowProcessingProgress {
            table: "T".to_string(),
            row: 20,
        });

        assert_eq!(f.tracker.state_of("T").unwrap().current_row, 60);
        let notifications = drain(&mut f.rx);
        assert!(matches!(
            notifications.as_slice(),
            [Notification::Diagnostic(EngineError::Progress(_))]
        ));
    }

    #[test]
    fn test_component_success_adds_result_and_names_table() {
        let mut f = fixture();
        f.dispatcher.apply(AnalysisEvent::ComponentSuccess {
            component: Arc::clone(&f.a1),
            result: AnalyzerResult::new(json!({"rows": 100})),
        });

        assert_eq!(f.aggregator.len(), 1);
        let notifications = drain(&mut f.rx);
        assert!(matches!(
            notifications[0],
            Notification::ResultCollectionCreated { .. }
        ));
        assert_eq!(
            logs(&notifications)[0].message,
            "Analyzer 'A1' finished, adding result to tab of T"
        );
    }

    #[test]
    fn test_unresolved_table_is_a_diagnostic() {
        let mut f = fixture();
        let orphan = Arc::new(
            ComponentJob::new(
                Descriptor::new("Orphan", ComponentKind::Analyzer),
                vec!["nowhere".to_string()],
            )
            .named("O"),
        );

        f.dispatcher.apply(AnalysisEvent::ComponentSuccess {
            component: orphan,
            result: AnalyzerResult::new(json!(null)),
        });

        let notifications = drain(&mut f.rx);
        assert!(notifications.iter().any(|n| matches!(
            n,
            Notification::Diagnostic(EngineError::OriginatingTableUnresolved { label, .. })
                if label == "O"
        )));
        assert_eq!(f.aggregator.len(), 1);
    }

    #[test]
    fn test_component_error_is_scoped() {
        let mut f = fixture();
        let terminal = f.dispatcher.apply(AnalysisEvent::ComponentError {
            component: Arc::clone(&f.a1),
            row: Some(7),
            cause: FailureCause::msg("bad value"),
        });

        assert!(terminal.is_none());
        let notifications = drain(&mut f.rx);
        let entries = logs(&notifications);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Error);
        assert_eq!(
            entries[0].message,
            "An error occurred in the analyzer: A1 (row 7)"
        );
    }

    #[test]
    fn test_suppressed_component_error_is_silent() {
        let mut f = fixture();
        f.dispatcher.apply(AnalysisEvent::ComponentError {
            component: Arc::clone(&f.a2),
            row: None,
            cause: FailureCause::PreviousErrors,
        });
        assert!(drain(&mut f.rx).is_empty());
    }

    #[test]
    fn test_job_error_classification() {
        let mut f = fixture();
        assert!(f
            .dispatcher
            .apply(AnalysisEvent::JobError {
                cause: FailureCause::PreviousErrors
            })
            .is_none());
        assert!(drain(&mut f.rx).is_empty());

        assert!(matches!(
            f.dispatcher.apply(AnalysisEvent::JobError {
                cause: FailureCause::Cancelled
            }),
            Some(TerminalState::Cancelled)
        ));
        let notifications = drain(&mut f.rx);
        assert!(logs(&notifications)
            .iter()
            .all(|e| e.severity != Severity::Error));

        assert!(matches!(
            f.dispatcher.apply(AnalysisEvent::JobError {
                cause: FailureCause::msg("datastore unreachable")
            }),
            Some(TerminalState::Failed(_))
        ));
        let notifications = drain(&mut f.rx);
        let entries = logs(&notifications);
        assert_eq!(entries[0].severity, Severity::Error);
        assert_eq!(
            entries[0].cause.as_ref().map(|c| c.to_string()),
            Some("datastore unreachable".to_string())
        );
    }

    #[test]
    fn test_errors_after_cancel_request_are_not_reported() {
        let mut f = fixture();
        let flag = Arc::new(AtomicBool::new(true));
        let mut dispatcher = f.dispatcher.with_cancel_flag(Arc::clone(&flag));

        dispatcher.apply(AnalysisEvent::ComponentError {
            component: Arc::clone(&f.a1),
            row: None,
            cause: FailureCause::msg("connection reset"),
        });
        let terminal = dispatcher.apply(AnalysisEvent::JobError {
            cause: FailureCause::msg("connection reset"),
        });

        assert!(matches!(terminal, Some(TerminalState::Cancelled)));
        let notifications = drain(&mut f.rx);
        let entries = logs(&notifications);
        assert!(entries.iter().all(|e| e.severity != Severity::Error));
        assert_eq!(
            entries.last().map(|e| e.message.as_str()),
            Some("Analysis job cancelled")
        );
    }

    #[test]
    fn test_job_success_surfaces_first_result() {
        let mut f = fixture();
        f.dispatcher.apply(AnalysisEvent::ComponentSuccess {
            component: Arc::clone(&f.a2),
            result: AnalyzerResult::new(json!(2)),
        });
        f.dispatcher.apply(AnalysisEvent::ComponentSuccess {
            component: Arc::clone(&f.a1),
            result: AnalyzerResult::new(json!(1)),
        });
        drain(&mut f.rx);

        let terminal = f.dispatcher.apply(AnalysisEvent::JobSuccess);
        assert!(matches!(terminal, Some(TerminalState::Succeeded)));
        assert_eq!(f.dispatcher.phase(), LogPhase::Finished);

        let surfaced = drain(&mut f.rx).into_iter().find_map(|n| match n {
            Notification::SurfaceFirstResult { descriptor } => descriptor,
            _ => None,
        });
        assert_eq!(surfaced, Some(f.a2.descriptor.clone()));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("analyzer"), "Analyzer");
        assert_eq!(capitalize(""), "");
    }
}
