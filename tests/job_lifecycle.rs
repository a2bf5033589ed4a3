//! End-to-end runs through the coordinator.

use analysis_monitor::analysis::{
    JobExecutionCoordinator, Notification, Notifier, RunOutcome, TerminalState,
};
use analysis_monitor::engine::local::LocalEngineConfig;
use analysis_monitor::engine::{AnalysisEvent, EventSink, JobEngine, LocalEngine};
use analysis_monitor::error::FailureCause;
use analysis_monitor::models::{
    AnalysisJob, AnalyzerResult, ComponentJob, ComponentKind, Descriptor, ExecutionState,
    ExpectedRows, Severity, Table,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Plays back a fixed event list, then optionally parks until cancelled.
struct ScriptedEngine {
    events: Vec<AnalysisEvent>,
    then_wait_for_cancel: bool,
}

impl JobEngine for ScriptedEngine {
    fn run(
        &self,
        _job: Arc<AnalysisJob>,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, ()> {
        let events = self.events.clone();
        let wait = self.then_wait_for_cancel;
        async move {
            for event in events {
                sink.emit(event);
            }
            if wait {
                cancel.cancelled().await;
                sink.job_error(FailureCause::Cancelled);
            }
        }
        .boxed()
    }
}

struct Fixture {
    job: Arc<AnalysisJob>,
    a1: Arc<ComponentJob>,
    a2: Arc<ComponentJob>,
}

fn two_analyzers_on_t() -> Fixture {
    let a1 = ComponentJob::new(
        Descriptor::new("Pattern finder", ComponentKind::Analyzer),
        vec!["code".to_string()],
    )
    .named("A1");
    let a2 = ComponentJob::new(
        Descriptor::new("Value distribution", ComponentKind::Analyzer),
        vec!["code".to_string()],
    )
    .named("A2");

    let job = Arc::new(AnalysisJob {
        tables: vec![Table::new("T", vec!["code".to_string()], 100)],
        components: vec![a1.clone(), a2.clone()],
        ..Default::default()
    });

    Fixture {
        job,
        a1: Arc::new(a1),
        a2: Arc::new(a2),
    }
}

fn row_begin(table: &str, rows: u64) -> AnalysisEvent {
    AnalysisEvent::RowProcessingBegin {
        table: table.to_string(),
        expected_rows: ExpectedRows::Known(rows),
    }
}

fn success(component: &Arc<ComponentJob>, payload: serde_json::Value) -> AnalysisEvent {
    AnalysisEvent::ComponentSuccess {
        component: Arc::clone(component),
        result: AnalyzerResult::new(payload),
    }
}

/// Receive notifications up to and including the terminal one.
async fn drain(mut rx: broadcast::Receiver<Notification>) -> Vec<Notification> {
    let collect = async {
        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    let done = matches!(notification, Notification::Terminal(_));
                    seen.push(notification);
                    if done {
                        return seen;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return seen,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("no terminal notification")
}

fn error_logs(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::Log(entry) if entry.severity == Severity::Error => {
                Some(entry.message.clone())
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn two_analyzers_on_one_table() {
    let f = two_analyzers_on_t();
    let notifier = Notifier::default();
    let rx = notifier.subscribe();

    let coordinator = JobExecutionCoordinator::new(
        Arc::clone(&f.job),
        Arc::new(ScriptedEngine {
            events: vec![
                AnalysisEvent::JobBegin,
                row_begin("T", 100),
                AnalysisEvent::RowProcessingProgress {
                    table: "T".to_string(),
                    row: 50,
                },
                success(&f.a1, json!("R1")),
                success(&f.a2, json!("R2")),
                AnalysisEvent::RowProcessingSuccess {
                    table: "T".to_string(),
                },
                AnalysisEvent::JobSuccess,
            ],
            then_wait_for_cancel: false,
        }),
        notifier,
    );
    tokio_test::assert_ok!(coordinator.start());

    let outcome = tokio_test::assert_ok!(coordinator.await_result().await);
    let notifications = drain(rx).await;

    assert_eq!(coordinator.state(), ExecutionState::Succeeded);
    let result = outcome.result().expect("succeeded runs carry a result");
    assert_eq!(result.collections.len(), 2);

    let r1 = coordinator.get_result(&f.a1.descriptor).unwrap().results();
    assert_eq!(r1.len(), 1);
    assert_eq!(r1[0].result.payload(), &json!("R1"));
    let r2 = coordinator.get_result(&f.a2.descriptor).unwrap().results();
    assert_eq!(r2[0].result.payload(), &json!("R2"));

    let progress = coordinator.progress().state_of("T").unwrap();
    assert!(progress.finished);
    assert_eq!(progress.expected_rows, ExpectedRows::Known(100));
    assert_eq!(progress.current_row, 100);

    let created = notifications
        .iter()
        .filter(|n| matches!(n, Notification::ResultCollectionCreated { .. }))
        .count();
    assert_eq!(created, 2);
    assert!(notifications.iter().any(|n| matches!(
        n,
        Notification::SurfaceFirstResult { descriptor: Some(d) } if *d == f.a1.descriptor
    )));
    assert!(error_logs(&notifications).is_empty());
}

#[tokio::test]
async fn cancellation_keeps_partial_results() {
    let f = two_analyzers_on_t();
    let notifier = Notifier::default();
    let rx = notifier.subscribe();

    let coordinator = JobExecutionCoordinator::new(
        Arc::clone(&f.job),
        Arc::new(ScriptedEngine {
            events: vec![
                AnalysisEvent::JobBegin,
                row_begin("T", 100),
                success(&f.a1, json!("R1")),
            ],
            then_wait_for_cancel: true,
        }),
        notifier,
    );
    coordinator.start().unwrap();

    // Wait until the partial result has been aggregated.
    tokio::time::timeout(Duration::from_secs(10), async {
        while coordinator.get_result(&f.a1.descriptor).is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    coordinator.cancel();
    let outcome = coordinator.await_result().await.unwrap();
    let notifications = drain(rx).await;

    assert_eq!(coordinator.state(), ExecutionState::Cancelled);
    match outcome {
        RunOutcome::Cancelled(partial) => {
            assert_eq!(partial.result_count(), 1);
            assert!(partial.get(&f.a1.descriptor).is_some());
        }
        other => panic!("expected a cancelled run, got {:?}", other),
    }
    assert!(coordinator.get_result(&f.a1.descriptor).is_some());
    assert!(error_logs(&notifications).is_empty());
    assert!(matches!(
        notifications.last(),
        Some(Notification::Terminal(TerminalState::Cancelled))
    ));
}

#[tokio::test]
async fn component_error_is_not_fatal() {
    let f = two_analyzers_on_t();
    let notifier = Notifier::default();
    let rx = notifier.subscribe();

    let coordinator = JobExecutionCoordinator::new(
        Arc::clone(&f.job),
        Arc::new(ScriptedEngine {
            events: vec![
                AnalysisEvent::JobBegin,
                AnalysisEvent::ComponentError {
                    component: Arc::clone(&f.a1),
                    row: Some(7),
                    cause: FailureCause::msg("bad value"),
                },
                success(&f.a2, json!("R2")),
                AnalysisEvent::JobSuccess,
            ],
            then_wait_for_cancel: false,
        }),
        notifier,
    );
    coordinator.start().unwrap();

    let outcome = coordinator.await_result().await.unwrap();
    let notifications = drain(rx).await;

    assert_eq!(outcome.state(), ExecutionState::Succeeded);
    let result = outcome.result().unwrap();
    assert_eq!(result.collections.len(), 1);
    assert!(result.get(&f.a2.descriptor).is_some());
    assert!(result.get(&f.a1.descriptor).is_none());

    let errors = error_logs(&notifications);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("A1"));
    assert!(errors[0].contains("row 7"));
}

fn load_fixture() -> AnalysisJob {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/customers.toml");
    let content = std::fs::read_to_string(path).unwrap();
    toml::from_str(&content).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_engine_runs_fixture_job() {
    let notifier = Notifier::default();
    let rx = notifier.subscribe();
    let engine = LocalEngine::new(LocalEngineConfig {
        progress_interval: 7,
        row_delay: Duration::ZERO,
    });

    let coordinator =
        JobExecutionCoordinator::new(Arc::new(load_fixture()), Arc::new(engine), notifier);
    coordinator.start().unwrap();

    let outcome = coordinator.await_result().await.unwrap();
    let notifications = drain(rx).await;

    assert_eq!(outcome.state(), ExecutionState::Succeeded);
    assert_eq!(coordinator.datastore_name(), Some("crm"));

    let result = outcome.result().unwrap();
    assert_eq!(result.collections.len(), 3);
    assert_eq!(result.result_count(), 4);

    let distribution = Descriptor::new("Value distribution", ComponentKind::Analyzer)
        .with_icon("chart");
    let labels: Vec<String> = result
        .get(&distribution)
        .unwrap()
        .results
        .iter()
        .map(|r| r.component.label().to_string())
        .collect();
    assert_eq!(labels, vec!["Domains", "Cities"]);

    for (table, rows) in [("customers", 250), ("orders", 120)] {
        let state = coordinator.progress().state_of(table).unwrap();
        assert!(state.finished);
        assert_eq!(state.current_row, rows);
    }
    assert!(coordinator.progress().state_of("audit_log").is_none());

    let errors = error_logs(&notifications);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Order totals"));
    assert!(!notifications
        .iter()
        .any(|n| matches!(n, Notification::Diagnostic(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_engine_stops_on_cancel() {
    let job = AnalysisJob {
        tables: vec![Table::new("big", vec!["v".to_string()], 1_000_000)],
        components: vec![ComponentJob::new(
            Descriptor::new("Number analyzer", ComponentKind::Analyzer),
            vec!["v".to_string()],
        )],
        ..Default::default()
    };
    let engine = LocalEngine::new(LocalEngineConfig {
        progress_interval: 10,
        row_delay: Duration::from_micros(200),
    });
    let notifier = Notifier::default();
    let rx = notifier.subscribe();

    let coordinator = JobExecutionCoordinator::new(Arc::new(job), Arc::new(engine), notifier);
    coordinator.start().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    coordinator.cancel();

    let outcome = coordinator.await_result().await.unwrap();
    let notifications = drain(rx).await;

    assert!(matches!(outcome, RunOutcome::Cancelled(ref r) if r.is_empty()));
    let state = coordinator.progress().state_of("big").unwrap();
    assert!(!state.finished);
    assert!(state.current_row < 1_000_000);
    assert!(error_logs(&notifications).is_empty());
}

#[tokio::test]
async fn stored_result_is_shown_as_succeeded() {
    let f = two_analyzers_on_t();
    let first = JobExecutionCoordinator::new(
        Arc::clone(&f.job),
        Arc::new(ScriptedEngine {
            events: vec![success(&f.a2, json!({"top": "x"})), AnalysisEvent::JobSuccess],
            then_wait_for_cancel: false,
        }),
        Notifier::default(),
    );
    first.start().unwrap();
    let exported = analysis_monitor::report::generate_json_summary(
        first.await_result().await.unwrap().result().unwrap(),
    )
    .unwrap();

    let loaded = analysis_monitor::report::parse_json_result(&exported).unwrap();
    let notifier = Notifier::default();
    let rx = notifier.subscribe();
    let shown = JobExecutionCoordinator::from_result(Arc::clone(&f.job), &loaded, notifier);

    let notifications = drain(rx).await;
    assert_eq!(shown.state(), ExecutionState::Succeeded);
    assert!(shown.get_result(&f.a2.descriptor).is_some());
    assert!(notifications.iter().any(|n| matches!(
        n,
        Notification::SurfaceFirstResult { descriptor: Some(d) } if *d == f.a2.descriptor
    )));
}
