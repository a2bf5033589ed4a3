//! Background execution of an analysis job.
//!
//! The coordinator owns the run's [`ExecutionState`]. Starting a job spawns
//! the engine plus one consumer task that drains the engine's event channel
//! through the dispatcher; that consumer makes the terminal transition,
//! and a small supervisor fails the run if the consumer itself dies.

use crate::analysis::aggregator::{ResultAggregator, ResultCollection};
use crate::analysis::dispatcher::AnalysisEventDispatcher;
use crate::analysis::listeners::ListenerRegistry;
use crate::analysis::notify::{LogEntry, Notification, Notifier, TerminalState};
use crate::analysis::progress::ProgressTracker;
use crate::config::PreferencesConfig;
use crate::engine::{AnalysisEvent, EventSink, JobEngine};
use crate::error::{EngineError, FailureCause};
use crate::models::{AnalysisJob, AnalysisResult, Descriptor, ExecutionState};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a run ended, as returned by
/// [`await_result`](JobExecutionCoordinator::await_result).
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Succeeded(AnalysisResult),
    /// Holds whatever results completed before the job stopped.
    Cancelled(AnalysisResult),
    Failed(FailureCause),
}

impl RunOutcome {
    pub fn state(&self) -> ExecutionState {
        match self {
            RunOutcome::Succeeded(_) => ExecutionState::Succeeded,
            RunOutcome::Cancelled(_) => ExecutionState::Cancelled,
            RunOutcome::Failed(_) => ExecutionState::Failed,
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            RunOutcome::Succeeded(result) | RunOutcome::Cancelled(result) => Some(result),
            RunOutcome::Failed(_) => None,
        }
    }
}

/// Opaque rendering capability for the presentation layer. Never
/// inspected here.
#[derive(Clone)]
pub struct RendererFactory(Arc<dyn Any + Send + Sync>);

impl RendererFactory {
    pub fn new<T: Any + Send + Sync>(factory: T) -> Self {
        Self(Arc::new(factory))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for RendererFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RendererFactory(..)")
    }
}

#[derive(Debug, Clone)]
struct Lifecycle {
    state: ExecutionState,
    terminal: Option<TerminalState>,
}

/// Moves the run to a terminal state, if it is still running.
///
/// Once cancellation was requested every ending counts as a cancellation.
fn finish(
    lifecycle: &watch::Sender<Lifecycle>,
    cancel_requested: &AtomicBool,
    notifier: &Notifier,
    terminal: TerminalState,
) -> bool {
    let terminal = if cancel_requested.load(Ordering::Acquire) {
        TerminalState::Cancelled
    } else {
        terminal
    };
    let next = terminal.execution_state();

    let changed = lifecycle.send_if_modified(|l| {
        if l.state.can_transition_to(next) {
            l.state = next;
            l.terminal = Some(terminal.clone());
            true
        } else {
            false
        }
    });

    if changed {
        info!(state = %next, "Analysis job reached terminal state");
        notifier.publish(Notification::Terminal(terminal));
    }
    changed
}

/// Runs one analysis job in the background and collects its results.
pub struct JobExecutionCoordinator {
    job: Arc<AnalysisJob>,
    engine: Option<Arc<dyn JobEngine>>,
    job_file: Option<PathBuf>,
    notifier: Notifier,
    tracker: Arc<ProgressTracker>,
    aggregator: Arc<ResultAggregator>,
    listeners: ListenerRegistry,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
    cancel: CancellationToken,
    cancel_requested: Arc<AtomicBool>,
    outcome: OnceLock<RunOutcome>,
    renderer_factory: Option<RendererFactory>,
    preferences: PreferencesConfig,
}

impl JobExecutionCoordinator {
    /// Create a coordinator for a job that has not run yet.
    pub fn new(job: Arc<AnalysisJob>, engine: Arc<dyn JobEngine>, notifier: Notifier) -> Self {
        Self::build(job, Some(engine), notifier, ExecutionState::NotStarted)
    }

    /// Create a coordinator around results computed earlier. It starts out
    /// succeeded and cannot be started.
    pub fn from_result(job: Arc<AnalysisJob>, result: &AnalysisResult, notifier: Notifier) -> Self {
        let mut coordinator = Self::build(job, None, notifier, ExecutionState::Succeeded);
        coordinator.aggregator = Arc::new(ResultAggregator::from_result(
            result,
            coordinator.notifier.clone(),
        ));
        coordinator.lifecycle.send_modify(|l| {
            l.terminal = Some(TerminalState::Succeeded);
        });

        coordinator.notifier.publish(Notification::SurfaceFirstResult {
            descriptor: coordinator.aggregator.first_descriptor(),
        });
        coordinator
            .notifier
            .publish(Notification::Terminal(TerminalState::Succeeded));
        coordinator
    }

    fn build(
        job: Arc<AnalysisJob>,
        engine: Option<Arc<dyn JobEngine>>,
        notifier: Notifier,
        state: ExecutionState,
    ) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle {
            state,
            terminal: None,
        });

        Self {
            job,
            engine,
            job_file: None,
            tracker: Arc::new(ProgressTracker::new()),
            aggregator: Arc::new(ResultAggregator::new(notifier.clone())),
            notifier,
            listeners: ListenerRegistry::new(),
            lifecycle: Arc::new(lifecycle),
            cancel: CancellationToken::new(),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            outcome: OnceLock::new(),
            renderer_factory: None,
            preferences: PreferencesConfig::default(),
        }
    }

    pub fn with_listeners(mut self, listeners: ListenerRegistry) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn with_job_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.job_file = Some(path.into());
        self
    }

    pub fn with_renderer_factory(mut self, factory: RendererFactory) -> Self {
        self.renderer_factory = Some(factory);
        self
    }

    pub fn with_preferences(mut self, preferences: PreferencesConfig) -> Self {
        self.preferences = preferences;
        self
    }

    /// Launch the job in the background. Only valid once, before anything
    /// else has happened, and from within a Tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        let invalid = || EngineError::InvalidState {
            operation: "start",
            state: self.state(),
        };

        let engine = self.engine.clone().ok_or_else(invalid)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::WorkerLost(format!("no async runtime: {}", e)))?;

        let started = self.lifecycle.send_if_modified(|l| {
            if l.state == ExecutionState::NotStarted {
                l.state = ExecutionState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(invalid());
        }

        info!(
            datastore = %self.job.datastore.name,
            components = self.job.components.len(),
            "Starting analysis job"
        );

        let (sink, events) = EventSink::channel();
        let engine_task = runtime.spawn(engine.run(Arc::clone(&self.job), sink, self.cancel.clone()));

        let worker = EventWorker {
            dispatcher: AnalysisEventDispatcher::new(
                Arc::clone(&self.job),
                Arc::clone(&self.tracker),
                Arc::clone(&self.aggregator),
                self.notifier.clone(),
            )
            .with_cancel_flag(Arc::clone(&self.cancel_requested)),
            listeners: self.listeners.clone(),
            lifecycle: Arc::clone(&self.lifecycle),
            cancel_requested: Arc::clone(&self.cancel_requested),
            notifier: self.notifier.clone(),
        };
        let worker_task = runtime.spawn(worker.run(events, engine_task));
        runtime.spawn(supervise(
            worker_task,
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.cancel_requested),
            self.cancel.clone(),
            self.notifier.clone(),
        ));
        Ok(())
    }

    /// Ask the job to stop. Safe to call from anywhere, any number of
    /// times; does nothing unless the job is running.
    pub fn cancel(&self) {
        if self.state() != ExecutionState::Running {
            debug!(state = %self.state(), "Ignoring cancel request");
            return;
        }

        if !self.cancel_requested.swap(true, Ordering::AcqRel) {
            self.notifier.log(LogEntry::warning(
                "Cancellation requested, stopping the analysis job",
            ));
            self.cancel.cancel();
        }
    }

    /// Wait for the run to end and return its outcome.
    ///
    /// The outcome is computed once; later calls return the same value.
    pub async fn await_result(&self) -> Result<RunOutcome, EngineError> {
        if let Some(outcome) = self.outcome.get() {
            return Ok(outcome.clone());
        }

        let state = self.state();
        if state == ExecutionState::NotStarted {
            return Err(EngineError::InvalidState {
                operation: "await the result",
                state,
            });
        }

        let mut rx = self.lifecycle.subscribe();
        let terminal = rx
            .wait_for(|l| l.terminal.is_some())
            .await
            .map_err(|e| EngineError::WorkerLost(e.to_string()))?
            .terminal
            .clone()
            .ok_or_else(|| EngineError::WorkerLost("terminal state missing".to_string()))?;

        let outcome = self.outcome.get_or_init(|| match terminal {
            TerminalState::Succeeded => RunOutcome::Succeeded(self.aggregator.snapshot()),
            TerminalState::Cancelled => RunOutcome::Cancelled(self.aggregator.snapshot()),
            TerminalState::Failed(cause) => RunOutcome::Failed(cause),
        });
        Ok(outcome.clone())
    }

    pub fn state(&self) -> ExecutionState {
        self.lifecycle.borrow().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn get_result(&self, descriptor: &Descriptor) -> Option<Arc<ResultCollection>> {
        self.aggregator.get_result(descriptor)
    }

    pub fn snapshot(&self) -> AnalysisResult {
        self.aggregator.snapshot()
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn job(&self) -> &Arc<AnalysisJob> {
        &self.job
    }

    /// Name of the job's datastore, if it has one.
    pub fn datastore_name(&self) -> Option<&str> {
        let name = self.job.datastore.name.trim();
        (!name.is_empty()).then_some(name)
    }

    pub fn job_file(&self) -> Option<&Path> {
        self.job_file.as_deref()
    }

    pub fn renderer_factory(&self) -> Option<&RendererFactory> {
        self.renderer_factory.as_ref()
    }

    pub fn preferences(&self) -> &PreferencesConfig {
        &self.preferences
    }
}

impl Drop for JobExecutionCoordinator {
    fn drop(&mut self) {
        if self.state() == ExecutionState::Running {
            self.cancel_requested.store(true, Ordering::Release);
            self.cancel.cancel();
        }
    }
}

/// Waits for the event worker and fails the run if the worker died
/// before reaching a terminal state.
async fn supervise(
    worker_task: JoinHandle<()>,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
    cancel_requested: Arc<AtomicBool>,
    cancel: CancellationToken,
    notifier: Notifier,
) {
    let Err(e) = worker_task.await else {
        return;
    };
    if lifecycle.borrow().state.is_terminal() {
        return;
    }

    error!("Event worker stopped abnormally: {}", e);
    // Nobody is draining the engine's events any more.
    cancel.cancel();

    let cause = FailureCause::msg(format!("the event worker crashed: {}", e));
    if !cancel_requested.load(Ordering::Acquire) {
        notifier.log(LogEntry::error(
            "An error occurred in the analysis job!",
            Some(cause.clone()),
        ));
    }
    finish(
        &lifecycle,
        &cancel_requested,
        &notifier,
        TerminalState::Failed(cause),
    );
}

/// The single consumer of a run's event channel.
struct EventWorker {
    dispatcher: AnalysisEventDispatcher,
    listeners: ListenerRegistry,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
    cancel_requested: Arc<AtomicBool>,
    notifier: Notifier,
}

impl EventWorker {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<AnalysisEvent>,
        engine_task: JoinHandle<()>,
    ) {
        while let Some(event) = events.recv().await {
            self.listeners.notify(&event);
            if let Some(terminal) = self.dispatcher.apply(event) {
                finish(
                    &self.lifecycle,
                    &self.cancel_requested,
                    &self.notifier,
                    terminal,
                );
            }
        }

        // Every sink is gone, so the engine is done one way or another.
        let engine_result = engine_task.await;
        if self.lifecycle.borrow().state.is_terminal() {
            return;
        }

        let terminal = match engine_result {
            Err(e) if e.is_panic() => {
                let cause = FailureCause::msg(format!("the job engine crashed: {}", e));
                self.notifier.log(LogEntry::error(
                    "An error occurred in the analysis job!",
                    Some(cause.clone()),
                ));
                TerminalState::Failed(cause)
            }
            _ if self.cancel_requested.load(Ordering::Acquire) => TerminalState::Cancelled,
            _ if self.dispatcher.saw_suppressed_failure() => {
                TerminalState::Failed(FailureCause::PreviousErrors)
            }
            _ => {
                warn!("Job engine stopped without reporting how the job ended");
                let cause = FailureCause::msg("the job engine stopped without reporting completion");
                self.notifier.log(LogEntry::error(
                    "An error occurred in the analysis job!",
                    Some(cause.clone()),
                ));
                TerminalState::Failed(cause)
            }
        };

        finish(
            &self.lifecycle,
            &self.cancel_requested,
            &self.notifier,
            terminal,
        );
    }
}
