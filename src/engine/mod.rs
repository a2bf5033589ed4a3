//! Job engine interface.
//!
//! A job engine runs an [`AnalysisJob`] and reports what happens through
//! an [`EventSink`]. The monitor never looks inside the engine; it only
//! consumes the [`AnalysisEvent`] stream.

pub mod local;

pub use local::LocalEngine;

use crate::error::FailureCause;
use crate::models::{AnalysisJob, AnalyzerResult, ComponentJob, ExpectedRows};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle events emitted by a job engine.
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    JobBegin,
    RowProcessingBegin {
        table: String,
        expected_rows: ExpectedRows,
    },
    RowProcessingProgress {
        table: String,
        row: u64,
    },
    RowProcessingSuccess {
        table: String,
    },
    ComponentBegin {
        component: Arc<ComponentJob>,
    },
    ComponentSuccess {
        component: Arc<ComponentJob>,
        result: AnalyzerResult,
    },
    ComponentError {
        component: Arc<ComponentJob>,
        row: Option<u64>,
        cause: FailureCause,
    },
    JobSuccess,
    JobError {
        cause: FailureCause,
    },
}

impl AnalysisEvent {
    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisEvent::JobBegin => "job_begin",
            AnalysisEvent::RowProcessingBegin { .. } => "row_processing_begin",
            AnalysisEvent::RowProcessingProgress { .. } => "row_processing_progress",
            AnalysisEvent::RowProcessingSuccess { .. } => "row_processing_success",
            AnalysisEvent::ComponentBegin { .. } => "component_begin",
            AnalysisEvent::ComponentSuccess { .. } => "component_success",
            AnalysisEvent::ComponentError { .. } => "component_error",
            AnalysisEvent::JobSuccess => "job_success",
            AnalysisEvent::JobError { .. } => "job_error",
        }
    }
}

/// Where an engine sends its events. Cheap to clone, usable from any
/// thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<AnalysisEvent>,
}

impl EventSink {
    /// Create a sink and the receiver its events are delivered to.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AnalysisEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Send an event. Returns false once the consumer has gone away.
    pub fn emit(&self, event: AnalysisEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn job_begin(&self) -> bool {
        self.emit(AnalysisEvent::JobBegin)
    }

    pub fn row_processing_begin(&self, table: &str, expected_rows: ExpectedRows) -> bool {
        self.emit(AnalysisEvent::RowProcessingBegin {
            table: table.to_string(),
            expected_rows,
        })
    }

    pub fn row_processing_progress(&self, table: &str, row: u64) -> bool {
        self.emit(AnalysisEvent::RowProcessingProgress {
            table: table.to_string(),
            row,
        })
    }

    pub fn row_processing_success(&self, table: &str) -> bool {
        self.emit(AnalysisEvent::RowProcessingSuccess {
            table: table.to_string(),
        })
    }

    pub fn component_begin(&self, component: &Arc<ComponentJob>) -> bool {
        self.emit(AnalysisEvent::ComponentBegin {
            component: Arc::clone(component),
        })
    }

    pub fn component_success(&self, component: &Arc<ComponentJob>, result: AnalyzerResult) -> bool {
        self.emit(AnalysisEvent::ComponentSuccess {
            component: Arc::clone(component),
            result,
        })
    }

    pub fn component_error(
        &self,
        component: &Arc<ComponentJob>,
        row: Option<u64>,
        cause: FailureCause,
    ) -> bool {
        self.emit(AnalysisEvent::ComponentError {
            component: Arc::clone(component),
            row,
            cause,
        })
    }

    pub fn job_success(&self) -> bool {
        self.emit(AnalysisEvent::JobSuccess)
    }

    pub fn job_error(&self, cause: FailureCause) -> bool {
        self.emit(AnalysisEvent::JobError { cause })
    }
}

/// Something that can run an analysis job.
///
/// `run` must report the end of the job with `job_success` or `job_error`
/// and should check `cancel` between rows and between components. The
/// returned future is spawned onto the runtime.
pub trait JobEngine: Send + Sync + 'static {
    fn run(
        &self,
        job: Arc<AnalysisJob>,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, ()>;
}
