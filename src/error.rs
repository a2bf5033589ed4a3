//! Error types for the execution engine.
//!
//! [`FailureCause`] is what the job engine reports when something goes
//! wrong; [`EngineError`] is what the monitor's own operations return.

use crate::models::{ComponentKind, ExecutionState};
use std::sync::Arc;

/// Why a job or component failed, as reported by the job engine.
///
/// Cancellation and cascading suppression are their own variants so they
/// can be told apart without looking at messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FailureCause {
    /// The user asked for the job to stop.
    #[error("the analysis job was cancelled")]
    Cancelled,

    /// A failure caused by an earlier error that was already reported.
    #[error("previous errors exist in the analysis job")]
    PreviousErrors,

    /// Any other failure, carried verbatim.
    #[error("{0:#}")]
    Error(Arc<anyhow::Error>),
}

impl FailureCause {
    pub fn error(err: impl Into<anyhow::Error>) -> Self {
        FailureCause::Error(Arc::new(err.into()))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        FailureCause::Error(Arc::new(anyhow::anyhow!(message.into())))
    }
}

/// Errors returned by the monitor's operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("cannot {operation} while the job is {state}")]
    InvalidState {
        operation: &'static str,
        state: ExecutionState,
    },

    #[error("could not resolve the originating table of {kind} '{label}'")]
    OriginatingTableUnresolved { kind: ComponentKind, label: String },

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("the execution worker stopped unexpectedly: {0}")]
    WorkerLost(String),
}

/// Rejected progress updates. These point at a bug in the job engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("progress of table '{table}' went backwards from row {current} to {attempted}")]
    Regression {
        table: String,
        current: u64,
        attempted: u64,
    },

    #[error("table '{table}' is already finished")]
    AlreadyFinished { table: String },
}
