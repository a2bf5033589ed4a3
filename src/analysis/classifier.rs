//! Classification of failure causes.

use crate::error::FailureCause;

/// How a failure should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// User cancelled; not an error.
    Cancelled,
    /// Follow-up of an already reported failure; stay quiet.
    Suppressed,
    /// Show the failure to the user.
    UserVisibleError,
}

/// Pure classifier for [`FailureCause`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(&self, cause: &FailureCause) -> Classification {
        match cause {
            FailureCause::Cancelled => Classification::Cancelled,
            FailureCause::PreviousErrors => Classification::Suppressed,
            FailureCause::Error(_) => Classification::UserVisibleError,
        }
    }
}
