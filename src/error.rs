//! Errors recorded in import outcomes.

use std::fmt;

use crate::types::Protocol;

/// Errors used in this crate.
///
/// Job-level errors never propagate through the orchestrator.  They
/// are recorded in the job's [`ImportOutcome`], and surface only in
/// the consolidated report.
///
/// [`ImportOutcome`]: crate::ImportOutcome
///
/// Note: This enum cannot be exhaustively matched to allow future
/// extensions.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    /// The protocol's backend is not available.
    ///
    /// This is structural: the protocol is disabled for the rest of
    /// the run.
    #[error("The type of this certificate ({0}) is not supported \
             by this installation")]
    Unavailable(Protocol),

    /// The backend reported a failure.
    #[error("{0}")]
    Backend(String),

    /// The job succeeded, but matched nothing.
    #[error("No data")]
    NoData,

    /// The job or the whole run was canceled.
    #[error("Operation canceled")]
    Canceled,
}

impl ImportError {
    /// Returns a backend error, rendering the whole error chain.
    pub fn backend<E: fmt::Display>(err: E) -> Self {
        ImportError::Backend(format!("{:#}", err))
    }

    /// Returns whether this is a cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, ImportError::Canceled)
    }

    /// Returns whether the job matched nothing.
    pub fn is_no_data(&self) -> bool {
        matches!(self, ImportError::NoData)
    }

    /// Returns whether the backend is structurally unavailable.
    pub fn is_structural(&self) -> bool {
        matches!(self, ImportError::Unavailable(_))
    }
}

impl From<anyhow::Error> for ImportError {
    fn from(err: anyhow::Error) -> Self {
        ImportError::backend(err)
    }
}
