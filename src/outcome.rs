//! Per-job results.

use std::path::PathBuf;

use crate::{
    ImportError,
    types::{
        Counts,
        ImportedCertRecord,
        JobKind,
        Protocol,
    },
};

/// What a backend job reports when it completes.
#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub counts: Counts,
    pub imports: Vec<ImportedCertRecord>,
    pub error: Option<ImportError>,
    pub audit_log: String,
}

impl JobResult {
    /// Returns a result carrying only the given error.
    pub fn failed(error: ImportError) -> Self {
        JobResult {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Returns the result of a job that observed a cancellation
    /// request.
    pub fn canceled() -> Self {
        Self::failed(ImportError::Canceled)
    }
}

/// The recorded outcome of one import job.
///
/// Outcomes are immutable once recorded.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub label: String,
    pub protocol: Protocol,
    pub kind: JobKind,

    /// The file the imported data was read from, if any.
    pub file: Option<PathBuf>,

    pub counts: Counts,
    pub imports: Vec<ImportedCertRecord>,
    pub error: Option<ImportError>,
    pub audit_log: String,
}

impl ImportOutcome {
    /// Returns the outcome of a completed job.
    pub fn new(label: String, protocol: Protocol, kind: JobKind,
               file: Option<PathBuf>, result: JobResult)
               -> Self
    {
        ImportOutcome {
            label,
            protocol,
            kind,
            file,
            counts: result.counts,
            imports: result.imports,
            error: result.error,
            audit_log: result.audit_log,
        }
    }

    /// Returns an outcome carrying only the given error.
    pub fn with_error(label: String, protocol: Protocol, kind: JobKind,
                      file: Option<PathBuf>, error: ImportError)
                      -> Self
    {
        Self::new(label, protocol, kind, file, JobResult::failed(error))
    }

    /// Returns whether this outcome counts as a failure.
    ///
    /// Cancellations are not failures, and neither is "no data": a
    /// bundle containing only OpenPGP material may legitimately match
    /// nothing when fed to the CMS backend.
    pub fn is_failed(&self) -> bool {
        self.error.as_ref()
            .map(|e| ! e.is_canceled() && ! e.is_no_data())
            .unwrap_or(false)
    }

    /// Returns whether the job was canceled.
    pub fn is_canceled(&self) -> bool {
        self.error.as_ref().map(ImportError::is_canceled).unwrap_or(false)
    }

    /// Returns whether the job was successful.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns whether this outcome is not worth bothering the user
    /// with.
    ///
    /// That is the case if nothing was considered, or if a single
    /// certificate was considered, and the backend found no data.
    pub fn is_trivial(&self) -> bool {
        self.counts.considered == 0
            || (self.counts.considered == 1
                && self.error.as_ref().map(ImportError::is_no_data)
                   .unwrap_or(false))
    }
}
