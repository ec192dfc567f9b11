//! Imports certificates from many sources at once.
//!
//! Certificates may come from files, the clipboard, pasted text,
//! keyservers, and Web Key Directories.  The [`Orchestrator`] drives
//! all of them through backend import jobs: local imports are
//! serialized, network fetches run in parallel.  Once every job
//! completed, the keys that certified new certificates may be fetched
//! in a follow-up wave, the certificate cache is relisted, and groups
//! bundled with the certificates are imported.  Finally, a report is
//! assembled.
//!
//! ```no_run
//! # async fn f(factory: std::sync::Arc<dyn sequoia_import::backend::BackendJobFactory>,
//! #            cache: std::sync::Arc<dyn sequoia_import::cache::KeyCache>)
//! #            -> sequoia_import::Result<()> {
//! use sequoia_import::{
//!     ImportSource,
//!     Orchestrator,
//!     Protocol,
//!     RunOutcome,
//!     config::ImportSettings,
//! };
//!
//! let (orchestrator, handle) =
//!     Orchestrator::new(ImportSettings::default(), factory, cache);
//! let run = tokio::spawn(orchestrator.run());
//!
//! handle.start(vec![
//!     (ImportSource::from_file("alice.pgp")?, Protocol::OpenPGP),
//! ])?;
//!
//! if let RunOutcome::Finished(summary) = run.await? {
//!     summary.report.print_summary(&mut std::io::stdout());
//! }
//! # Ok(()) }
//! ```

#[macro_use] mod macros;

pub mod aggregator;
pub mod backend;
pub mod barrier;
pub mod cache;
pub mod config;
pub mod convergence;
mod error;
pub mod finalize;
pub mod groups;
pub mod orchestrator;
pub mod outcome;
pub mod output;
pub mod progress;
pub mod scheduler;
pub mod types;

pub use error::ImportError;
pub use orchestrator::{
    ImportSummary,
    Orchestrator,
    OrchestratorHandle,
    RunOutcome,
};
pub use outcome::{
    ImportOutcome,
    JobResult,
};
pub use types::{
    Fingerprint,
    ImportSource,
    KeyId,
    Protocol,
};

/// Result type used by application-level code.
pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
