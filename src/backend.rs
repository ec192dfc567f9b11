//! The boundary to the backend performing the actual imports.
//!
//! A [`BackendJobFactory`] creates one [`BackendJob`] per import.  The
//! orchestrator wraps each job in a [`BackendJobHandle`], which owns
//! the job's cancellation channel and delivers its completion to the
//! orchestrator's event loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};

use crate::{
    ImportError,
    outcome::JobResult,
    types::{
        ImportSource,
        JobKind,
        Protocol,
    },
};

pub mod sequoia;

/// Identifies a job within one run.
pub type JobId = u64;

/// The asynchronous part of a started job.
pub type JobFuture = BoxFuture<'static, JobResult>;

/// Creates backend jobs.
pub trait BackendJobFactory: Send + Sync {
    /// Returns a job for the given protocol and kind.
    ///
    /// Returns `None` if the backend for `protocol` is structurally
    /// unavailable.
    fn create(&self, protocol: Protocol, kind: JobKind)
              -> Option<Box<dyn BackendJob>>;
}

/// One asynchronous import or fetch operation.
pub trait BackendJob: Send {
    /// Starts the job.
    ///
    /// Errors detected before any work is done are returned directly.
    /// Otherwise, the returned future resolves to the job's result.
    /// The job should watch `cancel`, and wind down with
    /// [`JobResult::canceled`] once it fires.
    fn start(self: Box<Self>, source: Arc<ImportSource>, cancel: CancelToken)
             -> Result<JobFuture, ImportError>;
}

/// Observes cancellation requests for one job.
///
/// Cancellation is cooperative: the job decides when and whether to
/// honor it.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Returns a token together with the sender that fires it.
    pub fn new() -> (watch::Sender<bool>, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (tx, CancelToken { rx })
    }

    /// Returns whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    ///
    /// If the requesting side goes away without requesting
    /// cancellation, this never resolves.
    pub async fn canceled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                if *rx.borrow() {
                    return;
                }
                futures_util::future::pending::<()>().await;
            }
        }
    }
}

/// A job's completion, delivered to the orchestrator's event loop.
#[derive(Debug)]
pub struct Completion {
    pub id: JobId,
    pub result: JobResult,
}

/// The scheduler's handle on a backend job.
pub struct BackendJobHandle {
    job: Option<Box<dyn BackendJob>>,
    cancel: watch::Sender<bool>,
    token: CancelToken,
}

impl BackendJobHandle {
    pub fn new(job: Box<dyn BackendJob>) -> Self {
        let (cancel, token) = CancelToken::new();
        BackendJobHandle {
            job: Some(job),
            cancel,
            token,
        }
    }

    /// Returns whether the job has been started.
    pub fn is_started(&self) -> bool {
        self.job.is_none()
    }

    /// Starts the job.
    ///
    /// The result is sent to `completions` tagged with `id`.  A
    /// panicking job is reported as a backend error.
    pub fn start(&mut self, id: JobId, source: Arc<ImportSource>,
                 completions: mpsc::UnboundedSender<Completion>)
                 -> Result<(), ImportError>
    {
        let job = self.job.take()
            .ok_or_else(|| ImportError::Backend(
                "job already started".into()))?;
        let future = job.start(source, self.token.clone())?;

        tokio::spawn(async move {
            let result = AssertUnwindSafe(future).catch_unwind().await
                .unwrap_or_else(|_| JobResult::failed(
                    ImportError::Backend("backend job panicked".into())));
            // If the orchestrator went away, nobody is interested in
            // the result.
            let _ = completions.send(Completion { id, result });
        });

        Ok(())
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}
