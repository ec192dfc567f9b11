//! Schedules import jobs.
//!
//! Local imports write into the keyring, which must not be written
//! concurrently.  They are queued, and started one at a time in
//! submission order.  External imports only do network I/O before
//! handing their material to the keyring, and are started right away.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    ImportError,
    aggregator::ResultAggregator,
    backend::{
        BackendJobFactory,
        BackendJobHandle,
        Completion,
        JobId,
    },
    outcome::{
        ImportOutcome,
        JobResult,
    },
    progress::{
        self,
        ProgressEvent,
        ProgressSender,
    },
    types::{
        ImportSource,
        JobKind,
        Protocol,
    },
};

/// A job owned by the scheduler.
pub struct ImportJob {
    pub id: JobId,
    pub label: String,
    pub protocol: Protocol,
    pub kind: JobKind,
    file: Option<PathBuf>,
    source: Arc<ImportSource>,
    handle: BackendJobHandle,
}

impl ImportJob {
    /// Turns the job into its outcome.
    fn into_outcome(self, result: JobResult) -> ImportOutcome {
        ImportOutcome::new(self.label, self.protocol, self.kind, self.file,
                           result)
    }
}

/// What happened to a submitted source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// A local job was queued.  It may already be running.
    Queued(JobId),

    /// An external job was started.
    Started(JobId),

    /// A job was created, but the backend refused to start it.  Its
    /// outcome has been recorded.
    Failed(JobId),

    /// No job was created.  An outcome explaining why has been
    /// recorded.
    Rejected,
}

impl Submitted {
    /// Returns whether a job is now pending or running.
    pub fn is_active(&self) -> bool {
        matches!(self, Submitted::Queued(_) | Submitted::Started(_))
    }
}

/// Where the scheduler stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Jobs are running.
    Busy,

    /// Nothing to do, but the caller may still submit sources.
    Waiting,

    /// Nothing to do, and nothing more will come.
    Drained,
}

/// Owns the pending queue and the running set of one run.
pub struct JobScheduler {
    factory: Arc<dyn BackendJobFactory>,
    completions: mpsc::UnboundedSender<Completion>,
    progress: Option<ProgressSender>,

    pending: VecDeque<ImportJob>,
    running: BTreeMap<JobId, ImportJob>,

    /// Protocols whose backend turned out to be unavailable.  Only
    /// ever grows.
    disabled_protocols: BTreeSet<Protocol>,

    accepting_more: bool,
    canceled: bool,
    next_id: JobId,
}

impl JobScheduler {
    /// Returns a scheduler for a new run.
    ///
    /// The wave starts out open: the caller is expected to submit
    /// sources, then call [`JobScheduler::set_accepting_more`] with
    /// `false`.
    pub fn new(factory: Arc<dyn BackendJobFactory>,
               completions: mpsc::UnboundedSender<Completion>)
               -> Self
    {
        JobScheduler {
            factory,
            completions,
            progress: None,
            pending: Default::default(),
            running: Default::default(),
            disabled_protocols: Default::default(),
            accepting_more: true,
            canceled: false,
            next_id: 0,
        }
    }

    /// Sends progress events to `progress`.
    pub fn set_progress(&mut self, progress: Option<ProgressSender>) {
        self.progress = progress;
    }

    /// Returns whether the caller may still submit sources.
    pub fn accepting_more(&self) -> bool {
        self.accepting_more
    }

    /// Opens or closes the current wave.
    pub fn set_accepting_more(&mut self, accepting: bool,
                              results: &mut ResultAggregator)
                              -> DrainState
    {
        if self.canceled {
            return self.state();
        }

        self.accepting_more = accepting;
        self.drain_if_idle(results)
    }

    /// Returns the number of queued jobs.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns the number of running jobs.
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Returns the number of jobs created so far.
    pub fn jobs_created(&self) -> usize {
        self.next_id as usize
    }

    /// Returns whether `protocol` has been disabled for this run.
    pub fn is_disabled(&self, protocol: Protocol) -> bool {
        self.disabled_protocols.contains(&protocol)
    }

    /// Returns whether `cancel_all` was called.
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Returns the current state without changing anything.
    pub fn state(&self) -> DrainState {
        if ! self.running.is_empty() || ! self.pending.is_empty() {
            DrainState::Busy
        } else if self.accepting_more {
            DrainState::Waiting
        } else {
            DrainState::Drained
        }
    }

    /// Submits a source for import using `protocol`.
    pub fn submit(&mut self, source: ImportSource, protocol: Protocol,
                  results: &mut ResultAggregator)
                  -> Submitted
    {
        let kind = source.kind();
        let label = source.label().to_string();
        let file = source.file().map(Path::to_path_buf);

        if self.canceled {
            tracing::debug!(%label, "run canceled, not importing");
            results.record(ImportOutcome::with_error(
                label, protocol, kind, file, ImportError::Canceled));
            return Submitted::Rejected;
        }

        if self.disabled_protocols.contains(&protocol) {
            tracing::debug!(%label, %protocol,
                            "protocol disabled for this run, not importing");
            results.record(ImportOutcome::with_error(
                label, protocol, kind, file,
                ImportError::Unavailable(protocol)));
            return Submitted::Rejected;
        }

        let job = match self.factory.create(protocol, kind) {
            Some(job) => job,
            None => {
                tracing::warn!(%protocol, "no backend available, \
                                           disabling the protocol for \
                                           this run");
                self.disabled_protocols.insert(protocol);
                results.record(ImportOutcome::with_error(
                    label, protocol, kind, file,
                    ImportError::Unavailable(protocol)));
                return Submitted::Rejected;
            }
        };

        self.next_id += 1;
        let id = self.next_id;
        let job = ImportJob {
            id,
            label,
            protocol,
            kind,
            file,
            source: Arc::new(source),
            handle: BackendJobHandle::new(job),
        };

        match kind {
            JobKind::Local => {
                tracing::debug!(job = id, label = %job.label, "queued job");
                progress::notify(&self.progress, ProgressEvent::JobQueued {
                    label: job.label.clone(),
                });
                self.pending.push_back(job);
                self.drain_if_idle(results);
                Submitted::Queued(id)
            }
            JobKind::External => match self.start(job) {
                Ok(()) => Submitted::Started(id),
                Err(outcome) => {
                    results.record(outcome);
                    Submitted::Failed(id)
                }
            },
        }
    }

    /// Starts a job, and moves it to the running set.
    ///
    /// If the backend refuses to start it, returns the job's outcome.
    fn start(&mut self, mut job: ImportJob) -> Result<(), ImportOutcome> {
        let source = job.source.clone();
        match job.handle.start(job.id, source, self.completions.clone()) {
            Ok(()) => {
                tracing::debug!(job = job.id, label = %job.label,
                                kind = %job.kind, "started job");
                progress::notify(&self.progress, ProgressEvent::JobStarted {
                    label: job.label.clone(),
                    kind: job.kind,
                });
                self.running.insert(job.id, job);
                Ok(())
            }
            Err(err) => {
                tracing::debug!(job = job.id, label = %job.label,
                                "backend refused to start job: {}", err);
                progress::notify(&self.progress, ProgressEvent::JobFinished {
                    label: job.label.clone(),
                    failed: true,
                });
                Err(job.into_outcome(JobResult::failed(err)))
            }
        }
    }

    /// Records a job's outcome, and starts the next queued job if
    /// possible.
    ///
    /// Completions of jobs that are no longer tracked (because they
    /// were canceled) are ignored.
    pub fn on_job_completed(&mut self, completion: Completion,
                            results: &mut ResultAggregator)
                            -> DrainState
    {
        self.record_completion(completion, results);
        self.drain_if_idle(results)
    }

    fn record_completion(&mut self, completion: Completion,
                         results: &mut ResultAggregator)
    {
        let Some(job) = self.running.remove(&completion.id) else {
            tracing::debug!(job = completion.id,
                            "ignoring completion of an untracked job");
            return;
        };

        let outcome = job.into_outcome(completion.result);
        tracing::debug!(job = completion.id, label = %outcome.label,
                        error = ?outcome.error, "job completed");
        progress::notify(&self.progress, ProgressEvent::JobFinished {
            label: outcome.label.clone(),
            failed: outcome.is_failed(),
        });
        results.record(outcome);
    }

    /// Returns whether a local job is running.
    fn local_running(&self) -> bool {
        self.running.values().any(|job| job.kind == JobKind::Local)
    }

    /// Starts the next queued job if no local job is running.
    ///
    /// External jobs do not hold back the queue.  The scheduler is
    /// only drained once nothing at all is running.
    pub fn drain_if_idle(&mut self, results: &mut ResultAggregator)
                         -> DrainState
    {
        if ! self.local_running() {
            while let Some(job) = self.pending.pop_front() {
                match self.start(job) {
                    Ok(()) => break,
                    Err(outcome) => results.record(outcome),
                }
            }
        }

        self.state()
    }

    /// Cancels every job.
    ///
    /// `delivered` are completions that arrived before the
    /// cancellation was observed.  These jobs keep their real
    /// outcome.  Every other running job is asked to cancel, and gets
    /// a canceled outcome, as does every queued job.  Afterwards,
    /// nothing is pending or running, and further submissions are
    /// rejected.
    pub fn cancel_all(&mut self, delivered: Vec<Completion>,
                      results: &mut ResultAggregator)
                      -> DrainState
    {
        for completion in delivered {
            self.record_completion(completion, results);
        }

        self.canceled = true;
        self.accepting_more = false;

        let running = std::mem::take(&mut self.running);
        for (id, job) in running {
            tracing::debug!(job = id, label = %job.label, "canceling job");
            job.handle.cancel();
            progress::notify(&self.progress, ProgressEvent::JobFinished {
                label: job.label.clone(),
                failed: false,
            });
            results.record(job.into_outcome(JobResult::canceled()));
        }

        for job in self.pending.drain(..) {
            tracing::debug!(job = job.id, label = %job.label,
                            "discarding queued job");
            results.record(job.into_outcome(JobResult::canceled()));
        }

        self.state()
    }
}
