//! Progress notifications.

use tokio::sync::mpsc;

use crate::types::JobKind;

/// Progress of a run, for display purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A local job was queued.
    JobQueued { label: String },

    /// A job was started.
    JobStarted { label: String, kind: JobKind },

    /// A job delivered its outcome.
    JobFinished { label: String, failed: bool },

    /// All jobs are done, waiting for the cache to relist.
    Relisting,

    /// Results are final, prompts and report follow.
    Finalizing,
}

/// Where progress events go.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Sends an event, if anybody is listening.
pub(crate) fn notify(progress: &Option<ProgressSender>, event: ProgressEvent) {
    if let Some(p) = progress {
        let _ = p.send(event);
    }
}
