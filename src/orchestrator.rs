//! Drives a run from the first submission to the final report.
//!
//! The [`Orchestrator`] is a single task owning all state of a run.
//! Callers talk to it through an [`OrchestratorHandle`], backend jobs
//! report back through a completion channel.  A run goes through
//! these phases:
//!
//!   1. Waves: sources are submitted and imported.  Once the initial
//!      wave drained, a single follow-up wave may fetch missing
//!      signer keys.
//!   2. Barrier: the certificate cache is relisted.
//!   3. Groups bundled in imported files are imported.
//!   4. Finalization: ownertrust and certification prompts, then the
//!      summary is returned.
//!
//! Cancellation is honored in every phase.

use std::future::Future;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    ImportError,
    Result,
    aggregator::{
        Report,
        ResultAggregator,
    },
    backend::{
        BackendJobFactory,
        Completion,
    },
    barrier::{
        self,
        CacheRefreshBarrier,
        Verdict,
    },
    cache::KeyCache,
    config::ImportSettings,
    convergence::{
        self,
        Convergence,
        SignerKeyConvergence,
    },
    finalize::{
        self,
        NoPrompts,
        PromptAnswer,
        Prompter,
    },
    groups::{
        GroupImporter,
        GroupParser,
        NoGroups,
    },
    outcome::ImportOutcome,
    progress::{
        self,
        ProgressEvent,
        ProgressSender,
    },
    scheduler::{
        DrainState,
        JobScheduler,
    },
    types::{
        ImportSource,
        ImportedGroup,
        JobKind,
        KeyId,
        Protocol,
        WaveKind,
    },
};

/// Requests sent from handles to the orchestrator.
#[derive(Debug)]
enum Command {
    Submit(ImportSource, Protocol),
    Unreadable {
        path: PathBuf,
        protocol: Protocol,
        error: ImportError,
    },
    SetAcceptingMore(bool),
    Cancel,
}

/// Talks to a running [`Orchestrator`].
///
/// Handles can be cloned freely.  Once every handle is dropped, the
/// orchestrator stops waiting for more sources.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command)
            .map_err(|_| anyhow::anyhow!("The import run is over"))
    }

    /// Submits a source for import using `protocol`.
    pub fn submit(&self, source: ImportSource, protocol: Protocol)
                  -> Result<()>
    {
        self.send(Command::Submit(source, protocol))
    }

    /// Reads `path`, and submits its content for import.
    ///
    /// The protocol is guessed from the file's extension.  If the
    /// file cannot be read, an error outcome labelled with the path is
    /// recorded instead.
    pub fn submit_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        match ImportSource::from_file(path) {
            Ok(source) => {
                let protocol = source.protocol();
                self.submit(source, protocol)
            }
            Err(err) => self.send(Command::Unreadable {
                path: path.to_path_buf(),
                protocol: Protocol::for_path(path),
                error: ImportError::backend(err),
            }),
        }
    }

    /// Tells the orchestrator whether more sources will follow.
    ///
    /// Until this is set to `false` (or every handle is dropped), the
    /// run will not finish.
    pub fn set_accepting_more(&self, accepting: bool) -> Result<()> {
        self.send(Command::SetAcceptingMore(accepting))
    }

    /// Cancels the run.
    pub fn cancel(&self) -> Result<()> {
        self.send(Command::Cancel)
    }

    /// Submits a batch of sources, and closes the wave.
    pub fn start<I>(&self, sources: I) -> Result<()>
    where
        I: IntoIterator<Item = (ImportSource, Protocol)>,
    {
        self.set_accepting_more(true)?;
        for (source, protocol) in sources {
            self.submit(source, protocol)?;
        }
        self.set_accepting_more(false)
    }
}

/// The result of a run that was not canceled.
#[derive(Debug)]
pub struct ImportSummary {
    pub report: Report,
    pub audit_log: String,
    pub outcomes: Vec<ImportOutcome>,
    pub groups: Vec<ImportedGroup>,

    /// Whether certification was offered instead of showing the
    /// report.
    pub certification_offered: bool,

    /// Whether the report is worth showing.
    pub show_report: bool,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Finished(ImportSummary),
    Canceled,
}

/// Owns the state of one run.
pub struct Orchestrator {
    settings: ImportSettings,
    cache: Arc<dyn KeyCache>,
    group_parser: Box<dyn GroupParser>,
    prompter: Box<dyn Prompter>,
    progress: Option<ProgressSender>,

    commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedReceiver<Completion>,

    scheduler: JobScheduler,
    results: ResultAggregator,
    convergence: SignerKeyConvergence,
    barrier: CacheRefreshBarrier,

    wave: WaveKind,
    cancel_requested: bool,

    /// Whether every handle was dropped.
    handles_gone: bool,
}

impl Orchestrator {
    /// Returns an orchestrator for a new run, and a handle to feed it.
    ///
    /// The run starts out accepting sources.
    pub fn new(settings: ImportSettings,
               factory: Arc<dyn BackendJobFactory>,
               cache: Arc<dyn KeyCache>)
               -> (Self, OrchestratorHandle)
    {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();

        let orchestrator = Orchestrator {
            convergence: SignerKeyConvergence::new(
                settings.retrieve_signer_keys),
            settings,
            cache,
            group_parser: Box::new(NoGroups),
            prompter: Box::new(NoPrompts),
            progress: None,
            commands,
            completions,
            scheduler: JobScheduler::new(factory, completions_tx),
            results: ResultAggregator::new(),
            barrier: CacheRefreshBarrier::new(),
            wave: WaveKind::Initial,
            cancel_requested: false,
            handles_gone: false,
        };

        (orchestrator, OrchestratorHandle { commands: commands_tx })
    }

    /// Parses groups bundled in imported files with `parser`.
    pub fn with_group_parser<P>(mut self, parser: P) -> Self
    where
        P: GroupParser + 'static,
    {
        self.group_parser = Box::new(parser);
        self
    }

    /// Asks questions using `prompter`.
    pub fn with_prompter<P>(mut self, prompter: P) -> Self
    where
        P: Prompter + 'static,
    {
        self.prompter = Box::new(prompter);
        self
    }

    /// Sends progress events to `progress`.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.scheduler.set_progress(Some(progress.clone()));
        self.progress = Some(progress);
        self
    }

    /// Runs to completion.
    pub async fn run(mut self) -> RunOutcome {
        self.run_waves().await;

        progress::notify(&self.progress, ProgressEvent::Relisting);
        let relist = self.barrier.enter(&*self.cache);
        self.await_with_commands(relist, false).await;
        tracing::debug!("cache relisted");

        if barrier::verdict(&self.results, self.cancel_requested)
            == Verdict::Canceled
        {
            tracing::debug!("import canceled");
            return RunOutcome::Canceled;
        }

        let cms = barrier::external_cms_imports(&self.results);
        if ! cms.is_empty() {
            tracing::debug!("revalidating {} S/MIME certificates", cms.len());
            let revalidation = self.cache.revalidate(&cms);
            self.await_with_commands(revalidation, false).await;
        }

        let groups = GroupImporter::new(&*self.group_parser, &*self.cache)
            .import(self.results.outcomes());
        for group in groups {
            self.results.record_group(group);
        }

        progress::notify(&self.progress, ProgressEvent::Finalizing);
        let certification_offered = self.prompt().await;

        let report = self.results.build_report();
        let audit_log = self.results.consolidated_audit_log();
        let show_report =
            finalize::show_report(certification_offered, &self.results);
        let (outcomes, groups) = self.results.into_parts();

        RunOutcome::Finished(ImportSummary {
            report,
            audit_log,
            outcomes,
            groups,
            certification_offered,
            show_report,
        })
    }

    /// Processes commands and completions until every wave drained.
    async fn run_waves(&mut self) {
        loop {
            if self.scheduler.state() == DrainState::Drained {
                if self.cancel_requested {
                    break;
                }

                match self.convergence.on_drained(self.wave, &self.results,
                                                  &*self.cache)
                {
                    Convergence::FollowUp(ids) => self.start_follow_up(ids),
                    Convergence::Done => break,
                }
                continue;
            }

            tokio::select! {
                command = self.commands.recv(), if ! self.handles_gone =>
                    self.on_command(command),
                Some(completion) = self.completions.recv() => {
                    self.scheduler.on_job_completed(completion,
                                                    &mut self.results);
                }
            }
        }
    }

    fn on_command(&mut self, command: Option<Command>) {
        match command {
            None => {
                tracing::debug!("all handles dropped, closing the wave");
                self.handles_gone = true;
                self.scheduler.set_accepting_more(false, &mut self.results);
            }
            Some(Command::Submit(source, protocol)) =>
                self.submit(source, protocol),
            Some(Command::Unreadable { path, protocol, error }) => {
                tracing::debug!("{}: {}", path.display(), error);
                self.results.record(ImportOutcome::with_error(
                    path.display().to_string(), protocol, JobKind::Local,
                    Some(path), error));
            }
            Some(Command::SetAcceptingMore(accepting)) => {
                self.scheduler.set_accepting_more(accepting,
                                                  &mut self.results);
            }
            Some(Command::Cancel) => self.cancel(),
        }
    }

    fn submit(&mut self, source: ImportSource, protocol: Protocol) {
        let submitted = self.scheduler.submit(source, protocol,
                                              &mut self.results);
        if submitted.is_active() {
            self.barrier.acquire(&*self.cache);
        }
    }

    /// Fetches the given signer keys in a follow-up wave.
    fn start_follow_up(&mut self, ids: Vec<KeyId>) {
        debug_assert_eq!(self.wave, WaveKind::Initial);
        self.wave = WaveKind::SignerKeyFollowUp;

        self.scheduler.set_accepting_more(true, &mut self.results);
        for source in convergence::follow_up_sources(ids) {
            self.submit(source, Protocol::OpenPGP);
        }
        self.scheduler.set_accepting_more(false, &mut self.results);
    }

    fn cancel(&mut self) {
        if self.cancel_requested {
            return;
        }
        tracing::debug!("canceling the import");
        self.cancel_requested = true;

        let mut delivered = vec![];
        while let Ok(completion) = self.completions.try_recv() {
            delivered.push(completion);
        }
        self.scheduler.cancel_all(delivered, &mut self.results);
    }

    /// Awaits `future` while handling commands.
    ///
    /// Once every wave drained, there is nothing left to cancel, and
    /// submissions are too late.  If `abort_on_cancel` is set, a
    /// cancellation drops `future`, and `None` is returned.
    async fn await_with_commands<F>(&mut self, future: F,
                                    abort_on_cancel: bool)
                                    -> Option<F::Output>
    where
        F: Future,
    {
        tokio::pin!(future);
        loop {
            if abort_on_cancel && self.cancel_requested {
                return None;
            }

            tokio::select! {
                output = &mut future => return Some(output),
                command = self.commands.recv(), if ! self.handles_gone =>
                    self.on_late_command(command),
            }
        }
    }

    fn on_late_command(&mut self, command: Option<Command>) {
        match command {
            None => self.handles_gone = true,
            Some(Command::Submit(source, _)) => tracing::warn!(
                "{}: submitted after the import finished, ignoring",
                source.label()),
            Some(Command::Unreadable { path, .. }) => tracing::warn!(
                "{}: submitted after the import finished, ignoring",
                path.display()),
            Some(Command::SetAcceptingMore(_)) => (),
            Some(Command::Cancel) => {
                tracing::debug!("canceling the import");
                self.cancel_requested = true;
            }
        }
    }

    /// Asks the ownertrust and certification questions.
    ///
    /// Returns whether certification was offered.
    async fn prompt(&mut self) -> bool {
        let mut prompter = mem::replace(&mut self.prompter,
                                        Box::new(NoPrompts));

        if self.settings.ask_ownertrust {
            let candidates =
                finalize::ownertrust_candidates(&self.results, &*self.cache);
            for cert in candidates {
                let answer = self.await_with_commands(
                    prompter.ask_ownertrust(&cert), true).await;
                match answer {
                    Some(PromptAnswer::Accepted) => (),
                    Some(PromptAnswer::Declined) => {
                        tracing::debug!("ownertrust declined, not asking \
                                         again");
                        break;
                    }
                    None => break,
                }
            }
        }

        let mut certification_offered = false;
        if self.settings.offer_certification && ! self.cancel_requested {
            if let Some(cert) =
                finalize::certification_candidate(&self.results, &*self.cache)
            {
                certification_offered = true;
                self.await_with_commands(
                    prompter.offer_certification(&cert), true).await;
            }
        }

        self.prompter = prompter;
        certification_offered
    }
}
