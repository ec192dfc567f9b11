#![allow(unused)]

//! Scripted stand-ins for the backend, the cache, and the user.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use sequoia_import::{
    ImportError,
    JobResult,
    Result,
    backend::{
        BackendJob,
        BackendJobFactory,
        CancelToken,
        JobFuture,
    },
    cache::{
        CachedCert,
        CachedUserId,
        KeyCache,
        OwnerTrust,
        RefreshLease,
        Validity,
    },
    finalize::{
        PromptAnswer,
        Prompter,
    },
    groups::GroupParser,
    types::{
        Counts,
        Fingerprint,
        ImportStatus,
        ImportedCertRecord,
        JobKind,
        KeyGroup,
        KeyId,
        Protocol,
    },
};

/// Yields to other tasks until `f` returns true.
///
/// Panics if that doesn't happen within a reasonable number of
/// rounds.
pub async fn wait_until<F: Fn() -> bool>(f: F) {
    for _ in 0..10_000 {
        if f() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

/// Returns a result for a job that imported the given certificates.
pub fn imported(fprs: &[(&str, ImportStatus)]) -> JobResult {
    let mut counts = Counts {
        considered: fprs.len(),
        ..Default::default()
    };
    let imports = fprs.iter().map(|(fpr, status)| {
        match status {
            ImportStatus::NewKey => counts.imported += 1,
            ImportStatus::Unchanged => counts.unchanged += 1,
            _ => (),
        }
        ImportedCertRecord::new(*fpr, *status)
    }).collect();

    JobResult {
        counts,
        imports,
        error: None,
        audit_log: format!("imported {} certificates\n", fprs.len()),
    }
}

/// Returns a result for a job that found nothing.
pub fn no_data() -> JobResult {
    JobResult {
        counts: Counts {
            considered: 1,
            ..Default::default()
        },
        error: Some(ImportError::NoData),
        ..Default::default()
    }
}

/// How a scripted job behaves.
#[derive(Debug, Clone)]
pub enum Script {
    /// Completes right away.
    Complete(JobResult),

    /// Completes when the test calls [`MockFactory::finish`], or
    /// when canceled.
    Manual,

    /// Refuses to start.
    Refuse,
}

#[derive(Default)]
struct FactoryState {
    unavailable: BTreeSet<Protocol>,
    scripts: BTreeMap<String, Script>,
    create_calls: Vec<(Protocol, JobKind)>,
    started: Vec<String>,
    running: BTreeMap<JobKind, usize>,
    max_running_local: usize,
    manual: BTreeMap<String, oneshot::Sender<JobResult>>,
    canceled: Vec<String>,
    finished: Vec<String>,
}

/// A backend whose jobs follow a script keyed by source label.
///
/// Sources without a script complete right away without importing
/// anything.
#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the backend for `protocol` unavailable.
    pub fn unavailable(self, protocol: Protocol) -> Self {
        self.state.lock().unwrap().unavailable.insert(protocol);
        self
    }

    /// Scripts the job importing the source labelled `label`.
    pub fn script(self, label: &str, script: Script) -> Self {
        self.state.lock().unwrap().scripts.insert(label.into(), script);
        self
    }

    /// Finishes the manual job labelled `label`.
    ///
    /// Returns whether the job was waiting.
    pub fn finish(&self, label: &str, result: JobResult) -> bool {
        let tx = self.state.lock().unwrap().manual.remove(label);
        tx.map(|tx| tx.send(result).is_ok()).unwrap_or(false)
    }

    /// Returns whether a manual job labelled `label` is waiting.
    pub fn is_waiting(&self, label: &str) -> bool {
        self.state.lock().unwrap().manual.contains_key(label)
    }

    /// Returns how often the factory was asked for a job.
    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls.len()
    }

    /// Returns the labels of the started jobs, in order.
    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    /// Returns the labels of the jobs that observed a cancellation.
    pub fn canceled(&self) -> Vec<String> {
        self.state.lock().unwrap().canceled.clone()
    }

    /// Returns the labels of the jobs whose future completed.
    pub fn finished(&self) -> Vec<String> {
        self.state.lock().unwrap().finished.clone()
    }

    /// Returns the maximum number of local jobs that ran at once.
    pub fn max_running_local(&self) -> usize {
        self.state.lock().unwrap().max_running_local
    }
}

impl BackendJobFactory for MockFactory {
    fn create(&self, protocol: Protocol, kind: JobKind)
              -> Option<Box<dyn BackendJob>>
    {
        let mut state = self.state.lock().unwrap();
        state.create_calls.push((protocol, kind));
        if state.unavailable.contains(&protocol) {
            return None;
        }

        Some(Box::new(MockJob {
            state: self.state.clone(),
            kind,
        }))
    }
}

struct MockJob {
    state: Arc<Mutex<FactoryState>>,
    kind: JobKind,
}

impl MockJob {
    fn finished(state: &Mutex<FactoryState>, kind: JobKind, label: String) {
        let mut state = state.lock().unwrap();
        *state.running.entry(kind).or_default() -= 1;
        state.finished.push(label);
    }
}

impl BackendJob for MockJob {
    fn start(self: Box<Self>, source: Arc<sequoia_import::ImportSource>,
             cancel: CancelToken)
             -> std::result::Result<JobFuture, ImportError>
    {
        let label = source.label().to_string();
        let kind = self.kind;
        let state = self.state;

        let (script, manual) = {
            let mut s = state.lock().unwrap();
            let script = s.scripts.get(&label).cloned()
                .unwrap_or(Script::Complete(JobResult::default()));
            if let Script::Refuse = script {
                return Err(ImportError::Backend("refused".into()));
            }

            s.started.push(label.clone());
            let running = {
                let r = s.running.entry(kind).or_default();
                *r += 1;
                *r
            };
            if kind == JobKind::Local {
                s.max_running_local = s.max_running_local.max(running);
            }

            let manual = if let Script::Manual = script {
                let (tx, rx) = oneshot::channel();
                s.manual.insert(label.clone(), tx);
                Some(rx)
            } else {
                None
            };
            (script, manual)
        };

        Ok(Box::pin(async move {
            let result = match (script, manual) {
                (_, Some(rx)) => tokio::select! {
                    result = rx => result.unwrap_or_default(),
                    _ = cancel.canceled() => {
                        state.lock().unwrap().canceled.push(label.clone());
                        JobResult::canceled()
                    }
                },
                (Script::Complete(result), None) => result,
                (_, None) => JobResult::default(),
            };

            MockJob::finished(&state, kind, label);
            result
        }))
    }
}

#[derive(Default)]
struct CacheState {
    certs: BTreeMap<Fingerprint, CachedCert>,
    keys: BTreeSet<KeyId>,
    groups: BTreeMap<String, KeyGroup>,
    leases: usize,
    leases_acquired: usize,
    relists: usize,
    relisted_while_leased: bool,
    revalidated: Vec<Fingerprint>,
}

/// An in-memory certificate cache.
#[derive(Clone, Default)]
pub struct MockCache {
    state: Arc<Mutex<CacheState>>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a certificate.
    pub fn insert(&self, cert: CachedCert) {
        let mut state = self.state.lock().unwrap();
        state.keys.insert(cert.key_id());
        state.certs.insert(cert.fingerprint.clone(), cert);
    }

    /// Adds a bare key ID, as if a certificate with that key existed.
    pub fn insert_key(&self, id: &str) {
        self.state.lock().unwrap().keys.insert(KeyId::new(id));
    }

    pub fn relists(&self) -> usize {
        self.state.lock().unwrap().relists
    }

    pub fn relisted_while_leased(&self) -> bool {
        self.state.lock().unwrap().relisted_while_leased
    }

    pub fn leases_acquired(&self) -> usize {
        self.state.lock().unwrap().leases_acquired
    }

    pub fn leases_held(&self) -> usize {
        self.state.lock().unwrap().leases
    }

    pub fn revalidated(&self) -> Vec<Fingerprint> {
        self.state.lock().unwrap().revalidated.clone()
    }

    pub fn group(&self, id: &str) -> Option<KeyGroup> {
        self.state.lock().unwrap().groups.get(id).cloned()
    }

    pub fn insert_existing_group(&self, group: KeyGroup) {
        self.state.lock().unwrap().groups.insert(group.id.clone(), group);
    }
}

impl KeyCache for MockCache {
    fn resolve(&self, fingerprints: &[Fingerprint]) -> Vec<CachedCert> {
        let state = self.state.lock().unwrap();
        fingerprints.iter()
            .filter_map(|f| state.certs.get(f).cloned())
            .collect()
    }

    fn contains_key(&self, id: &KeyId) -> bool {
        self.state.lock().unwrap().keys.contains(id)
    }

    fn suspend_auto_refresh(&self) -> RefreshLease {
        {
            let mut state = self.state.lock().unwrap();
            state.leases += 1;
            state.leases_acquired += 1;
        }

        let state = self.state.clone();
        RefreshLease::new(move || state.lock().unwrap().leases -= 1)
    }

    fn relist_all(&self) -> BoxFuture<'static, ()> {
        let mut state = self.state.lock().unwrap();
        state.relists += 1;
        if state.leases > 0 {
            state.relisted_while_leased = true;
        }
        Box::pin(async {
            tokio::task::yield_now().await;
        })
    }

    fn revalidate(&self, fingerprints: &[Fingerprint])
                  -> BoxFuture<'static, ()>
    {
        self.state.lock().unwrap().revalidated.extend_from_slice(fingerprints);
        Box::pin(async {})
    }

    fn has_group(&self, id: &str) -> bool {
        self.state.lock().unwrap().groups.contains_key(id)
    }

    fn insert_group(&self, group: KeyGroup) -> Result<()> {
        self.state.lock().unwrap().groups.insert(group.id.clone(), group);
        Ok(())
    }

    fn update_group(&self, group: KeyGroup) -> Result<()> {
        self.insert_group(group)
    }
}

/// Returns a certificate as seen by the cache.
pub fn cached_cert(fpr: &str, has_secret: bool, validity: Validity,
                   certifiers: &[&str])
                   -> CachedCert
{
    CachedCert {
        fingerprint: Fingerprint::new(fpr),
        protocol: Protocol::OpenPGP,
        has_secret,
        ownertrust: OwnerTrust::Unknown,
        expired: false,
        revoked: false,
        userids: vec![CachedUserId {
            userid: "<alice@example.org>".into(),
            validity,
            certifiers: certifiers.iter().map(KeyId::new).collect(),
        }],
    }
}

#[derive(Default)]
struct PrompterState {
    answers: Vec<PromptAnswer>,
    ownertrust_asked: Vec<Fingerprint>,
    certification_offered: Vec<Fingerprint>,
}

/// Answers questions from a script, and records them.
///
/// Once the scripted answers run out, questions are declined.
#[derive(Clone, Default)]
pub struct MockPrompter {
    state: Arc<Mutex<PrompterState>>,
}

impl MockPrompter {
    pub fn new(answers: Vec<PromptAnswer>) -> Self {
        MockPrompter {
            state: Arc::new(Mutex::new(PrompterState {
                answers,
                ..Default::default()
            })),
        }
    }

    pub fn ownertrust_asked(&self) -> Vec<Fingerprint> {
        self.state.lock().unwrap().ownertrust_asked.clone()
    }

    pub fn certification_offered(&self) -> Vec<Fingerprint> {
        self.state.lock().unwrap().certification_offered.clone()
    }
}

impl Prompter for MockPrompter {
    fn ask_ownertrust<'a>(&'a mut self, cert: &'a CachedCert)
                          -> BoxFuture<'a, PromptAnswer>
    {
        let mut state = self.state.lock().unwrap();
        state.ownertrust_asked.push(cert.fingerprint.clone());
        let answer = if state.answers.is_empty() {
            PromptAnswer::Declined
        } else {
            state.answers.remove(0)
        };
        Box::pin(async move { answer })
    }

    fn offer_certification<'a>(&'a mut self, cert: &'a CachedCert)
                               -> BoxFuture<'a, ()>
    {
        self.state.lock().unwrap().certification_offered
            .push(cert.fingerprint.clone());
        Box::pin(async {})
    }
}

/// Finds groups by file path.
#[derive(Clone, Default)]
pub struct MockGroupParser {
    groups: BTreeMap<PathBuf, Vec<KeyGroup>>,
}

impl MockGroupParser {
    pub fn with(mut self, path: &str, groups: Vec<KeyGroup>) -> Self {
        self.groups.insert(PathBuf::from(path), groups);
        self
    }
}

impl GroupParser for MockGroupParser {
    fn parse_groups_from_file(&self, path: &Path) -> Result<Vec<KeyGroup>> {
        Ok(self.groups.get(path).cloned().unwrap_or_default())
    }
}
