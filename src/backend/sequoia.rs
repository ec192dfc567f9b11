//! A backend importing into a cert-d, and fetching from keyservers.
//!
//! Only OpenPGP is supported: S/MIME jobs are structurally
//! unavailable.  Secret key material is not imported, only the
//! certificates.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinSet;

use sequoia_openpgp as openpgp;
use openpgp::{
    Cert,
    KeyHandle,
    KeyID,
    Packet,
    cert::CertParser,
    parse::Parse,
    policy::StandardPolicy,
    types::RevocationStatus,
};
use sequoia_net as net;
use net::KeyServer;

use sequoia_cert_store as cert_store;
use cert_store::{
    CertStore,
    LazyCert,
    Store,
    StoreUpdate,
    store::MergePublicCollectStats,
};

use crate::{
    ImportError,
    Result,
    backend::{
        BackendJob,
        BackendJobFactory,
        CancelToken,
        JobFuture,
    },
    outcome::JobResult,
    types::{
        Counts,
        ImportSource,
        ImportStatus,
        ImportedCertRecord,
        JobKind,
        Protocol,
    },
};

/// User agent for http communications.
pub const USER_AGENT: &str = concat!("sq-import/", env!("CARGO_PKG_VERSION"));

/// How long to wait for the initial http connection.
pub const CONNECT_TIMEOUT: Duration = Duration::new(5, 0);

/// How long to wait for each individual http request.
pub const REQUEST_TIMEOUT: Duration = Duration::new(5, 0);

/// Makes a http client.
pub fn http_client() -> Result<net::reqwest::Client> {
    Ok(net::reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

/// Opens the cert-d at `path`, creating it if necessary.
pub fn open_cert_store(path: &Path) -> Result<CertStore<'static>> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Creating the directory {:?}", path))?;
    CertStore::open(path)
        .with_context(|| format!("While opening the certificate store at {:?}",
                                 path))
}

struct Inner {
    cert_store: PathBuf,
    keyservers: Vec<Arc<KeyServer>>,
    policy: StandardPolicy<'static>,
}

/// Creates jobs importing into a cert-d.
#[derive(Clone)]
pub struct SequoiaBackend {
    inner: Arc<Inner>,
}

impl SequoiaBackend {
    /// Returns a backend importing into the cert-d at `cert_store`,
    /// and fetching from `keyservers`.
    pub fn new<P, S>(cert_store: P, keyservers: &[S]) -> Result<Self>
    where
        P: AsRef<Path>,
        S: AsRef<str>,
    {
        let http_client = http_client()?;
        let keyservers = keyservers.iter().map(
            |uri| KeyServer::with_client(uri.as_ref(), http_client.clone())
                .with_context(|| format!("Malformed keyserver URI: {}",
                                         uri.as_ref()))
                .map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        Ok(SequoiaBackend {
            inner: Arc::new(Inner {
                cert_store: cert_store.as_ref().to_path_buf(),
                keyservers,
                policy: StandardPolicy::new(),
            }),
        })
    }
}

impl BackendJobFactory for SequoiaBackend {
    fn create(&self, protocol: Protocol, kind: JobKind)
              -> Option<Box<dyn BackendJob>>
    {
        match protocol {
            Protocol::OpenPGP => Some(Box::new(SequoiaJob {
                inner: self.inner.clone(),
                kind,
            })),
            Protocol::CMS => None,
        }
    }
}

struct SequoiaJob {
    inner: Arc<Inner>,
    kind: JobKind,
}

impl BackendJob for SequoiaJob {
    fn start(self: Box<Self>, source: Arc<ImportSource>, cancel: CancelToken)
             -> Result<JobFuture, ImportError>
    {
        let inner = self.inner;
        tracing::trace!(kind = %self.kind, label = source.label(),
                        "starting sequoia job");

        let handles = match &*source {
            ImportSource::RawData { .. } => None,
            ImportSource::KeyIdFetch { ids, .. } => Some(ids.iter()
                .map(|id| id.as_str().parse::<KeyID>().map(KeyHandle::from)
                     .with_context(|| format!("Malformed key ID: {}", id)))
                .collect::<Result<Vec<_>>>()?),
            ImportSource::KeyPush { keys, .. } => Some(keys.iter()
                .map(|fpr| fpr.as_str().parse::<openpgp::Fingerprint>()
                     .map(KeyHandle::from)
                     .with_context(|| format!("Malformed fingerprint: {}", fpr)))
                .collect::<Result<Vec<_>>>()?),
        };

        let Some(handles) = handles else {
            return Ok(Box::pin(import_blocking(
                inner, move || parse_certs(&source), cancel)));
        };

        if inner.keyservers.is_empty() {
            return Err(ImportError::Backend("No keyservers configured".into()));
        }

        Ok(Box::pin(fetch(inner, handles, cancel)))
    }
}

/// Parses the certificates in a raw data source.
///
/// Returns `None` if the data doesn't look like OpenPGP data at all.
fn parse_certs(source: &ImportSource) -> Option<Vec<Result<Cert>>> {
    let ImportSource::RawData { bytes, .. } = source else {
        return None;
    };

    if bytes.is_empty() {
        return None;
    }

    CertParser::from_bytes(&bytes[..]).ok().map(|p| p.collect())
}

/// Fetches certificates from every keyserver, and imports them.
async fn fetch(inner: Arc<Inner>, handles: Vec<KeyHandle>, cancel: CancelToken)
               -> JobResult
{
    let mut requests = JoinSet::new();
    for handle in handles {
        for ks in inner.keyservers.iter().cloned() {
            let handle = handle.clone();
            requests.spawn(async move {
                let results = ks.get(handle.clone()).await;
                (ks.url().as_str().to_string(), handle, results)
            });
        }
    }

    let mut log = String::new();
    let mut certs: BTreeMap<openpgp::Fingerprint, Cert> = BTreeMap::new();
    loop {
        let response = tokio::select! {
            _ = cancel.canceled() => {
                requests.abort_all();
                return JobResult::canceled();
            }
            response = requests.join_next() => response,
        };

        let (url, handle, results) = match response {
            None => break,
            Some(Ok(response)) => response,
            Some(Err(err)) => {
                let _ = writeln!(log, "Request failed: {}", err);
                continue;
            }
        };

        match results {
            Ok(returned) => for cert in returned {
                match cert {
                    Ok(cert) => merge_into(&mut certs, cert, &mut log),
                    Err(err) => {
                        let _ = writeln!(log, "{}: {}: {}", url, handle, err);
                    }
                }
            },
            Err(err) => {
                let _ = writeln!(log, "{}: {}: {}", url, handle, err);
            }
        }
    }

    if certs.is_empty() {
        let _ = writeln!(log, "No certificate found.");
        return JobResult {
            error: Some(ImportError::NoData),
            audit_log: log,
            ..Default::default()
        };
    }

    let certs = certs.into_values().map(Ok).collect::<Vec<_>>();
    let mut result = import_blocking(inner, move || Some(certs), cancel).await;
    log.push_str(&result.audit_log);
    result.audit_log = log;
    result
}

/// Merges `cert` into the certificates returned so far.
fn merge_into(certs: &mut BTreeMap<openpgp::Fingerprint, Cert>, cert: Cert,
              log: &mut String)
{
    let fpr = cert.fingerprint();
    match certs.remove(&fpr) {
        None => {
            certs.insert(fpr, cert);
        }
        Some(existing) => match existing.clone().merge_public(cert) {
            Ok(merged) => {
                certs.insert(fpr, merged);
            }
            Err(err) => {
                let _ = writeln!(log, "{}: {}", fpr, err);
                certs.insert(fpr, existing);
            }
        },
    }
}

/// Parses and imports certificates on the blocking thread pool.
async fn import_blocking<F>(inner: Arc<Inner>, certs: F, cancel: CancelToken)
                            -> JobResult
where
    F: FnOnce() -> Option<Vec<Result<Cert>>> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        match certs() {
            Some(certs) => import_certs(&inner, certs, &cancel),
            None => JobResult::failed(ImportError::NoData),
        }
    }).await;

    result.unwrap_or_else(|err| JobResult::failed(ImportError::backend(err)))
}

/// Imports certificates into the cert-d.
fn import_certs(inner: &Inner, certs: Vec<Result<Cert>>, cancel: &CancelToken)
                -> JobResult
{
    let cert_store = match open_cert_store(&inner.cert_store) {
        Ok(cert_store) => cert_store,
        Err(err) => return JobResult::failed(ImportError::backend(err)),
    };

    let mut result = JobResult::default();
    for cert in certs {
        if cancel.is_canceled() {
            result.error = Some(ImportError::Canceled);
            return result;
        }

        result.counts.considered += 1;
        let cert = match cert {
            Ok(cert) => cert,
            Err(err) => {
                result.counts.not_imported += 1;
                let _ = writeln!(result.audit_log, "Malformed certificate: {}",
                                 err);
                continue;
            }
        };

        let fpr = cert.fingerprint();
        let has_secret = cert.is_tsk();
        if has_secret {
            result.counts.secret_considered += 1;
        }

        let old = cert_store.lookup_by_cert_fpr(&fpr).ok()
            .and_then(|c| c.to_cert().ok().cloned());

        let stats = MergePublicCollectStats::new();
        let merged = cert_store.update_by(Arc::new(LazyCert::from(cert)),
                                          &stats)
            .and_then(|merged| merged.to_cert().cloned());
        let merged = match merged {
            Ok(merged) => merged,
            Err(err) => {
                result.counts.not_imported += 1;
                let _ = writeln!(result.audit_log, "{}: {}", fpr, err);
                continue;
            }
        };

        let mut status = classify(&inner.policy, &stats, old.as_ref(),
                                  &merged, &mut result.counts);
        if has_secret {
            status = ImportStatus::ContainedSecretKey;
        }

        tracing::debug!(%fpr, ?status, "imported certificate");
        let _ = writeln!(result.audit_log, "{}: {:?}", fpr, status);
        result.imports.push(
            ImportedCertRecord::new(fpr.to_hex(), status));
    }

    if result.counts.considered == 0 {
        result.error = Some(ImportError::NoData);
    }

    result
}

fn is_revoked(policy: &StandardPolicy, cert: &Cert) -> bool {
    matches!(cert.revocation_status(policy, None), RevocationStatus::Revoked(_))
}

fn signature_count(cert: &Cert) -> usize {
    cert.clone().into_packets()
        .filter(|p| matches!(p, Packet::Signature(_)))
        .count()
}

/// Classifies the merge of one certificate, and updates the
/// counters.
///
/// The cert store's merge statistics tell whether the certificate is
/// new, updated, or unchanged.  For updates, the certificate before
/// and after the merge is compared to find out what changed.
fn classify(policy: &StandardPolicy, stats: &MergePublicCollectStats,
            old: Option<&Cert>, merged: &Cert, counts: &mut Counts)
            -> ImportStatus
{
    if merged.userids().next().is_none() {
        counts.without_user_id += 1;
    }

    let old = match old {
        Some(old) if stats.new_certs() == 0 => old,
        _ => {
            counts.imported += 1;
            return ImportStatus::NewKey;
        }
    };

    if stats.unchanged_certs() > 0 {
        counts.unchanged += 1;
        return ImportStatus::Unchanged;
    }

    let new_user_ids =
        merged.userids().count().saturating_sub(old.userids().count());
    let new_subkeys = merged.keys().subkeys().count()
        .saturating_sub(old.keys().subkeys().count());
    let new_signatures =
        signature_count(merged).saturating_sub(signature_count(old));

    counts.new_user_ids += new_user_ids;
    counts.new_subkeys += new_subkeys;
    counts.new_signatures += new_signatures;
    if is_revoked(policy, merged) && ! is_revoked(policy, old) {
        counts.new_revocations += 1;
    }

    if new_user_ids > 0 {
        ImportStatus::NewUserIds
    } else if new_subkeys > 0 {
        ImportStatus::NewSubkeys
    } else if new_signatures > 0 {
        ImportStatus::NewSignatures
    } else {
        counts.unchanged += 1;
        ImportStatus::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use openpgp::cert::CertBuilder;
    use openpgp::serialize::SerializeInto;

    use super::*;

    fn run(backend: &SequoiaBackend, source: ImportSource) -> JobResult {
        let job = backend.create(Protocol::OpenPGP, source.kind())
            .expect("OpenPGP is supported");
        let (_tx, cancel) = CancelToken::new();
        let future = job.start(Arc::new(source), cancel).unwrap();
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build().unwrap()
            .block_on(future)
    }

    #[test]
    fn cms_is_unavailable() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let backend = SequoiaBackend::new(dir.path(), &[] as &[&str])?;
        assert!(backend.create(Protocol::CMS, JobKind::Local).is_none());
        assert!(backend.create(Protocol::OpenPGP, JobKind::Local).is_some());
        Ok(())
    }

    #[test]
    fn import_new_then_unchanged() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let backend = SequoiaBackend::new(dir.path(), &[] as &[&str])?;

        let (cert, _) = CertBuilder::new()
            .add_userid("<alice@example.org>")
            .add_signing_subkey()
            .generate()?;
        let bytes = cert.to_vec()?;

        let result = run(&backend, ImportSource::text(bytes.clone()));
        assert!(result.error.is_none());
        assert_eq!(result.counts.considered, 1);
        assert_eq!(result.counts.imported, 1);
        assert_eq!(result.imports,
                   vec![ImportedCertRecord::new(cert.fingerprint().to_hex(),
                                                ImportStatus::NewKey)]);

        let result = run(&backend, ImportSource::text(bytes));
        assert_eq!(result.counts.imported, 0);
        assert_eq!(result.counts.unchanged, 1);
        assert_eq!(result.imports[0].status, ImportStatus::Unchanged);
        Ok(())
    }

    #[test]
    fn new_user_ids_are_detected() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let backend = SequoiaBackend::new(dir.path(), &[] as &[&str])?;

        let (cert, _) = CertBuilder::new()
            .add_userid("<alice@example.org>")
            .add_userid("<alice@work.example.org>")
            .generate()?;
        let partial = cert.clone().retain_userids(
            |ua| ua.userid().value() == b"<alice@example.org>");

        let result = run(&backend, ImportSource::text(partial.to_vec()?));
        assert_eq!(result.imports[0].status, ImportStatus::NewKey);

        let result = run(&backend, ImportSource::text(cert.to_vec()?));
        assert_eq!(result.counts.imported, 0);
        assert_eq!(result.counts.unchanged, 0);
        assert_eq!(result.counts.new_user_ids, 1);
        assert_eq!(result.imports[0].status, ImportStatus::NewUserIds);
        Ok(())
    }

    #[test]
    fn secret_keys_are_flagged() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let backend = SequoiaBackend::new(dir.path(), &[] as &[&str])?;

        let (key, _) = CertBuilder::new()
            .add_userid("<bob@example.org>")
            .generate()?;
        let bytes = key.as_tsk().to_vec()?;

        let result = run(&backend, ImportSource::text(bytes));
        assert_eq!(result.counts.secret_considered, 1);
        assert_eq!(result.counts.secret_imported, 0);
        assert_eq!(result.imports[0].status,
                   ImportStatus::ContainedSecretKey);
        Ok(())
    }

    #[test]
    fn garbage_is_no_data() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let backend = SequoiaBackend::new(dir.path(), &[] as &[&str])?;

        let result = run(&backend, ImportSource::text(vec![]));
        assert_eq!(result.error, Some(ImportError::NoData));
        Ok(())
    }

    #[test]
    fn fetching_needs_keyservers() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let backend = SequoiaBackend::new(dir.path(), &[] as &[&str])?;
        let job = backend.create(Protocol::OpenPGP, JobKind::External)
            .expect("OpenPGP is supported");
        let (_tx, cancel) = CancelToken::new();
        let source = ImportSource::fetch(vec!["0123456789ABCDEF".into()], "ks");
        assert!(job.start(Arc::new(source), cancel).is_err());
        Ok(())
    }
}
