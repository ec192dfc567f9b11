//! A [`KeyCache`] over a cert-d.
//!
//! The cert-d is read on demand, so there is no background refresh to
//! suspend, and relisting is immediate.  Groups are kept in a TOML
//! file of their own.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use futures_util::future::BoxFuture;

use sequoia_openpgp as openpgp;
use openpgp::{
    Cert,
    KeyHandle,
    KeyID,
    policy::StandardPolicy,
    types::RevocationStatus,
};
use sequoia_cert_store as cert_store;
use cert_store::{CertStore, Store};

use crate::{
    Result,
    backend::sequoia::open_cert_store,
    cache::{
        CachedCert,
        CachedUserId,
        KeyCache,
        OwnerTrust,
        RefreshLease,
        Validity,
    },
    groups,
    types::{
        Fingerprint,
        KeyGroup,
        KeyId,
        Protocol,
    },
};

/// A certificate cache backed by a cert-d.
pub struct CertStoreCache {
    path: PathBuf,
    groups_file: PathBuf,
    groups: Mutex<BTreeMap<String, KeyGroup>>,
    policy: StandardPolicy<'static>,
}

impl CertStoreCache {
    /// Opens the cert-d at `path`, and the groups stored in
    /// `groups_file`.
    pub fn open<P, Q>(path: P, groups_file: Q) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        let groups_file = groups_file.as_ref().to_path_buf();

        // Fail early if the cert-d can't be opened.
        open_cert_store(&path)?;

        let groups = match std::fs::read_to_string(&groups_file) {
            Ok(text) => groups::parse_groups(&text)
                .with_context(|| format!("Reading groups from {}",
                                         groups_file.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => vec![],
            Err(err) => return Err(err).with_context(
                || format!("Reading groups from {}", groups_file.display())),
        };

        Ok(CertStoreCache {
            path,
            groups_file,
            groups: Mutex::new(
                groups.into_iter().map(|g| (g.id.clone(), g)).collect()),
            policy: StandardPolicy::new(),
        })
    }

    fn cert_store(&self) -> Option<CertStore<'static>> {
        match open_cert_store(&self.path) {
            Ok(cert_store) => Some(cert_store),
            Err(err) => {
                tracing::warn!("{:#}", err);
                None
            }
        }
    }

    fn to_cached(&self, cert: &Cert) -> CachedCert {
        let vc = cert.with_policy(&self.policy, None).ok();
        let expired = vc.map(|vc| vc.alive().is_err()).unwrap_or(false);
        let revoked = matches!(cert.revocation_status(&self.policy, None),
                               RevocationStatus::Revoked(_));

        let userids = cert.userids().map(|ua| {
            let mut certifiers = ua.certifications()
                .flat_map(|sig| sig.get_issuers())
                .map(|issuer| KeyId::new(KeyID::from(&issuer).to_hex()))
                .collect::<Vec<_>>();
            certifiers.sort();
            certifiers.dedup();

            CachedUserId {
                userid: String::from_utf8_lossy(ua.userid().value())
                    .into_owned(),
                validity: Validity::Unknown,
                certifiers,
            }
        }).collect();

        CachedCert {
            fingerprint: Fingerprint::new(cert.fingerprint().to_hex()),
            protocol: Protocol::OpenPGP,
            // The cert-d strips secret key material on merge, so this
            // is false for everything read back from it, and the
            // ownertrust question is never asked for cert-d entries.
            has_secret: cert.is_tsk(),
            ownertrust: OwnerTrust::Unknown,
            expired,
            revoked,
            userids,
        }
    }

    /// Writes the groups to disk.
    fn store_groups(&self, groups: &BTreeMap<String, KeyGroup>) -> Result<()> {
        let dir = self.groups_file.parent()
            .filter(|d| ! d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Creating the directory {:?}", dir))?;

        let doc = groups::groups_to_toml(groups.values());
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, doc.as_bytes())?;
        tmp.persist(&self.groups_file)
            .with_context(|| format!("Writing groups to {}",
                                     self.groups_file.display()))?;
        Ok(())
    }

    fn put_group(&self, group: KeyGroup, must_exist: bool) -> Result<()> {
        let mut groups = self.groups.lock()
            .map_err(|_| anyhow::anyhow!("group table poisoned"))?;
        if groups.contains_key(&group.id) != must_exist {
            if must_exist {
                return Err(anyhow::anyhow!("No such group: {}", group.id));
            } else {
                return Err(anyhow::anyhow!("Group exists: {}", group.id));
            }
        }

        let mut updated = groups.clone();
        updated.insert(group.id.clone(), group);
        self.store_groups(&updated)?;
        *groups = updated;
        Ok(())
    }
}

impl KeyCache for CertStoreCache {
    fn resolve(&self, fingerprints: &[Fingerprint]) -> Vec<CachedCert> {
        let Some(cert_store) = self.cert_store() else {
            return vec![];
        };

        fingerprints.iter().filter_map(|fpr| {
            let fpr = fpr.as_str().parse::<openpgp::Fingerprint>().ok()?;
            let cert = cert_store.lookup_by_cert_fpr(&fpr).ok()?;
            let cert = cert.to_cert().ok()?;
            Some(self.to_cached(cert))
        }).collect()
    }

    fn contains_key(&self, id: &KeyId) -> bool {
        let Ok(keyid) = id.as_str().parse::<KeyID>() else {
            return false;
        };
        let Some(cert_store) = self.cert_store() else {
            return false;
        };

        cert_store.lookup_by_cert(&KeyHandle::from(keyid))
            .map(|certs| ! certs.is_empty())
            .unwrap_or(false)
    }

    fn suspend_auto_refresh(&self) -> RefreshLease {
        RefreshLease::noop()
    }

    fn relist_all(&self) -> BoxFuture<'static, ()> {
        tracing::trace!("relisting {}", self.path.display());
        Box::pin(futures_util::future::ready(()))
    }

    fn has_group(&self, id: &str) -> bool {
        self.groups.lock().map(|g| g.contains_key(id)).unwrap_or(false)
    }

    fn insert_group(&self, group: KeyGroup) -> Result<()> {
        self.put_group(group, false)
    }

    fn update_group(&self, group: KeyGroup) -> Result<()> {
        self.put_group(group, true)
    }
}
