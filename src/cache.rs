//! The boundary to the shared certificate cache.
//!
//! The cache wraps the backend keyring and refreshes itself in the
//! background.  The orchestrator never mutates it directly: it holds a
//! [`RefreshLease`] while jobs run, and requests one full relist at
//! the end of a run.

use std::fmt;

use futures_util::future::BoxFuture;

use crate::types::{
    Fingerprint,
    KeyGroup,
    KeyId,
    Protocol,
};

pub mod cert_store;

/// The validity of a user ID as computed by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Validity {
    Unknown,
    Undefined,
    Never,
    Marginal,
    Full,
    Ultimate,
}

/// How much the user trusts a key's holder to certify others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OwnerTrust {
    Unknown,
    Undefined,
    Never,
    Marginal,
    Full,
    Ultimate,
}

/// A user ID as seen by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUserId {
    pub userid: String,
    pub validity: Validity,

    /// Key IDs of the keys that certified this user ID.
    pub certifiers: Vec<KeyId>,
}

/// A certificate as seen by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCert {
    pub fingerprint: Fingerprint,
    pub protocol: Protocol,

    /// Whether a usable secret key is available.
    pub has_secret: bool,
    pub ownertrust: OwnerTrust,
    pub expired: bool,
    pub revoked: bool,
    pub userids: Vec<CachedUserId>,
}

impl CachedCert {
    /// Returns the key ID of the primary key.
    pub fn key_id(&self) -> KeyId {
        self.fingerprint.key_id()
    }

    /// Returns the key IDs of third parties that certified any of the
    /// user IDs.
    pub fn third_party_certifiers(&self) -> impl Iterator<Item = &KeyId> {
        let own = self.key_id();
        self.userids.iter()
            .flat_map(|uid| uid.certifiers.iter())
            .filter(move |id| **id != own)
    }

    /// Returns whether any user ID is at least marginally valid.
    pub fn has_valid_userid(&self) -> bool {
        self.userids.iter().any(|uid| uid.validity >= Validity::Marginal)
    }
}

/// Suppresses the cache's background auto-refresh while held.
///
/// Dropping the lease releases it.
pub struct RefreshLease {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl RefreshLease {
    /// Returns a lease that invokes `release` when dropped.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        RefreshLease {
            release: Some(Box::new(release)),
        }
    }

    /// Returns a lease for caches that don't refresh on their own.
    pub fn noop() -> Self {
        RefreshLease {
            release: None,
        }
    }
}

impl fmt::Debug for RefreshLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshLease")
            .field("held", &self.release.is_some())
            .finish()
    }
}

impl Drop for RefreshLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// The shared certificate cache.
pub trait KeyCache: Send + Sync {
    /// Resolves fingerprints to certificates.
    ///
    /// Unknown fingerprints are skipped.
    fn resolve(&self, fingerprints: &[Fingerprint]) -> Vec<CachedCert>;

    /// Reloads the certification data of `cert`.
    fn refresh_certifications(&self, cert: CachedCert) -> CachedCert {
        cert
    }

    /// Returns whether the cache holds a certificate with the given
    /// key ID.
    fn contains_key(&self, id: &KeyId) -> bool;

    /// Suspends the background auto-refresh until the lease is
    /// dropped.
    fn suspend_auto_refresh(&self) -> RefreshLease;

    /// Requests a full relist.
    ///
    /// The returned future resolves when the listing is done.
    fn relist_all(&self) -> BoxFuture<'static, ()>;

    /// Revalidates the given certificates.
    ///
    /// This completes certificate chains of S/MIME certificates that
    /// were fetched from external sources.
    fn revalidate(&self, _fingerprints: &[Fingerprint])
                  -> BoxFuture<'static, ()>
    {
        Box::pin(futures_util::future::ready(()))
    }

    /// Returns whether a group with the given ID exists.
    fn has_group(&self, id: &str) -> bool;

    /// Inserts a new group.
    fn insert_group(&self, group: KeyGroup) -> anyhow::Result<()>;

    /// Updates an existing group.
    fn update_group(&self, group: KeyGroup) -> anyhow::Result<()>;
}
