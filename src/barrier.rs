//! Synchronizes with the certificate cache before results are final.
//!
//! While jobs run, the cache's background refresh is suspended.  Once
//! everything drained, the suspension is lifted, and a full relist is
//! requested.  Only after the cache reports that the listing is done
//! do we look at the results again.

use futures_util::future::BoxFuture;

use crate::{
    aggregator::ResultAggregator,
    cache::{
        KeyCache,
        RefreshLease,
    },
    types::{
        Fingerprint,
        JobKind,
        Protocol,
    },
};

/// How a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Finished,
    Canceled,
}

/// Holds the refresh lease, and relists the cache once.
#[derive(Debug, Default)]
pub struct CacheRefreshBarrier {
    lease: Option<RefreshLease>,
    relisted: bool,
}

impl CacheRefreshBarrier {
    pub fn new() -> Self {
        Default::default()
    }

    /// Suspends the cache's auto-refresh, unless already suspended.
    pub fn acquire(&mut self, cache: &dyn KeyCache) {
        if self.lease.is_none() {
            tracing::trace!("suspending cache auto-refresh");
            self.lease = Some(cache.suspend_auto_refresh());
        }
    }

    /// Returns whether the auto-refresh is currently suspended.
    pub fn is_leased(&self) -> bool {
        self.lease.is_some()
    }

    /// Returns whether the barrier was entered.
    pub fn is_relisted(&self) -> bool {
        self.relisted
    }

    /// Releases the lease, and requests the relist.
    ///
    /// The returned future resolves when the cache is done listing.
    /// Must be called at most once per run.
    pub fn enter(&mut self, cache: &dyn KeyCache) -> BoxFuture<'static, ()> {
        debug_assert!(! self.relisted, "the barrier is entered only once");
        self.relisted = true;

        if self.lease.take().is_some() {
            tracing::trace!("resuming cache auto-refresh");
        }

        tracing::debug!("waiting for the cache to relist");
        cache.relist_all()
    }
}

/// Decides how a run ends.
///
/// A run is canceled if nothing was considered, and everything that
/// was attempted got canceled.  A run without any outcome only counts
/// as canceled if cancellation was requested.
pub fn verdict(results: &ResultAggregator, cancel_requested: bool) -> Verdict {
    if results.total_considered() == 0
        && results.all_canceled()
        && (! results.outcomes().is_empty() || cancel_requested)
    {
        Verdict::Canceled
    } else {
        Verdict::Finished
    }
}

/// Returns the certificates imported by external S/MIME jobs.
///
/// Their chains may be incomplete until the cache revalidated them.
pub fn external_cms_imports(results: &ResultAggregator) -> Vec<Fingerprint> {
    let mut fprs = results.outcomes().iter()
        .filter(|o| o.protocol == Protocol::CMS && o.kind == JobKind::External)
        .flat_map(|o| o.imports.iter().map(|r| r.fingerprint.clone()))
        .collect::<Vec<_>>();
    fprs.sort();
    fprs.dedup();
    fprs
}
