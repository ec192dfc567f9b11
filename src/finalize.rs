//! Decides which questions to ask once the results are final.

use std::collections::BTreeSet;

use futures_util::future::BoxFuture;

use crate::{
    aggregator::ResultAggregator,
    cache::{
        CachedCert,
        KeyCache,
        OwnerTrust,
    },
    types::{
        ImportStatus,
        Protocol,
    },
};

/// The user's answer to a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Accepted,
    Declined,
}

/// Asks the user about imported certificates.
///
/// Acting on the answer is up to the implementation.
pub trait Prompter: Send {
    /// Asks whether a certificate with a secret key is the user's own,
    /// and should be ultimately trusted.
    fn ask_ownertrust<'a>(&'a mut self, cert: &'a CachedCert)
                          -> BoxFuture<'a, PromptAnswer>;

    /// Offers to certify a newly imported certificate.
    fn offer_certification<'a>(&'a mut self, cert: &'a CachedCert)
                               -> BoxFuture<'a, ()>;
}

/// Never asks anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompts;

impl Prompter for NoPrompts {
    fn ask_ownertrust<'a>(&'a mut self, _: &'a CachedCert)
                          -> BoxFuture<'a, PromptAnswer>
    {
        Box::pin(async { PromptAnswer::Declined })
    }

    fn offer_certification<'a>(&'a mut self, _: &'a CachedCert)
                               -> BoxFuture<'a, ()>
    {
        Box::pin(async {})
    }
}

/// Returns the certificates to ask the ownertrust question for.
///
/// These are OpenPGP certificates that were new or came with secret
/// key material, for which a usable secret key is available, and that
/// are not yet ultimately trusted.  Each certificate is returned once.
pub fn ownertrust_candidates(results: &ResultAggregator, cache: &dyn KeyCache)
                             -> Vec<CachedCert>
{
    let mut seen = BTreeSet::new();
    let fingerprints = results.outcomes().iter()
        .filter(|o| o.protocol == Protocol::OpenPGP)
        .flat_map(|o| o.imports.iter())
        .filter(|r| matches!(r.status, ImportStatus::NewKey
                             | ImportStatus::ContainedSecretKey))
        .filter(|r| seen.insert(r.fingerprint.clone()))
        .map(|r| r.fingerprint.clone())
        .collect::<Vec<_>>();

    if fingerprints.is_empty() {
        return vec![];
    }

    cache.resolve(&fingerprints).into_iter()
        .filter(|c| c.protocol == Protocol::OpenPGP)
        .filter(|c| c.has_secret && c.ownertrust < OwnerTrust::Ultimate)
        .collect()
}

/// Returns the certificate to offer certification for, if any.
///
/// That is the case if the run imported exactly one certificate, an
/// OpenPGP certificate new to the keyring, for which we have no
/// secret key, that is neither expired nor revoked, and none of whose
/// user IDs is at least marginally valid.
pub fn certification_candidate(results: &ResultAggregator,
                               cache: &dyn KeyCache)
                               -> Option<CachedCert>
{
    let imported: usize =
        results.outcomes().iter().map(|o| o.counts.imported).sum();
    if imported != 1 {
        return None;
    }

    let mut new = results.outcomes().iter()
        .flat_map(|o| o.imports.iter().map(move |r| (o.protocol, r)))
        .filter(|(_, r)| r.status == ImportStatus::NewKey);
    let (protocol, record) = new.next()?;
    if new.next().is_some() || protocol != Protocol::OpenPGP {
        return None;
    }

    let cert = cache.resolve(std::slice::from_ref(&record.fingerprint))
        .into_iter().next()?;

    if cert.protocol != Protocol::OpenPGP
        || cert.has_secret
        || cert.expired
        || cert.revoked
        || cert.has_valid_userid()
    {
        return None;
    }

    Some(cert)
}

/// Returns whether the report should be shown.
///
/// Offering certification replaces the report.  Otherwise the report
/// is shown unless the run was trivial and nothing failed.
pub fn show_report(certification_offered: bool, results: &ResultAggregator)
                   -> bool
{
    ! certification_offered
        && (! results.is_trivial() || results.has_failures())
}
