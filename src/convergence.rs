//! Retrieves the keys that certified newly imported certificates.
//!
//! Once the initial wave drained, we look at the certifications on
//! the certificates that were new to the keyring.  Certifications
//! made by keys we don't have cannot be checked, so optionally we
//! fetch those keys in a single follow-up wave.

use std::collections::BTreeSet;

use crate::{
    aggregator::ResultAggregator,
    cache::KeyCache,
    types::{
        Fingerprint,
        ImportSource,
        KeyId,
        Protocol,
        WaveKind,
    },
};

/// Label of the sources fetching signer keys.
pub const SIGNER_KEYS_LABEL: &str = "Retrieve Signer Keys";

/// What to do after a wave drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// Fetch these keys in a follow-up wave.
    FollowUp(Vec<KeyId>),

    /// Proceed to the barrier.
    Done,
}

/// Decides whether a follow-up wave is needed.
#[derive(Debug)]
pub struct SignerKeyConvergence {
    retrieve_signer_keys: bool,
    evaluated: bool,
}

impl SignerKeyConvergence {
    pub fn new(retrieve_signer_keys: bool) -> Self {
        SignerKeyConvergence {
            retrieve_signer_keys,
            evaluated: false,
        }
    }

    /// Returns whether the convergence check already ran.
    pub fn evaluated(&self) -> bool {
        self.evaluated
    }

    /// Evaluates a drained wave.
    ///
    /// Only the first drain of the initial wave is considered.
    pub fn on_drained(&mut self, wave: WaveKind, results: &ResultAggregator,
                      cache: &dyn KeyCache)
                      -> Convergence
    {
        if wave != WaveKind::Initial || self.evaluated {
            return Convergence::Done;
        }
        self.evaluated = true;

        let new_keys = results.new_keys(Protocol::OpenPGP);
        if new_keys.is_empty() {
            return Convergence::Done;
        }

        let missing = missing_signer_keys(cache, &new_keys);
        if missing.is_empty() {
            tracing::debug!("all certifiers of {} new certificates are known",
                            new_keys.len());
            return Convergence::Done;
        }

        if ! self.retrieve_signer_keys {
            tracing::debug!(missing = missing.len(),
                            "not retrieving missing signer keys");
            return Convergence::Done;
        }

        tracing::info!(missing = missing.len(), "retrieving signer keys");
        Convergence::FollowUp(missing.into_iter().collect())
    }
}

/// Returns the key IDs of keys that certified a user ID on any of the
/// given certificates, but are not in the cache.
///
/// Self-signatures are ignored.
pub fn missing_signer_keys(cache: &dyn KeyCache, fingerprints: &[Fingerprint])
                           -> BTreeSet<KeyId>
{
    cache.resolve(fingerprints).into_iter()
        .map(|cert| cache.refresh_certifications(cert))
        .flat_map(|cert| cert.third_party_certifiers()
                  .cloned()
                  .collect::<Vec<_>>())
        .filter(|id| ! cache.contains_key(id))
        .collect()
}

/// Returns one source per key to fetch.
pub fn follow_up_sources(ids: Vec<KeyId>) -> Vec<ImportSource> {
    ids.into_iter()
        .map(|id| ImportSource::fetch(vec![id], SIGNER_KEYS_LABEL))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use futures_util::future::BoxFuture;

    use super::*;

    use crate::{
        cache::{
            CachedCert,
            CachedUserId,
            OwnerTrust,
            RefreshLease,
            Validity,
        },
        outcome::{ImportOutcome, JobResult},
        types::{
            ImportStatus,
            ImportedCertRecord,
            JobKind,
            KeyGroup,
        },
    };

    const ALICE: &str = "AAAAAAAAAAAAAAAAAAAAAAAA1111111111111111";
    const BOB: &str = "BBBBBBBBBBBBBBBBBBBBBBBB2222222222222222";

    #[derive(Default)]
    struct Cache {
        certs: BTreeMap<Fingerprint, CachedCert>,
    }

    impl Cache {
        fn add(&mut self, fpr: &str, certifiers: &[&str]) {
            let fpr = Fingerprint::new(fpr);
            self.certs.insert(fpr.clone(), CachedCert {
                fingerprint: fpr,
                protocol: Protocol::OpenPGP,
                has_secret: false,
                ownertrust: OwnerTrust::Unknown,
                expired: false,
                revoked: false,
                userids: vec![CachedUserId {
                    userid: "<someone@example.org>".into(),
                    validity: Validity::Unknown,
                    certifiers: certifiers.iter().map(KeyId::new).collect(),
                }],
            });
        }
    }

    impl KeyCache for Cache {
        fn resolve(&self, fingerprints: &[Fingerprint]) -> Vec<CachedCert> {
            fingerprints.iter()
                .filter_map(|f| self.certs.get(f).cloned())
                .collect()
        }

        fn contains_key(&self, id: &KeyId) -> bool {
            self.certs.keys().any(|f| f.key_id() == *id)
        }

        fn suspend_auto_refresh(&self) -> RefreshLease {
            RefreshLease::noop()
        }

        fn relist_all(&self) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }

        fn has_group(&self, _: &str) -> bool {
            false
        }

        fn insert_group(&self, _: KeyGroup) -> anyhow::Result<()> {
            Ok(())
        }

        fn update_group(&self, _: KeyGroup) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn results_with_new_key(fpr: &str) -> ResultAggregator {
        let mut results = ResultAggregator::new();
        results.record(ImportOutcome::new(
            "file".into(), Protocol::OpenPGP, JobKind::Local, None,
            JobResult {
                imports: vec![ImportedCertRecord::new(fpr,
                                                      ImportStatus::NewKey)],
                ..Default::default()
            }));
        results
    }

    #[test]
    fn finds_unknown_certifiers() {
        let mut cache = Cache::default();
        cache.add(ALICE, &["1111111111111111", "2222222222222222",
                           "3333333333333333"]);
        cache.add(BOB, &[]);

        let missing = missing_signer_keys(&cache, &[Fingerprint::new(ALICE)]);
        assert_eq!(missing.into_iter().collect::<Vec<_>>(),
                   vec![KeyId::new("3333333333333333")]);
    }

    #[test]
    fn follow_up_only_once() {
        let mut cache = Cache::default();
        cache.add(ALICE, &["3333333333333333"]);
        let results = results_with_new_key(ALICE);

        let mut c = SignerKeyConvergence::new(true);
        assert_eq!(c.on_drained(WaveKind::Initial, &results, &cache),
                   Convergence::FollowUp(vec![KeyId::new("3333333333333333")]));
        assert!(c.evaluated());
        assert_eq!(c.on_drained(WaveKind::Initial, &results, &cache),
                   Convergence::Done);
        assert_eq!(c.on_drained(WaveKind::SignerKeyFollowUp, &results, &cache),
                   Convergence::Done);
    }

    #[test]
    fn disabled_retrieval() {
        let mut cache = Cache::default();
        cache.add(ALICE, &["3333333333333333"]);
        let results = results_with_new_key(ALICE);

        let mut c = SignerKeyConvergence::new(false);
        assert_eq!(c.on_drained(WaveKind::Initial, &results, &cache),
                   Convergence::Done);
    }

    #[test]
    fn one_source_per_key() {
        let sources = follow_up_sources(vec![KeyId::new("1111111111111111"),
                                             KeyId::new("2222222222222222")]);
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|s| s.label() == SIGNER_KEYS_LABEL));
    }
}
