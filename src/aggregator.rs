//! Accumulates the outcomes of a run.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    ImportError,
    outcome::ImportOutcome,
    types::{
        Counts,
        Fingerprint,
        GroupStatus,
        ImportStatus,
        ImportedGroup,
        Protocol,
    },
};

/// A job that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub label: String,
    pub protocol: Protocol,
    pub error: ImportError,
}

/// The aggregated result of a run.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Per-field sums over all outcomes.
    pub totals: Counts,

    /// The labels of all outcomes, in the order they were recorded.
    pub labels: Vec<String>,

    pub groups_new: usize,
    pub groups_updated: usize,

    pub failures: Vec<Failure>,

    /// For every imported certificate, the sources it came from.
    pub sources_by_fingerprint: BTreeMap<Fingerprint, BTreeSet<String>>,
}

impl Report {
    /// Returns whether the report covers more than one source.
    pub fn is_multi_source(&self) -> bool {
        self.labels.len() > 1
    }
}

/// Collects outcomes and imported groups.
///
/// Outcomes are appended as they arrive, and never changed
/// afterwards.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    outcomes: Vec<ImportOutcome>,
    groups: Vec<ImportedGroup>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records an outcome.
    pub fn record(&mut self, outcome: ImportOutcome) {
        self.outcomes.push(outcome);
    }

    /// Records an imported group.
    pub fn record_group(&mut self, group: ImportedGroup) {
        self.groups.push(group);
    }

    pub fn outcomes(&self) -> &[ImportOutcome] {
        &self.outcomes
    }

    pub fn groups(&self) -> &[ImportedGroup] {
        &self.groups
    }

    /// Consumes the aggregator, returning the outcomes and groups.
    pub fn into_parts(self) -> (Vec<ImportOutcome>, Vec<ImportedGroup>) {
        (self.outcomes, self.groups)
    }

    /// Returns whether no outcome is worth reporting.
    pub fn is_trivial(&self) -> bool {
        self.outcomes.iter().all(ImportOutcome::is_trivial)
    }

    /// Returns the number of certificates considered across all
    /// outcomes.
    pub fn total_considered(&self) -> usize {
        self.outcomes.iter().map(|o| o.counts.considered).sum()
    }

    /// Returns whether every outcome is a cancellation.
    ///
    /// This is vacuously true if there are no outcomes.
    pub fn all_canceled(&self) -> bool {
        self.outcomes.iter().all(ImportOutcome::is_canceled)
    }

    /// Returns the failed outcomes.
    pub fn failures(&self) -> impl Iterator<Item = &ImportOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    /// Returns whether any outcome failed.
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Returns the fingerprints of certificates that were new to the
    /// keyring, across all outcomes of the given protocol.
    pub fn new_keys(&self, protocol: Protocol) -> Vec<Fingerprint> {
        let mut seen = BTreeSet::new();
        self.outcomes.iter()
            .filter(|o| o.protocol == protocol)
            .flat_map(|o| o.imports.iter())
            .filter(|r| r.status == ImportStatus::NewKey)
            .filter(|r| seen.insert(r.fingerprint.clone()))
            .map(|r| r.fingerprint.clone())
            .collect()
    }

    /// Builds the report.
    ///
    /// Counters are summed over all outcomes, never deduplicated.
    pub fn build_report(&self) -> Report {
        let mut report = Report::default();

        for outcome in &self.outcomes {
            report.totals += outcome.counts;
            report.labels.push(outcome.label.clone());

            if let Some(error) = outcome.error.as_ref()
                .filter(|_| outcome.is_failed())
            {
                report.failures.push(Failure {
                    label: outcome.label.clone(),
                    protocol: outcome.protocol,
                    error: error.clone(),
                });
            }

            for record in &outcome.imports {
                report.sources_by_fingerprint
                    .entry(record.fingerprint.clone())
                    .or_default()
                    .insert(outcome.label.clone());
            }
        }

        for group in &self.groups {
            match group.status {
                GroupStatus::New => report.groups_new += 1,
                GroupStatus::Updated => report.groups_updated += 1,
            }
        }

        report
    }

    /// Returns the audit logs of all outcomes as one text.
    ///
    /// A single outcome's log is returned verbatim.  Otherwise, each
    /// log is introduced by the outcome's label and protocol.
    pub fn consolidated_audit_log(&self) -> String {
        if let [outcome] = &self.outcomes[..] {
            return outcome.audit_log.clone();
        }

        let mut log = String::new();
        for outcome in &self.outcomes {
            if ! log.is_empty() {
                log.push('\n');
            }

            log.push_str(&format!("{} ({}):\n", outcome.label,
                                  outcome.protocol));
            if outcome.is_canceled() {
                log.push_str("Import canceled.\n");
            } else if outcome.audit_log.is_empty() {
                log.push_str("No audit log available.\n");
            } else {
                log.push_str(&outcome.audit_log);
                if ! outcome.audit_log.ends_with('\n') {
                    log.push('\n');
                }
            }
        }
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        outcome::JobResult,
        types::{
            ImportedCertRecord,
            JobKind,
            KeyGroup,
        },
    };

    fn outcome(label: &str, considered: usize, imported: usize,
               error: Option<ImportError>)
               -> ImportOutcome
    {
        ImportOutcome::new(label.into(), Protocol::OpenPGP, JobKind::Local,
                           None, JobResult {
                               counts: Counts {
                                   considered,
                                   imported,
                                   ..Default::default()
                               },
                               error,
                               audit_log: format!("log of {}", label),
                               ..Default::default()
                           })
    }

    #[test]
    fn triviality() {
        let mut a = ResultAggregator::new();
        assert!(a.is_trivial());

        a.record(outcome("a", 0, 0, None));
        a.record(outcome("b", 1, 0, Some(ImportError::NoData)));
        assert!(a.is_trivial());
        assert!(! a.has_failures());

        a.record(outcome("c", 2, 0, Some(ImportError::NoData)));
        assert!(! a.is_trivial());
    }

    #[test]
    fn failures_exclude_cancellation_and_no_data() {
        let mut a = ResultAggregator::new();
        a.record(outcome("a", 0, 0, Some(ImportError::Canceled)));
        a.record(outcome("b", 0, 0, Some(ImportError::NoData)));
        a.record(outcome("c", 0, 0, Some(ImportError::Backend("boom".into()))));

        let report = a.build_report();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].label, "c");
    }

    #[test]
    fn report_sums_without_deduplication() {
        let mut a = ResultAggregator::new();
        let fpr = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

        let mut o = outcome("file", 1, 1, None);
        o.imports.push(ImportedCertRecord::new(fpr, ImportStatus::NewKey));
        a.record(o);

        let mut o = outcome("keyserver", 1, 1, None);
        o.imports.push(ImportedCertRecord::new(fpr, ImportStatus::NewKey));
        a.record(o);

        a.record_group(ImportedGroup {
            source_label: "file".into(),
            group: KeyGroup {
                id: "g".into(),
                name: "G".into(),
                members: vec![],
            },
            status: GroupStatus::Updated,
        });

        let report = a.build_report();
        assert_eq!(report.totals.considered, 2);
        assert_eq!(report.totals.imported, 2);
        assert_eq!(report.groups_new, 0);
        assert_eq!(report.groups_updated, 1);
        assert!(report.is_multi_source());

        let sources = &report.sources_by_fingerprint[&Fingerprint::new(fpr)];
        assert_eq!(sources.len(), 2);

        // The same key imported twice is only new once.
        assert_eq!(a.new_keys(Protocol::OpenPGP).len(), 1);
        assert!(a.new_keys(Protocol::CMS).is_empty());
    }

    #[test]
    fn audit_log_consolidation() {
        let mut a = ResultAggregator::new();
        a.record(outcome("a", 1, 1, None));
        assert_eq!(a.consolidated_audit_log(), "log of a");

        a.record(outcome("b", 0, 0, Some(ImportError::Canceled)));
        let mut empty = outcome("c", 0, 0, None);
        empty.audit_log.clear();
        a.record(empty);

        let log = a.consolidated_audit_log();
        assert!(log.contains("a (OpenPGP):\nlog of a\n"));
        assert!(log.contains("b (OpenPGP):\nImport canceled.\n"));
        assert!(log.contains("c (OpenPGP):\nNo audit log available.\n"));
    }

    #[test]
    fn all_canceled() {
        let mut a = ResultAggregator::new();
        assert!(a.all_canceled());
        a.record(outcome("a", 0, 0, Some(ImportError::Canceled)));
        assert!(a.all_canceled());
        a.record(outcome("b", 0, 0, None));
        assert!(! a.all_canceled());
    }
}
