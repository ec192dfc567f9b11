//! Certificate import report.

use std::io;

use crate::{
    aggregator::Report,
    output::pluralize::Pluralize,
    wwriteln,
};

impl Report {
    /// Returns the counter lines of the report.
    ///
    /// The number of processed and imported certificates is always
    /// included, all other counters only if they are not zero.
    pub fn lines(&self) -> Vec<(&'static str, usize)> {
        let t = &self.totals;
        let mut lines = vec![
            ("Total number processed:", t.considered),
            ("Imported:", t.imported),
        ];

        let optional = [
            ("New signatures:", t.new_signatures),
            ("New user IDs:", t.new_user_ids),
            ("Certificates without user IDs:", t.without_user_id),
            ("New subkeys:", t.new_subkeys),
            ("Newly revoked:", t.new_revocations),
            ("Not imported:", t.not_imported),
            ("Unchanged:", t.unchanged),
            ("Secret keys processed:", t.secret_considered),
            ("Secret keys imported:", t.secret_imported),
            ("Secret keys not imported:", t.secret_not_imported()),
            ("Secret keys unchanged:", t.secret_unchanged),
            ("Deprecated PGP-2 keys skipped:", t.v3_skipped),
        ];
        lines.extend(optional.into_iter().filter(|(_, n)| *n > 0));

        lines
    }

    /// Prints the report to `stream`.
    pub fn print_summary(&self, stream: &mut dyn io::Write) {
        match &self.labels[..] {
            [label] => wwriteln!(stream=stream,
                                 "Detailed results of importing {}:", label),
            _ => wwriteln!(stream=stream,
                           "Detailed results of certificate import:"),
        }
        wwriteln!(stream=stream);

        if self.is_multi_source() {
            wwriteln!(stream=stream, indent="  ", "Totals");
        }

        let width = self.lines().iter().map(|(l, _)| l.len()).max()
            .unwrap_or(0);
        for (label, n) in self.lines() {
            let label = format!("{:>1$}", label, width);
            wwriteln!(stream=stream, indent="  ", "{} {}", label, n);
        }

        if self.groups_new > 0 || self.groups_updated > 0 {
            wwriteln!(stream=stream);
            wwriteln!(stream=stream, "Imported {}, updated {}.",
                      self.groups_new.of("new group"),
                      self.groups_updated.of("group"));
        }

        if ! self.failures.is_empty() {
            wwriteln!(stream=stream);
            wwriteln!(stream=stream, "{} failed:",
                      self.failures.len().of("import"));
            for f in &self.failures {
                wwriteln!(stream=stream, initial_indent="  - ",
                          subsequent_indent="    ",
                          "{} ({}): {}", f.label, f.protocol, f.error);
            }
        }
    }
}
