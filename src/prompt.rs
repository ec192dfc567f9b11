//! Yes/no questions on the terminal.

use std::io::{self, Write};

use futures_util::future::BoxFuture;

use sequoia_import::{
    cache::CachedCert,
    finalize::{PromptAnswer, Prompter},
    wprintln,
};

/// Asks questions on stderr, and reads the answers from stdin.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    /// Asks `question`, and returns whether the answer is yes.
    ///
    /// Anything but an explicit yes, including a read error, counts
    /// as no.
    async fn confirm(question: String) -> bool {
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stderr = io::stderr();
            write!(stderr, "{} [y/N] ", question)?;
            stderr.flush()?;

            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            Ok(line)
        }).await;

        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_lowercase().as_str(),
                                     "y" | "yes"),
            Ok(Err(err)) => {
                tracing::debug!("reading the answer: {}", err);
                false
            }
            Err(err) => {
                tracing::debug!("prompt task failed: {}", err);
                false
            }
        }
    }
}

/// Returns a short description of `cert` for use in questions.
fn describe(cert: &CachedCert) -> String {
    match cert.userids.first() {
        Some(uid) => format!("{} ({})", cert.fingerprint, uid.userid),
        None => cert.fingerprint.to_string(),
    }
}

impl Prompter for TerminalPrompter {
    fn ask_ownertrust<'a>(&'a mut self, cert: &'a CachedCert)
                          -> BoxFuture<'a, PromptAnswer>
    {
        Box::pin(async move {
            let question = format!(
                "You imported the secret key {}.  Is this your own key?",
                describe(cert));
            if ! Self::confirm(question).await {
                return PromptAnswer::Declined;
            }

            wprintln!();
            wprintln!(initial_indent = "Hint: ", subsequent_indent = "      ",
                      "To use it as a trust root, run:");
            wprintln!(indent = "  ",
                      "sq pki link authorize --unconstrained --cert {} --all",
                      cert.fingerprint);
            PromptAnswer::Accepted
        })
    }

    fn offer_certification<'a>(&'a mut self, cert: &'a CachedCert)
                               -> BoxFuture<'a, ()>
    {
        Box::pin(async move {
            let question = format!(
                "The certificate {} has no valid user IDs.  Certify it now?",
                describe(cert));
            if ! Self::confirm(question).await {
                return;
            }

            wprintln!();
            wprintln!("After verifying the fingerprint with its owner, run:");
            wprintln!(indent = "  ", "sq pki vouch add --cert {} --all",
                      cert.fingerprint);
        })
    }
}
