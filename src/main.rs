//! `sq-import` imports certificates from files, key servers, and WKD.

use std::ffi::OsString;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use sequoia_openpgp as openpgp;
use openpgp::serialize::SerializeInto;
use sequoia_net::wkd;
use sequoia_directories::{Component, Home};

use sequoia_import::{
    Fingerprint,
    ImportSource,
    KeyId,
    Orchestrator,
    OrchestratorHandle,
    Protocol,
    Result,
    RunOutcome,
    backend::sequoia::{SequoiaBackend, http_client},
    cache::cert_store::CertStoreCache,
    config::{Config, ImportSettings},
    groups::TomlGroupParser,
    output::pluralize::Pluralize,
    progress::ProgressEvent,
    types::{JobKind, Origin},
    wprintln,
};

mod cli;
use cli::Cli;

mod prompt;
use prompt::TerminalPrompter;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = real_main(cli) {
        print_error_chain(&err);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0 | 1) => "warn",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// Prints the error and causes, if any.
fn print_error_chain(err: &anyhow::Error) {
    wprintln!("Error: {}", err);
    err.chain().skip(1).for_each(|cause| wprintln!("  because: {}", cause));
}

/// Returns where groups are kept for the cert-d at `cert_store`.
fn groups_file(cert_store: &Path) -> PathBuf {
    let mut name = cert_store.file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("cert-store"));
    name.push("-groups.toml");
    cert_store.with_file_name(name)
}

fn real_main(cli: Cli) -> Result<()> {
    let home = Home::new(cli.home.clone()).ok();

    let config = match (&cli.config, &home) {
        (Some(path), _) => Config::read(path)?,
        (None, Some(home)) => Config::read(&Config::file_name(home))?,
        (None, None) => Config::default(),
    };

    let mut settings = config.import_settings();
    if cli.retrieve_signer_keys {
        settings.retrieve_signer_keys = true;
    }

    let interactive = ! cli.batch && io::stdin().is_terminal()
        && ! cli.files.iter().any(|f| f == Path::new("-"));
    if ! interactive {
        settings.ask_ownertrust = false;
        settings.offer_certification = false;
    }

    let cert_store = match (&cli.cert_store, &home) {
        (Some(path), _) => path.clone(),
        (None, Some(home)) => home.data_dir(Component::CertD),
        (None, None) => return Err(anyhow::anyhow!(
            "No certificate store configured, use --cert-store")),
    };
    tracing::debug!("importing into {}", cert_store.display());

    let stdin = if cli.files.iter().any(|f| f == Path::new("-")) {
        let mut bytes = vec![];
        io::stdin().read_to_end(&mut bytes).context("Reading stdin")?;
        Some(bytes)
    } else {
        None
    };

    let keyservers = config.key_servers(&cli.keyservers);
    let backend = SequoiaBackend::new(&cert_store, &keyservers)?;
    let cache = CertStoreCache::open(&cert_store, groups_file(&cert_store))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli, settings, interactive, backend, cache, stdin))
}

async fn run(cli: Cli, settings: ImportSettings, interactive: bool,
             backend: SequoiaBackend, cache: CertStoreCache,
             stdin: Option<Vec<u8>>)
             -> Result<()>
{
    let (progress, events) = mpsc::unbounded_channel();
    let (orchestrator, handle) =
        Orchestrator::new(settings, Arc::new(backend), Arc::new(cache));
    let mut orchestrator = orchestrator
        .with_group_parser(TomlGroupParser)
        .with_progress(progress);
    if interactive {
        orchestrator = orchestrator.with_prompter(TerminalPrompter);
    }

    let pb = if cli.verbose > 0 || cli.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    let display = tokio::spawn(show_progress(pb.clone(), events));
    let run = tokio::spawn(orchestrator.run());

    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = interrupt.cancel();
        }
    });

    submit_sources(&cli, &handle, stdin).await?;
    drop(handle);

    let outcome = run.await?;
    let _ = display.await;
    pb.finish_and_clear();

    let summary = match outcome {
        RunOutcome::Canceled => return Err(anyhow::anyhow!("Import canceled")),
        RunOutcome::Finished(summary) => summary,
    };

    if cli.verbose > 0 && ! summary.audit_log.is_empty() {
        wprintln!("Audit log:");
        eprint!("{}", summary.audit_log);
        wprintln!();
    }

    if summary.show_report && ! cli.quiet {
        summary.report.print_summary(&mut io::stderr());
    }

    if summary.report.totals.secret_not_imported() > 0 && ! cli.quiet {
        wprintln!();
        wprintln!(initial_indent = "Hint: ", subsequent_indent = "      ",
                  "The certificate store only keeps public certificates, \
                   secret key material was not imported.  To import \
                   secret keys, run:");
        wprintln!(indent = "  ", "sq key import FILE");
    }

    match summary.report.failures.len() {
        0 => Ok(()),
        n => Err(anyhow::anyhow!("{} failed", n.of("import"))),
    }
}

/// Submits every source named on the command line, and closes the
/// wave.
async fn submit_sources(cli: &Cli, handle: &OrchestratorHandle,
                        stdin: Option<Vec<u8>>)
                        -> Result<()>
{
    handle.set_accepting_more(true)?;

    let mut stdin = stdin;
    for file in &cli.files {
        if file == Path::new("-") {
            if let Some(bytes) = stdin.take() {
                handle.submit(ImportSource::RawData {
                    bytes,
                    protocol_hint: None,
                    label: "stdin".into(),
                    origin: Origin::Text,
                }, Protocol::OpenPGP)?;
            }
        } else {
            handle.submit_file(file)?;
        }
    }

    for id in &cli.fetch {
        handle.submit(ImportSource::fetch(vec![KeyId::new(id)], id.clone()),
                      Protocol::OpenPGP)?;
    }

    if ! cli.refresh.is_empty() {
        let keys = cli.refresh.iter().map(Fingerprint::new).collect();
        handle.submit(ImportSource::push(keys, "Key server refresh"),
                      Protocol::OpenPGP)?;
    }

    if ! cli.wkd.is_empty() {
        let http_client = http_client()?;
        let mut lookups = JoinSet::new();
        for address in cli.wkd.iter().cloned() {
            let http_client = http_client.clone();
            lookups.spawn(async move {
                let results = wkd::get(&http_client, &address).await;
                (address, results)
            });
        }

        while let Some(lookup) = lookups.join_next().await {
            let (address, results) = lookup?;
            let certs = match results {
                Ok(certs) => certs,
                Err(err) => {
                    wprintln!("{}: {}", address, err);
                    continue;
                }
            };

            let mut bytes = vec![];
            for cert in certs {
                match cert.and_then(|c| c.to_vec()) {
                    Ok(mut b) => bytes.append(&mut b),
                    Err(err) => wprintln!("{}: {}", address, err),
                }
            }
            handle.submit(ImportSource::wkd(bytes, address), Protocol::OpenPGP)?;
        }
    }

    handle.set_accepting_more(false)
}

/// Displays progress events on `pb` until the run is over.
async fn show_progress(pb: ProgressBar,
                       mut events: mpsc::UnboundedReceiver<ProgressEvent>)
{
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner} [{pos}/{len}] {wide_msg}")
    {
        pb.set_style(style);
    }

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::JobQueued { label } => {
                pb.inc_length(1);
                pb.set_message(format!("Queued {}", label));
            }
            ProgressEvent::JobStarted { label, kind } => {
                if kind == JobKind::External {
                    pb.inc_length(1);
                }
                pb.set_message(format!("Importing {} ({})", label, kind));
            }
            ProgressEvent::JobFinished { label, failed } => {
                pb.inc(1);
                if failed {
                    pb.set_message(format!("Importing {} failed", label));
                }
            }
            ProgressEvent::Relisting =>
                pb.set_message("Updating the certificate list"),
            ProgressEvent::Finalizing =>
                pb.finish_and_clear(),
        }
    }
}
