//! Command-line interface.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[clap(
    name = "sq-import",
    about = "Import certificates from files, key servers, and WKD",
    long_about = "Import certificates from files, key servers, and WKD

All sources are imported in one run.  Files are imported one after \
the other, while certificates are fetched from the network in \
parallel.  Once every source is imported, a report is printed.

If a single new certificate was imported, `sq-import` offers to \
certify it.  If a certificate with secret key material was imported, \
`sq-import` asks whether it is your own.  Use `--batch` to never ask \
questions.
",
    disable_colored_help = true,
    arg_required_else_help = true,
    after_help = "EXAMPLES:

# Import certificates from a file
$ sq-import alice.pgp

# Fetch a certificate from the key servers
$ sq-import --fetch 0x6B2E7E2C4A6F2E1A

# Look up a certificate using WKD
$ sq-import --wkd alice@example.org",
)]
pub struct Cli {
    #[clap(
        value_name = "FILE",
        help = "Import the certificates in FILE",
        long_help = "Import the certificates in FILE.  \
Use `-` to read from stdin.  Group definitions bundled with the \
certificates are imported as well.",
    )]
    pub files: Vec<PathBuf>,

    #[clap(
        long = "fetch",
        value_name = "KEYID",
        help = "Fetch the certificate with KEYID from the key servers",
    )]
    pub fetch: Vec<String>,

    #[clap(
        long = "refresh",
        value_name = "FINGERPRINT",
        help = "Refresh the certificate with FINGERPRINT from the key servers",
    )]
    pub refresh: Vec<String>,

    #[clap(
        long = "wkd",
        value_name = "ADDRESS",
        help = "Look up certificates for ADDRESS using WKD",
    )]
    pub wkd: Vec<String>,

    #[clap(
        long = "keyserver",
        value_name = "URI",
        help = "Query URI instead of the configured key servers",
    )]
    pub keyservers: Vec<String>,

    #[clap(
        long,
        value_name = "PATH",
        env = "SEQUOIA_HOME",
        help = "Set the home directory",
    )]
    pub home: Option<PathBuf>,

    #[clap(
        long = "cert-store",
        value_name = "PATH",
        env = "PGP_CERT_D",
        help = "Import into the certificate store at PATH",
    )]
    pub cert_store: Option<PathBuf>,

    #[clap(
        long,
        value_name = "FILE",
        help = "Read the configuration from FILE",
    )]
    pub config: Option<PathBuf>,

    #[clap(
        long = "retrieve-signer-keys",
        help = "Fetch the keys that certified imported certificates",
    )]
    pub retrieve_signer_keys: bool,

    #[clap(
        long,
        help = "Never ask questions",
    )]
    pub batch: bool,

    #[clap(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help = "Be more verbose",
        long_help = "Be more verbose.  Prints the audit log.  \
Given twice, also enables debug logging.",
    )]
    pub verbose: u8,

    #[clap(
        short = 'q',
        long = "quiet",
        help = "Be more quiet",
        conflicts_with = "verbose",
    )]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn repeated_options() {
        let cli = Cli::parse_from([
            "sq-import", "a.pgp", "b.pgp",
            "--fetch", "AAAA", "--fetch", "BBBB", "-vv",
        ]);
        assert_eq!(cli.files.len(), 2);
        assert_eq!(cli.fetch, vec!["AAAA", "BBBB"]);
        assert_eq!(cli.verbose, 2);
    }
}
