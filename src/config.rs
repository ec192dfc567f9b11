//! Configuration model and file parsing.
//!
//! The configuration file is read, never written.  A missing file
//! yields the defaults:
//!
//! ```toml
//! [import]
//! retrieve-signer-keys = false
//! ask-ownertrust = true
//! offer-certification = true
//!
//! [network]
//! keyservers = [ "hkps://keys.openpgp.org" ]
//! ```

use std::{
    collections::HashSet,
    fs,
    io,
    path::{Path, PathBuf},
};

use anyhow::Context;

use toml_edit::{
    DocumentMut,
    Item,
    Value,
};

use sequoia_net::reqwest::Url;
use sequoia_directories::{Component, Home};

use crate::Result;

/// The keyservers queried if nothing else is configured.
pub const DEFAULT_KEYSERVERS: &[&str] = &[
    "hkps://keys.openpgp.org",
];

/// Settings that influence a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    /// Fetch keys that certified newly imported certificates.
    pub retrieve_signer_keys: bool,

    /// Ask whether imported secret keys are the user's own.
    pub ask_ownertrust: bool,

    /// Offer to certify a single newly imported certificate.
    pub offer_certification: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        ImportSettings {
            retrieve_signer_keys: false,
            ask_ownertrust: true,
            offer_certification: true,
        }
    }
}

/// Represents configuration at runtime.
#[derive(Debug, Clone, Default)]
pub struct Config {
    import: ImportSettings,
    key_servers: Option<Vec<String>>,
}

impl Config {
    /// Returns the path of the configuration file.
    pub fn file_name(home: &Home) -> PathBuf {
        home.config_dir(Component::Sq).join("import.toml")
    }

    /// Reads and validates the configuration file.
    ///
    /// If the file doesn't exist, the defaults are returned.
    pub fn read(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("{} does not exist, using defaults",
                                path.display());
                return Ok(Config::default());
            }
            Err(e) => return Err(anyhow::Error::from(e).context(
                format!("Reading configuration file {} failed",
                        path.display()))),
        };

        Self::parse(&raw)
            .with_context(|| format!("Parsing configuration file {} failed",
                                     path.display()))
    }

    /// Parses and validates a configuration.
    pub fn parse(raw: &str) -> Result<Self> {
        let doc: DocumentMut = raw.parse()?;
        let mut config = Config::default();
        apply_schema(&mut config, None, doc.iter(), TOP_LEVEL_SCHEMA)?;
        Ok(config)
    }

    /// Returns the settings for a run.
    pub fn import_settings(&self) -> ImportSettings {
        self.import
    }

    /// Returns the key servers to query.
    ///
    /// Handles the precedence of the various sources:
    ///
    /// - If servers are given on the command line, use them.
    /// - Otherwise, use the value from the configuration file (if any),
    /// - or use the default value.
    pub fn key_servers(&self, cli: &[String]) -> Vec<String> {
        if ! cli.is_empty() {
            return cli.to_vec();
        }

        self.key_servers.clone()
            .unwrap_or_else(|| DEFAULT_KEYSERVERS.iter()
                            .map(|s| s.to_string()).collect())
    }
}

/// Validates a configuration section using a schema, and applies it
/// to the configuration.
///
/// Returns an error if a key is unknown.
fn apply_schema<'toml>(config: &mut Config,
                       path: Option<&str>,
                       section: toml_edit::Iter<'toml>,
                       schema: Schema) -> Result<()> {
    let section = section.collect::<Vec<_>>();
    let known_keys: Vec<_> =
        schema.iter().map(|(key, _)| *key).collect();

    // Schema keys better be lowercase.
    debug_assert!(known_keys.iter().all(|&s| &s.to_lowercase() == s),
                  "keys in schema must be lowercase");

    // Schema keys better be sorted.
    debug_assert!(known_keys.windows(2).all(|v| v[0] <= v[1]),
                  "keys in schema must be sorted");

    let prefix = if let Some(path) = path {
        format!("{}.", path)
    } else {
        "".to_string()
    };

    let keys: HashSet<&str> = section
        .iter().map(|(key, _value)| *key)
        .collect();

    // The set of allowed keys are the known keys, plus
    // "ignore_invalid", and the value of "ignore_invalid".
    let mut allowed_keys: Vec<&str> = known_keys.to_vec();
    if let Some(ignore) = section.iter()
        .find_map(|(k, v)| (*k == "ignore_invalid").then_some(*v))
    {
        allowed_keys.push("ignore_invalid");
        match ignore {
            Item::Value(Value::String(k)) =>
                allowed_keys.push(k.value().as_str()),
            Item::Value(Value::Array(ks)) => {
                for k in ks {
                    if let Value::String(k) = k {
                        allowed_keys.push(k.value().as_str());
                    } else {
                        return Err(Error::ParseError(format!(
                            "'{}ignore_invalid' takes a string \
                             or an array of strings",
                            prefix)).into());
                    }
                }
            }
            _ => {
                return Err(Error::ParseError(format!(
                    "Invalid value for '{}ignore_invalid': {}, \
                     expected a string or an array of strings",
                    prefix, ignore)).into());
            }
        }
    }

    let unknown_keys = keys
        .difference(&allowed_keys.into_iter().collect())
        .copied()
        .collect::<Vec<_>>();
    if ! unknown_keys.is_empty() {
        return Err(Error::ParseError(format!(
            "{} has unknown keys: {}, valid keys are: {}",
            path.unwrap_or("top-level section"),
            unknown_keys.join(", "),
            known_keys.join(", "))).into());
    }

    for (key, value) in &section {
        if let Ok(i) = schema.binary_search_by_key(key, |(k, _)| k) {
            let apply = schema[i].1;
            (apply)(config, &format!("{}{}", prefix, key), value)
                .with_context(|| format!("Error validating {:?}", key))?;
        }
    }

    Ok(())
}

/// Errors used in this module.
///
/// Note: This enum cannot be exhaustively matched to allow future
/// extensions.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration item {0:?} is not a {1} but a {2}")]
    BadType(String, &'static str, &'static str),
}

impl Error {
    /// Returns an `Error::BadType` given an item.
    fn bad_item_type(path: &str, i: &Item, want_type: &'static str)
                     -> anyhow::Error
    {
        Error::BadType(path.into(), want_type, i.type_name()).into()
    }

    /// Returns an `Error::BadType` given a value.
    fn bad_value_type(path: &str, v: &Value, want_type: &'static str)
                      -> anyhow::Error
    {
        Error::BadType(path.into(), want_type, v.type_name()).into()
    }
}

/// A function that validates a node in the configuration tree with
/// the given path, and applies it to the configuration.
type Applicator = fn(&mut Config, &str, &Item) -> Result<()>;

/// A [`Schema`] maps keys to [`Applicator`]s.
type Schema = &'static [(&'static str, Applicator)];

/// Schema for the toplevel.
const TOP_LEVEL_SCHEMA: Schema = &[
    ("import", apply_import),
    ("network", apply_network),
];

/// Schema for the `import` section.
const IMPORT_SCHEMA: Schema = &[
    ("ask-ownertrust", apply_import_ask_ownertrust),
    ("offer-certification", apply_import_offer_certification),
    ("retrieve-signer-keys", apply_import_retrieve_signer_keys),
];

/// Validates the `import` section.
fn apply_import(config: &mut Config, path: &str, item: &Item) -> Result<()> {
    let section = item.as_table_like()
        .ok_or_else(|| Error::bad_item_type(path, item, "table"))?;
    apply_schema(config, Some(path), section.iter(), IMPORT_SCHEMA)?;
    Ok(())
}

/// Returns the boolean value of `item`.
fn bool_item(path: &str, item: &Item) -> Result<bool> {
    item.as_bool()
        .ok_or_else(|| Error::bad_item_type(path, item, "bool"))
}

/// Validates the `import.ask-ownertrust` value.
fn apply_import_ask_ownertrust(config: &mut Config, path: &str, item: &Item)
                               -> Result<()>
{
    config.import.ask_ownertrust = bool_item(path, item)?;
    Ok(())
}

/// Validates the `import.offer-certification` value.
fn apply_import_offer_certification(config: &mut Config, path: &str,
                                    item: &Item)
                                    -> Result<()>
{
    config.import.offer_certification = bool_item(path, item)?;
    Ok(())
}

/// Validates the `import.retrieve-signer-keys` value.
fn apply_import_retrieve_signer_keys(config: &mut Config, path: &str,
                                     item: &Item)
                                     -> Result<()>
{
    config.import.retrieve_signer_keys = bool_item(path, item)?;
    Ok(())
}

/// Schema for the `network` section.
const NETWORK_SCHEMA: Schema = &[
    ("keyservers", apply_network_keyservers),
];

/// Validates the `network` section.
fn apply_network(config: &mut Config, path: &str, item: &Item) -> Result<()> {
    let section = item.as_table_like()
        .ok_or_else(|| Error::bad_item_type(path, item, "table"))?;
    apply_schema(config, Some(path), section.iter(), NETWORK_SCHEMA)?;
    Ok(())
}

/// Validates the `network.keyservers` value.
fn apply_network_keyservers(config: &mut Config, path: &str, item: &Item)
                            -> Result<()>
{
    let list = item.as_array()
        .ok_or_else(|| Error::bad_item_type(path, item, "array"))?;

    let mut servers = Vec::new();
    for (i, server) in list.iter().enumerate() {
        let server_str = server.as_str()
            .ok_or_else(|| Error::bad_value_type(&format!("{}.{}", path, i),
                                                 server, "string"))?;

        let url = Url::parse(server_str)?;
        match url.scheme() {
            "hkp" => (),
            "hkps" => (),
            _ => return Err(anyhow::anyhow!(
                "must be a hkp:// or hkps:// URL: {}", url)),
        }

        servers.push(server_str.to_string());
    }

    config.key_servers = Some(servers);
    Ok(())
}
