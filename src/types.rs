//! The data model shared by the orchestrator and its collaborators.

use std::fmt;
use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

/// The cryptographic protocol a certificate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    OpenPGP,
    CMS,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::OpenPGP => write!(f, "OpenPGP"),
            Protocol::CMS => write!(f, "S/MIME"),
        }
    }
}

/// File extensions of S/MIME certificate containers.
const CMS_EXTENSIONS: &[&str] = &["pem", "der", "crt", "cer", "p7c", "p12", "pfx"];

impl Protocol {
    /// Guesses the protocol of a certificate file from its extension.
    pub fn for_path(path: &Path) -> Protocol {
        let cms = path.extension()
            .and_then(|e| e.to_str())
            .map(|e| CMS_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if cms {
            Protocol::CMS
        } else {
            Protocol::OpenPGP
        }
    }
}

/// How a job touches the keyring.
///
/// Local jobs write already-held bytes into the keyring and must not
/// run concurrently.  External jobs fetch material from the network
/// first, and may run in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    Local,
    External,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Local => write!(f, "local"),
            JobKind::External => write!(f, "external"),
        }
    }
}

/// Normalizes a hexadecimal identifier.
///
/// Strips whitespace and an optional `0x` prefix, and upper-cases the
/// rest.
fn normalize_hex(s: &str) -> String {
    let s: String = s.chars().filter(|c| ! c.is_whitespace()).collect();
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
        .unwrap_or(&s[..]);
    s.to_ascii_uppercase()
}

/// A certificate fingerprint in hexadecimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns a fingerprint, normalizing the hexadecimal notation.
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        Fingerprint(normalize_hex(s.as_ref()))
    }

    /// Returns the fingerprint as string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key ID, i.e. the low 64 bits of the fingerprint.
    pub fn key_id(&self) -> KeyId {
        let start = self.0.len().saturating_sub(16);
        KeyId(self.0[start..].to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Fingerprint::new(s)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Fingerprint::new(s)
    }
}

/// A 64-bit key ID in hexadecimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    /// Returns a key ID, normalizing the hexadecimal notation.
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        KeyId(normalize_hex(s.as_ref()))
    }

    /// Returns the key ID as string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(s: &str) -> Self {
        KeyId::new(s)
    }
}

impl From<&Fingerprint> for KeyId {
    fn from(fp: &Fingerprint) -> Self {
        fp.key_id()
    }
}

/// Where raw certificate data came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Read from a file.  The file may also bundle group definitions.
    File(PathBuf),
    Clipboard,
    /// Pasted or typed in by the user.
    Text,
    /// Retrieved from a Web Key Directory.
    Wkd { url: String },
}

/// Certificate material offered for import.
///
/// Sources are immutable once submitted.
#[derive(Debug, Clone)]
pub enum ImportSource {
    /// Raw certificate data.
    RawData {
        bytes: Vec<u8>,
        protocol_hint: Option<Protocol>,
        label: String,
        origin: Origin,
    },

    /// Already-known keys (e.g. from a keyserver listing) handed back
    /// to a keyserver-like backend to import them.
    KeyPush {
        keys: Vec<Fingerprint>,
        label: String,
    },

    /// Keys to fetch by key ID.
    KeyIdFetch {
        ids: Vec<KeyId>,
        label: String,
    },
}

impl ImportSource {
    /// Reads certificate data from a file.
    ///
    /// The file name is used as label, and the extension decides the
    /// protocol hint.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        Ok(ImportSource::RawData {
            bytes,
            protocol_hint: Some(Protocol::for_path(path)),
            label: path.display().to_string(),
            origin: Origin::File(path.to_path_buf()),
        })
    }

    /// Returns a source for data taken from the clipboard.
    pub fn clipboard(bytes: Vec<u8>) -> Self {
        ImportSource::RawData {
            bytes,
            protocol_hint: None,
            label: "Clipboard".into(),
            origin: Origin::Clipboard,
        }
    }

    /// Returns a source for pasted text.
    pub fn text(bytes: Vec<u8>) -> Self {
        ImportSource::RawData {
            bytes,
            protocol_hint: None,
            label: "Notepad".into(),
            origin: Origin::Text,
        }
    }

    /// Returns a source for data retrieved from a Web Key Directory.
    pub fn wkd<S: Into<String>>(bytes: Vec<u8>, url: S) -> Self {
        let url = url.into();
        ImportSource::RawData {
            bytes,
            protocol_hint: Some(Protocol::OpenPGP),
            label: url.clone(),
            origin: Origin::Wkd { url },
        }
    }

    /// Returns a source fetching the given key IDs.
    pub fn fetch<S: Into<String>>(ids: Vec<KeyId>, label: S) -> Self {
        ImportSource::KeyIdFetch {
            ids,
            label: label.into(),
        }
    }

    /// Returns a source importing the given keys through a keyserver.
    pub fn push<S: Into<String>>(keys: Vec<Fingerprint>, label: S) -> Self {
        ImportSource::KeyPush {
            keys,
            label: label.into(),
        }
    }

    /// Returns the human-readable label of this source.
    pub fn label(&self) -> &str {
        match self {
            ImportSource::RawData { label, .. } => label,
            ImportSource::KeyPush { label, .. } => label,
            ImportSource::KeyIdFetch { label, .. } => label,
        }
    }

    /// Returns the protocol to import this source with.
    ///
    /// Raw data without a hint, and all keyserver sources, are
    /// OpenPGP.
    pub fn protocol(&self) -> Protocol {
        match self {
            ImportSource::RawData { protocol_hint: Some(p), .. } => *p,
            _ => Protocol::OpenPGP,
        }
    }

    /// Returns how a job importing this source touches the keyring.
    pub fn kind(&self) -> JobKind {
        match self {
            ImportSource::RawData { origin: Origin::Wkd { .. }, .. } =>
                JobKind::External,
            ImportSource::RawData { .. } => JobKind::Local,
            ImportSource::KeyPush { .. } => JobKind::External,
            ImportSource::KeyIdFetch { .. } => JobKind::External,
        }
    }

    /// Returns the file this source was read from, if any.
    pub fn file(&self) -> Option<&Path> {
        match self {
            ImportSource::RawData { origin: Origin::File(p), .. } =>
                Some(p.as_path()),
            _ => None,
        }
    }
}

/// Import counters reported by a backend job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub considered: usize,
    pub imported: usize,
    pub unchanged: usize,
    pub new_signatures: usize,
    pub new_user_ids: usize,
    pub new_subkeys: usize,
    pub new_revocations: usize,
    pub secret_considered: usize,
    pub secret_imported: usize,
    pub secret_unchanged: usize,
    pub v3_skipped: usize,
    pub not_imported: usize,
    pub without_user_id: usize,
}

impl Counts {
    /// Returns the number of secret keys that were considered, but
    /// neither imported nor found unchanged.
    pub fn secret_not_imported(&self) -> usize {
        self.secret_considered
            .saturating_sub(self.secret_imported)
            .saturating_sub(self.secret_unchanged)
    }
}

impl AddAssign for Counts {
    fn add_assign(&mut self, other: Self) {
        self.considered += other.considered;
        self.imported += other.imported;
        self.unchanged += other.unchanged;
        self.new_signatures += other.new_signatures;
        self.new_user_ids += other.new_user_ids;
        self.new_subkeys += other.new_subkeys;
        self.new_revocations += other.new_revocations;
        self.secret_considered += other.secret_considered;
        self.secret_imported += other.secret_imported;
        self.secret_unchanged += other.secret_unchanged;
        self.v3_skipped += other.v3_skipped;
        self.not_imported += other.not_imported;
        self.without_user_id += other.without_user_id;
    }
}

/// What happened to a single certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportStatus {
    NewKey,
    ContainedSecretKey,
    NewUserIds,
    NewSignatures,
    NewSubkeys,
    Unchanged,
}

/// A certificate touched by an import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedCertRecord {
    pub fingerprint: Fingerprint,
    pub status: ImportStatus,
}

impl ImportedCertRecord {
    pub fn new<F: Into<Fingerprint>>(fingerprint: F, status: ImportStatus)
                                     -> Self
    {
        ImportedCertRecord {
            fingerprint: fingerprint.into(),
            status,
        }
    }
}

/// A named group of certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGroup {
    /// Identifies the group in the cache.
    pub id: String,
    pub name: String,
    pub members: Vec<Fingerprint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    New,
    Updated,
}

/// A group definition imported from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedGroup {
    pub source_label: String,
    pub group: KeyGroup,
    pub status: GroupStatus,
}

/// Tags the wave a run is currently processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveKind {
    /// The sources submitted by the caller.
    Initial,

    /// Fetches of keys that certified newly imported certificates.
    ///
    /// A follow-up wave never spawns another follow-up.
    SignerKeyFollowUp,
}
