//! Credential persistence and bootstrap import.
//!
//! The transport library owns the key material; this module owns where it
//! lives on disk. State is a directory with a single `creds.json`,
//! rewritten atomically (tmp + rename + fsync) on every credential
//! refresh so a crash mid-refresh leaves the prior state usable.
//!
//! A bootstrap blob (`label~base64(json)`) lets a deployment skip the
//! interactive QR pairing: the decoded JSON is the credential set from a
//! previous session. Malformed blobs fail soft.

use std::io::Write;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use herald_domain::{Error, Result};
use herald_transport::Creds;

const CREDS_FILE: &str = "creds.json";

pub struct CredsStore {
    dir: PathBuf,
}

impl CredsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the state directory if absent.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    /// Load the persisted credential set, if any. A corrupt file is
    /// treated as absent (the connect path falls back to pairing) but is
    /// logged loudly.
    pub fn load(&self) -> Option<Creds> {
        let path = self.creds_path();
        let data = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(creds) => Some(creds),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "unreadable credential file");
                None
            }
        }
    }

    /// Atomically persist the credential set. Called from the supervisor
    /// on every `CredsUpdate`.
    pub fn save(&self, creds: &Creds) -> Result<()> {
        self.ensure()?;
        let path = self.creds_path();
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(creds)?;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove all persisted state. Invoked after an unrecoverable
    /// disconnect (bad session, logged out).
    pub fn cleanup(&self) -> Result<()> {
        let path = self.creds_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "credentials wiped");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self) -> bool {
        self.creds_path().exists()
    }

    /// Import a `label~base64(json)` bootstrap blob. Returns true when a
    /// credential set was written. Any malformed input returns false —
    /// the caller proceeds to interactive authentication.
    pub fn import_bootstrap(&self, blob: &str) -> bool {
        match self.parse_and_save(blob) {
            Ok(label) => {
                tracing::info!(label, "bootstrap session imported");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "bootstrap blob rejected, falling back to pairing");
                false
            }
        }
    }

    fn parse_and_save(&self, blob: &str) -> Result<String> {
        let creds = parse_bootstrap(blob)?;
        self.save(&creds)?;
        let label = blob
            .split_once('~')
            .map(|(l, _)| l.to_string())
            .unwrap_or_default();
        Ok(label)
    }
}

/// Decode and validate a bootstrap blob without touching disk.
pub fn parse_bootstrap(blob: &str) -> Result<Creds> {
    let (label, payload) = blob
        .trim()
        .split_once('~')
        .ok_or_else(|| Error::Config("bootstrap blob missing `~` separator".into()))?;
    if label.is_empty() {
        return Err(Error::Config("bootstrap blob has an empty label".into()));
    }
    let decoded = BASE64
        .decode(payload.trim())
        .map_err(|e| Error::Config(format!("bootstrap blob is not base64: {e}")))?;
    // Creds deserialization enforces the required key set (noise key,
    // signed identity key, signed pre-key).
    let creds: Creds = serde_json::from_slice(&decoded)
        .map_err(|e| Error::Config(format!("bootstrap JSON unrecognized: {e}")))?;
    Ok(creds)
}
