//! Per-domain credential store backing the auto-login action.
//!
//! Secrets are stored in plaintext at rest; encrypting the file is out of
//! scope for the core and documented as a limitation.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    pub username: String,
    pub password: String,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    records: HashMap<String, CredentialRecord>,
}

impl CredentialStore {
    pub fn open(path: Option<PathBuf>) -> Self {
        let records = match &path {
            Some(file) if file.exists() => match Self::read_records(file) {
                Ok(records) => {
                    info!("loaded credentials for {} sites", records.len());
                    records
                }
                Err(err) => {
                    warn!("failed to load credentials from {}: {err}", file.display());
                    HashMap::new()
                }
            },
            _ => HashMap::new(),
        };
        Self { path, records }
    }

    /// The host portion of a URL, used as the store key.
    pub fn domain_of(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
    }

    pub fn get(&self, domain: &str) -> Option<&CredentialRecord> {
        self.records.get(domain)
    }

    pub fn set(&mut self, domain: &str, username: &str, password: &str) {
        self.records.insert(
            domain.to_string(),
            CredentialRecord {
                username: username.to_string(),
                password: password.to_string(),
                saved_at: Utc::now(),
            },
        );
        self.save();
        info!("saved credentials for {domain}");
    }

    fn read_records(path: &Path) -> Result<HashMap<String, CredentialRecord>, io::Error> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(io::Error::other)
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = self.write_atomic(path) {
            error!("failed to save credentials to {}: {err}", path.display());
        }
    }

    fn write_atomic(&self, path: &Path) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&tmp, &self.records).map_err(io::Error::other)?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}
