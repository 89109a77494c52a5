//! Durable credential and connection-record store.
//!
//! One JSON document per connection id under a configured data directory,
//! with the layout `{id, status, session, qrcode, retry_count}`. The
//! `session` field holds the serialized [`AuthState`] blob; byte fields
//! inside it are base64-armored so key material survives the text layer
//! byte-exactly.
//!
//! # Concurrency
//!
//! Key and credential updates are read-modify-write cycles, not
//! transactions. Concurrent writers to the same connection id can lose
//! updates. This is acceptable because exactly one adapter owns a
//! connection id at a time; if that ownership discipline is ever relaxed,
//! this store needs real mutual exclusion per id.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zap_protocol::{AuthState, ConnectionRecord, KeyKind, KeyMaterial};

use crate::error::{Error, Result};

/// Durable store of connection records and their credential blobs.
#[derive(Debug)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Creates a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory this store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid connection id: {id:?}"),
            )));
        }
        Ok(self.root.join(format!("{id}.json")))
    }

    /// Loads the record for `id`, or `None` if it was never created.
    ///
    /// A record that exists but fails to parse is an error, not an absence:
    /// silently treating corrupt credentials as missing would discard a
    /// paired session.
    pub fn load(&self, id: &str) -> Result<Option<ConnectionRecord>> {
        let path = self.record_path(id)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Writes `record` durably, creating the data directory if needed.
    pub fn save(&self, record: &ConnectionRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json)?;
        Ok(())
    }

    /// Loads, mutates, and saves the record for `id` in one call.
    ///
    /// Fails with [`Error::ConnectionNotFound`] if no record exists.
    pub fn update(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut ConnectionRecord),
    ) -> Result<ConnectionRecord> {
        let mut record = self
            .load(id)?
            .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?;
        mutate(&mut record);
        self.save(&record)?;
        Ok(record)
    }

    /// Deletes the record for `id`. Returns whether a record existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let path = self.record_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerates every persisted record.
    pub fn list(&self) -> Result<Vec<ConnectionRecord>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            records.push(serde_json::from_str(&content)?);
        }
        records.sort_by(|a: &ConnectionRecord, b: &ConnectionRecord| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Reads the credential blob for `id`, or `None` if the record is
    /// missing or was never provisioned.
    pub fn read_auth(&self, id: &str) -> Result<Option<AuthState>> {
        let Some(record) = self.load(id)? else {
            return Ok(None);
        };
        let Some(blob) = record.session else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&blob)?))
    }

    /// Serializes `auth` into the record's session blob.
    pub fn write_auth(&self, id: &str, auth: &AuthState) -> Result<()> {
        let blob = serde_json::to_string(auth)?;
        self.update(id, |record| record.session = Some(blob))?;
        Ok(())
    }

    /// Retrieves keys of `kind` for the ids present in the stored
    /// collection. Missing ids are simply absent from the result.
    pub fn get_keys(
        &self,
        id: &str,
        kind: KeyKind,
        ids: &[String],
    ) -> Result<HashMap<String, KeyMaterial>> {
        let Some(auth) = self.read_auth(id)? else {
            return Ok(HashMap::new());
        };
        let Some(collection) = auth.keys.get(&kind) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|key_id| {
                collection
                    .get(key_id)
                    .map(|material| (key_id.clone(), material.clone()))
            })
            .collect())
    }

    /// Merges `entries` into the stored collection for `kind`.
    ///
    /// Updates are additive: keys absent from `entries` are preserved. An
    /// entry may overwrite an existing key of the same id (session state is
    /// refreshed this way), but a later merge never drops unrelated keys.
    pub fn set_keys(
        &self,
        id: &str,
        kind: KeyKind,
        entries: HashMap<String, KeyMaterial>,
    ) -> Result<()> {
        if self.load(id)?.is_none() {
            return Err(Error::ConnectionNotFound(id.to_string()));
        }
        let mut auth = self.read_auth(id)?.unwrap_or_default();
        auth.keys.entry(kind).or_default().extend(entries);
        self.write_auth(id, &auth)
    }
}
