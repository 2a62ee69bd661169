// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filesystem backend for `file://` targets.
//!
//! Layout inside the target directory:
//! ```text
//! <dir>/<guid>.json         one file per incident (persistent or not)
//! <dir>/subscribers.json    JSON array of emails
//! ```
//!
//! Writes go to a uniquely named temp file first and are renamed into place,
//! so a crashed write never leaves a half-written incident behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use super::traits::{StorageError, Store, StoreKind};
use super::{select_by_date, select_persistents, validate_guid, SUBSCRIBERS_KEY};
use crate::incident::Incident;

pub struct LocalStore {
    dir: PathBuf,
    /// Serialises read-modify-write cycles on the subscriber file
    subscribers_lock: Mutex<()>,
}

impl LocalStore {
    /// Open (and create if missing) a store rooted at `dir`.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::Backend(format!("create {}: {}", dir.display(), e)))?;
        info!(dir = %dir.display(), "Local store ready");
        Ok(Self {
            dir,
            subscribers_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn incident_path(&self, guid: &str) -> Result<PathBuf, StorageError> {
        validate_guid(guid)?;
        Ok(self.dir.join(format!("{}.json", guid)))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::Backend(format!("write {}: {}", tmp.display(), e)))?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::Backend(format!("rename {}: {}", path.display(), e)));
        }
        Ok(())
    }

    async fn write_incident(&self, incident: &Incident) -> Result<(), StorageError> {
        let path = self.incident_path(&incident.guid)?;
        let bytes = serde_json::to_vec(incident)?;
        self.write_atomic(&path, &bytes).await
    }

    async fn read_file(path: &Path, key: &str) -> Result<Incident, StorageError> {
        let bytes = fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Backend(format!("read {}: {}", path.display(), e)),
        })?;
        let mut incident: Incident = serde_json::from_slice(&bytes)?;
        incident.sort_messages();
        Ok(incident)
    }

    /// Every incident file in the directory. Temp files and the subscriber
    /// file are skipped.
    async fn load_all(&self) -> Result<Vec<Incident>, StorageError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StorageError::Backend(format!("list {}: {}", self.dir.display(), e)))?;

        let mut incidents = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == SUBSCRIBERS_KEY || !name.ends_with(".json") || name.ends_with(".tmp") {
                continue;
            }
            match Self::read_file(&entry.path(), &name).await {
                Ok(incident) => incidents.push(incident),
                // Deleted between listing and reading
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(incidents)
    }

    async fn load_subscribers(&self) -> Result<Vec<String>, StorageError> {
        let path = self.dir.join(SUBSCRIBERS_KEY);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::Backend(format!("read {}: {}", path.display(), e))),
        }
    }

    async fn store_subscribers(&self, subscribers: &[String]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(subscribers)?;
        self.write_atomic(&self.dir.join(SUBSCRIBERS_KEY), &bytes).await
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn create(&self, incident: &Incident) -> Result<Incident, StorageError> {
        self.write_incident(incident).await?;
        Ok(incident.clone())
    }

    async fn update(&self, guid: &str, incident: &Incident) -> Result<Incident, StorageError> {
        let mut stored = incident.clone();
        stored.guid = guid.to_string();
        self.write_incident(&stored).await?;
        Ok(stored)
    }

    async fn delete(&self, guid: &str) -> Result<(), StorageError> {
        let path = self.incident_path(guid)?;
        fs::remove_file(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(guid.to_string()),
            _ => StorageError::Backend(format!("remove {}: {}", path.display(), e)),
        })
    }

    async fn read(&self, guid: &str) -> Result<Incident, StorageError> {
        let path = self.incident_path(guid)?;
        Self::read_file(&path, guid).await
    }

    async fn by_date(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StorageError> {
        Ok(select_by_date(self.load_all().await?, from, to))
    }

    async fn subscribe(&self, email: &str) -> Result<(), StorageError> {
        let _guard = self.subscribers_lock.lock().await;
        let mut subs = self.load_subscribers().await?;
        if subs.iter().any(|s| s == email) {
            return Ok(());
        }
        subs.push(email.to_string());
        self.store_subscribers(&subs).await
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), StorageError> {
        let _guard = self.subscribers_lock.lock().await;
        let mut subs = self.load_subscribers().await?;
        let before = subs.len();
        subs.retain(|s| s != email);
        if subs.len() == before {
            debug!(dir = %self.dir.display(), "Unsubscribe of unknown email ignored");
            return Ok(());
        }
        self.store_subscribers(&subs).await
    }

    async fn subscribers(&self) -> Result<Vec<String>, StorageError> {
        self.load_subscribers().await
    }

    async fn persistents(&self) -> Result<Vec<Incident>, StorageError> {
        Ok(select_persistents(self.load_all().await?))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let meta = fs::metadata(&self.dir)
            .await
            .map_err(|e| StorageError::Backend(format!("stat {}: {}", self.dir.display(), e)))?;
        if !meta.is_dir() {
            return Err(StorageError::Backend(format!("{} is not a directory", self.dir.display())));
        }
        Ok(())
    }
}

/// Kind for `file://<path>` targets.
pub struct LocalKind;

impl LocalKind {
    /// Everything after `file://`, so both `file:///abs` and `file://rel/dir` work.
    fn dir_of(target: &Url) -> Result<PathBuf, StorageError> {
        let raw = target.as_str();
        let path = raw.strip_prefix("file://").unwrap_or(raw).trim_end_matches('/');
        if path.is_empty() {
            return Err(StorageError::Config(format!("no directory in target '{}'", raw)));
        }
        Ok(PathBuf::from(path))
    }
}

#[async_trait]
impl StoreKind for LocalKind {
    fn name(&self) -> &'static str {
        "file"
    }

    fn detect(&self, target: &Url) -> bool {
        target.scheme() == "file"
    }

    async fn open(&self, target: &Url) -> Result<Arc<dyn Store>, StorageError> {
        let dir = Self::dir_of(target)?;
        Ok(Arc::new(LocalStore::new(dir).await?))
    }
}
