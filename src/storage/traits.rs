// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

use crate::incident::Incident;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Config(String),
    /// The request itself is malformed, e.g. a GUID no backend can store.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    /// Errors that retrying or replaying cannot fix.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, StorageError::NotFound(_) | StorageError::InvalidInput(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// The contract every backend and every decorator implements.
///
/// Implementations must tolerate overlapping calls from any number of tasks.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite the incident under its own GUID.
    async fn create(&self, incident: &Incident) -> Result<Incident, StorageError>;

    /// Store the incident under `guid`, replacing whatever was there.
    async fn update(&self, guid: &str, incident: &Incident) -> Result<Incident, StorageError>;

    async fn delete(&self, guid: &str) -> Result<(), StorageError>;

    async fn read(&self, guid: &str) -> Result<Incident, StorageError>;

    /// Non-persistent incidents created within `[from, to]`, oldest first.
    async fn by_date(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StorageError>;

    async fn subscribe(&self, email: &str) -> Result<(), StorageError>;
    async fn unsubscribe(&self, email: &str) -> Result<(), StorageError>;
    async fn subscribers(&self) -> Result<Vec<String>, StorageError>;

    /// Incidents flagged `persistent`, oldest first.
    async fn persistents(&self) -> Result<Vec<Incident>, StorageError>;

    /// Liveness check.
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Recognises target URLs for one backend type and opens stores for them.
#[async_trait]
pub trait StoreKind: Send + Sync {
    /// Short name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    fn detect(&self, target: &Url) -> bool;

    async fn open(&self, target: &Url) -> Result<Arc<dyn Store>, StorageError>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn create(&self, incident: &Incident) -> Result<Incident, StorageError> {
        (**self).create(incident).await
    }

    async fn update(&self, guid: &str, incident: &Incident) -> Result<Incident, StorageError> {
        (**self).update(guid, incident).await
    }

    async fn delete(&self, guid: &str) -> Result<(), StorageError> {
        (**self).delete(guid).await
    }

    async fn read(&self, guid: &str) -> Result<Incident, StorageError> {
        (**self).read(guid).await
    }

    async fn by_date(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StorageError> {
        (**self).by_date(from, to).await
    }

    async fn subscribe(&self, email: &str) -> Result<(), StorageError> {
        (**self).subscribe(email).await
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), StorageError> {
        (**self).unsubscribe(email).await
    }

    async fn subscribers(&self) -> Result<Vec<String>, StorageError> {
        (**self).subscribers().await
    }

    async fn persistents(&self) -> Result<Vec<Incident>, StorageError> {
        (**self).persistents().await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        (**self).ping().await
    }
}
