// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use url::Url;

use super::traits::{StorageError, Store, StoreKind};
use super::{select_by_date, select_persistents};
use crate::incident::Incident;

/// Volatile in-process store. Used for development targets (`memory://`)
/// and as the well-behaved backend in tests.
pub struct InMemoryStore {
    incidents: DashMap<String, Incident>,
    subscribers: Mutex<Vec<String>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            incidents: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Number of stored incidents (persistent or not)
    #[must_use]
    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    /// Drop all incidents and subscribers
    pub fn clear(&self) {
        self.incidents.clear();
        self.subscribers.lock().clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create(&self, incident: &Incident) -> Result<Incident, StorageError> {
        self.incidents.insert(incident.guid.clone(), incident.clone());
        Ok(incident.clone())
    }

    async fn update(&self, guid: &str, incident: &Incident) -> Result<Incident, StorageError> {
        let mut stored = incident.clone();
        stored.guid = guid.to_string();
        self.incidents.insert(stored.guid.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, guid: &str) -> Result<(), StorageError> {
        self.incidents
            .remove(guid)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(guid.to_string()))
    }

    async fn read(&self, guid: &str) -> Result<Incident, StorageError> {
        let mut incident = self
            .incidents
            .get(guid)
            .map(|r| r.value().clone())
            .ok_or_else(|| StorageError::NotFound(guid.to_string()))?;
        incident.sort_messages();
        Ok(incident)
    }

    async fn by_date(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StorageError> {
        let all: Vec<Incident> = self.incidents.iter().map(|r| r.value().clone()).collect();
        Ok(select_by_date(all, from, to))
    }

    async fn subscribe(&self, email: &str) -> Result<(), StorageError> {
        let mut subs = self.subscribers.lock();
        if !subs.iter().any(|s| s == email) {
            subs.push(email.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), StorageError> {
        self.subscribers.lock().retain(|s| s != email);
        Ok(())
    }

    async fn subscribers(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.subscribers.lock().clone())
    }

    async fn persistents(&self) -> Result<Vec<Incident>, StorageError> {
        let all: Vec<Incident> = self.incidents.iter().map(|r| r.value().clone()).collect();
        Ok(select_persistents(all))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Kind for `memory://` targets. Every open yields a fresh, empty store.
pub struct MemoryKind;

#[async_trait]
impl StoreKind for MemoryKind {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn detect(&self, target: &Url) -> bool {
        target.scheme() == "memory"
    }

    async fn open(&self, _target: &Url) -> Result<Arc<dyn Store>, StorageError> {
        Ok(Arc::new(InMemoryStore::new()))
    }
}
