// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the replicate coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::incident::Incident;
use crate::storage::traits::{StorageError, Store};

/// Kind of write captured by a replay record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayAction {
    Create,
    Update,
    Delete,
    Subscribe,
    Unsubscribe,
}

impl ReplayAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

impl std::fmt::Display for ReplayAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical write, with everything needed to apply it again later.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create(Incident),
    Update { guid: String, incident: Incident },
    Delete(String),
    Subscribe(String),
    Unsubscribe(String),
}

impl WriteOp {
    #[must_use]
    pub fn action(&self) -> ReplayAction {
        match self {
            Self::Create(_) => ReplayAction::Create,
            Self::Update { .. } => ReplayAction::Update,
            Self::Delete(_) => ReplayAction::Delete,
            Self::Subscribe(_) => ReplayAction::Subscribe,
            Self::Unsubscribe(_) => ReplayAction::Unsubscribe,
        }
    }

    /// Apply to one backend. Returns the stored incident for create/update.
    pub async fn apply(&self, store: &dyn Store) -> Result<Option<Incident>, StorageError> {
        match self {
            Self::Create(incident) => store.create(incident).await.map(Some),
            Self::Update { guid, incident } => store.update(guid, incident).await.map(Some),
            Self::Delete(guid) => store.delete(guid).await.map(|_| None),
            Self::Subscribe(email) => store.subscribe(email).await.map(|_| None),
            Self::Unsubscribe(email) => store.unsubscribe(email).await.map(|_| None),
        }
    }
}

/// A write that failed on one backend and waits to be replayed there.
#[derive(Debug)]
pub struct ReplayRecord {
    /// Registration key of the backend the write failed on
    pub backend: String,
    pub op: WriteOp,
    /// Set by the replay worker once the write lands; the clean sweep drops
    /// the record afterwards.
    tombstoned: AtomicBool,
}

impl ReplayRecord {
    pub(crate) fn new(backend: String, op: WriteOp) -> Self {
        Self {
            backend,
            op,
            tombstoned: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn action(&self) -> ReplayAction {
        self.op.action()
    }

    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned.load(Ordering::Acquire)
    }

    pub(crate) fn tombstone(&self) {
        self.tombstoned.store(true, Ordering::Release);
    }
}

/// A registered backend.
pub(crate) struct Backend {
    /// Target URL string, unique per coordinator
    pub key: String,
    /// Credential-free form of `key` for logs and metric labels
    pub label: String,
    pub store: Arc<dyn Store>,
}

/// Wake-up intervals of the background workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicateTimings {
    pub replay_interval: Duration,
    pub clean_interval: Duration,
}

impl Default for ReplicateTimings {
    fn default() -> Self {
        Self {
            replay_interval: Duration::from_secs(90),
            clean_interval: Duration::from_secs(3600),
        }
    }
}

impl ReplicateTimings {
    /// Both workers tick on these intervals, so neither may be zero.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.replay_interval.is_zero() {
            return Err(StorageError::Config("replay interval must be greater than zero".to_string()));
        }
        if self.clean_interval.is_zero() {
            return Err(StorageError::Config("clean interval must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Strip credentials and query parameters from a target for display.
pub(crate) fn redact(target: &Url) -> String {
    let mut shown = target.clone();
    let _ = shown.set_password(None);
    let _ = shown.set_username("");
    shown.set_query(None);
    shown.to_string()
}
