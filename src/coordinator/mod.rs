// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicate coordinator.
//!
//! The [`Replicate`] store fans every write out to all registered backends and
//! answers reads from the first backend that can. A write that fails on some
//! backend (but not on all of them) is recorded and replayed there later:
//!
//! ```text
//!  write ──► backend A ✓
//!        ──► backend B ✗ ──► ReplayRecord ──(replay worker)──► backend B ✓ ──► tombstoned
//!                                                                     (clean worker) ──► dropped
//! ```
//!
//! Success means "durable on at least one backend". There is no quorum and no
//! reconciliation between backends that disagree; reads go to backends in
//! registration order.
//!
//! # Lifecycle
//!
//! ```text
//! ReplicateBuilder::new → register(url)* → start() → Replicate (workers running) → shutdown/drop
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use incident_store::{ReplicateBuilder, ReplicateTimings, Store, factory::default_kinds, RetryConfig};
//! use url::Url;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), incident_store::StorageError> {
//! let mut builder = ReplicateBuilder::new(default_kinds(RetryConfig::default()), ReplicateTimings::default());
//! builder.register(&Url::parse("sqlite:///var/lib/status/status.db").unwrap()).await?;
//! builder.register(&Url::parse("file:///var/lib/status/incidents").unwrap()).await?;
//!
//! let store = builder.start()?;
//! store.ping().await?;
//! # Ok(())
//! # }
//! ```

mod types;
mod api;
mod lifecycle;

pub use types::{ReplayAction, ReplayRecord, ReplicateTimings, WriteOp};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;
use url::Url;

use crate::storage::traits::{StorageError, Store, StoreKind};
use types::{redact, Backend};

/// State shared between the coordinator and its background workers.
pub(crate) struct Shared {
    /// Frozen at `start()`; iterated in registration order
    pub(crate) backends: Vec<Backend>,
    /// Pending and tombstoned replay records. Never locked across an await.
    pub(crate) records: Mutex<Vec<Arc<ReplayRecord>>>,
}

impl Shared {
    pub(crate) fn backend(&self, key: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.key == key)
    }
}

/// Collects backends before the coordinator starts.
pub struct ReplicateBuilder {
    kinds: Vec<Arc<dyn StoreKind>>,
    timings: ReplicateTimings,
    backends: Vec<Backend>,
}

impl ReplicateBuilder {
    /// `kinds` are tried in order when registering a target URL.
    pub fn new(kinds: Vec<Arc<dyn StoreKind>>, timings: ReplicateTimings) -> Self {
        Self {
            kinds,
            timings,
            backends: Vec::new(),
        }
    }

    /// The coordinator accepts any target; matching happens per registration.
    pub fn detect(&self, _target: &Url) -> bool {
        true
    }

    /// Open a backend for `target` with the first kind that recognises it.
    pub async fn register(&mut self, target: &Url) -> Result<(), StorageError> {
        let key = target.to_string();
        let label = redact(target);
        self.ensure_unique(&key, &label)?;

        let kind = self
            .kinds
            .iter()
            .find(|k| k.detect(target))
            .ok_or_else(|| StorageError::Config(format!("no valid store found for '{}'", label)))?;

        let store = kind.open(target).await?;
        info!(backend = %label, kind = kind.name(), position = self.backends.len(), "Registered backend");
        self.backends.push(Backend { key, label, store });
        Ok(())
    }

    /// Register an already-built store under `key`.
    pub fn register_store(
        &mut self,
        key: impl Into<String>,
        store: Arc<dyn Store>,
    ) -> Result<(), StorageError> {
        let key = key.into();
        let label = Url::parse(&key).map(|u| redact(&u)).unwrap_or_else(|_| key.clone());
        self.ensure_unique(&key, &label)?;
        info!(backend = %label, position = self.backends.len(), "Registered backend");
        self.backends.push(Backend { key, label, store });
        Ok(())
    }

    fn ensure_unique(&self, key: &str, label: &str) -> Result<(), StorageError> {
        if self.backends.iter().any(|b| b.key == key) {
            return Err(StorageError::Config(format!("target '{}' registered twice", label)));
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Freeze the backend list and spawn the replay and clean workers.
    ///
    /// Must be called from within a Tokio runtime. Fails with `Config` if
    /// either interval is zero.
    pub fn start(self) -> Result<Replicate, StorageError> {
        self.timings.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StorageError::Config(format!("replicate needs a Tokio runtime: {}", e)))?;

        let shared = Arc::new(Shared {
            backends: self.backends,
            records: Mutex::new(Vec::new()),
        });
        let workers = lifecycle::spawn_workers(&runtime, shared.clone(), self.timings);

        info!(
            backends = shared.backends.len(),
            replay_interval = ?self.timings.replay_interval,
            clean_interval = ?self.timings.clean_interval,
            "Replicate coordinator started"
        );

        Ok(Replicate {
            shared,
            workers: Mutex::new(workers),
            timings: self.timings,
        })
    }
}

/// Store that replicates writes over several backends.
///
/// # Thread Safety
///
/// `Send + Sync`; callers share it behind an `Arc`. The backend list is
/// immutable, the replay queue sits behind one short-lived mutex and the
/// tombstone flags are atomic.
pub struct Replicate {
    pub(super) shared: Arc<Shared>,
    pub(super) workers: Mutex<Vec<JoinHandle<()>>>,
    pub(super) timings: ReplicateTimings,
}

impl Replicate {
    /// Backend keys in registration order.
    pub fn backend_keys(&self) -> Vec<String> {
        self.shared.backends.iter().map(|b| b.key.clone()).collect()
    }

    pub fn timings(&self) -> ReplicateTimings {
        self.timings
    }

    /// Snapshot of the replay queue (pending and tombstoned records).
    #[cfg(test)]
    pub(crate) fn records_snapshot(&self) -> Vec<Arc<ReplayRecord>> {
        self.shared.records.lock().clone()
    }
}

impl Drop for Replicate {
    fn drop(&mut self) {
        self.shutdown();
    }
}
