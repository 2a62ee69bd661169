// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store implementation: fan-out writes and first-success reads.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::incident::Incident;
use crate::metrics::{self, LatencyTimer};
use crate::storage::traits::{StorageError, Store};

use super::{Replicate, ReplayRecord, WriteOp};

impl Replicate {
    /// Apply `op` to every backend, in order, without stopping early.
    ///
    /// Succeeds if at least one backend accepted the write, returning the
    /// payload from the last backend that did. Each transient failure is
    /// queued for replay on that backend. If every backend failed, the last
    /// error is returned.
    pub(super) async fn fan_out(&self, op: &WriteOp) -> Result<Option<Incident>, StorageError> {
        let action = op.action();
        let _timer = LatencyTimer::new(action.as_str());

        let mut last_ok: Option<Option<Incident>> = None;
        let mut last_err: Option<StorageError> = None;

        for backend in &self.shared.backends {
            match op.apply(backend.store.as_ref()).await {
                Ok(out) => {
                    metrics::record_operation(&backend.label, action.as_str(), "success");
                    last_ok = Some(out);
                }
                Err(e) => {
                    metrics::record_operation(&backend.label, action.as_str(), "error");
                    if e.is_permanent() {
                        debug!(backend = %backend.label, %action, error = %e, "Permanent failure, not queued for replay");
                    } else {
                        warn!(backend = %backend.label, %action, error = %e, "Write failed, queued for replay");
                        self.queue(&backend.key, &backend.label, op);
                    }
                    last_err = Some(e);
                }
            }
        }

        match (last_ok, last_err) {
            (Some(out), _) => Ok(out),
            (None, Some(e)) => {
                error!(%action, error = %e, "Write failed on every backend");
                Err(e)
            }
            (None, None) => Err(StorageError::Config("no backends registered".to_string())),
        }
    }

    fn queue(&self, key: &str, label: &str, op: &WriteOp) {
        let record = Arc::new(ReplayRecord::new(key.to_string(), op.clone()));
        let depth = {
            let mut records = self.shared.records.lock();
            records.push(record);
            records.len()
        };
        metrics::record_replay_queued(label, op.action().as_str());
        debug!(backend = %label, action = %op.action(), queue_depth = depth, "Added replay record");
    }

    /// Return the first backend answer that isn't an error.
    async fn read_first<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, StorageError>
    where
        F: Fn(Arc<dyn Store>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let _timer = LatencyTimer::new(operation);
        let mut last_err = StorageError::Config("no backends registered".to_string());

        for backend in &self.shared.backends {
            match call(backend.store.clone()).await {
                Ok(value) => {
                    metrics::record_operation(&backend.label, operation, "success");
                    return Ok(value);
                }
                Err(e) => {
                    metrics::record_operation(&backend.label, operation, "error");
                    debug!(backend = %backend.label, operation, error = %e, "Read failed, trying next backend");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl Store for Replicate {
    async fn create(&self, incident: &Incident) -> Result<Incident, StorageError> {
        let stored = self.fan_out(&WriteOp::Create(incident.clone())).await?;
        Ok(stored.unwrap_or_else(|| incident.clone()))
    }

    async fn update(&self, guid: &str, incident: &Incident) -> Result<Incident, StorageError> {
        let op = WriteOp::Update {
            guid: guid.to_string(),
            incident: incident.clone(),
        };
        let stored = self.fan_out(&op).await?;
        Ok(stored.unwrap_or_else(|| incident.clone()))
    }

    async fn delete(&self, guid: &str) -> Result<(), StorageError> {
        self.fan_out(&WriteOp::Delete(guid.to_string())).await.map(|_| ())
    }

    async fn read(&self, guid: &str) -> Result<Incident, StorageError> {
        self.read_first("read", |s| async move { s.read(guid).await }).await
    }

    async fn by_date(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StorageError> {
        self.read_first("by_date", |s| async move { s.by_date(from, to).await }).await
    }

    async fn subscribe(&self, email: &str) -> Result<(), StorageError> {
        self.fan_out(&WriteOp::Subscribe(email.to_string())).await.map(|_| ())
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), StorageError> {
        self.fan_out(&WriteOp::Unsubscribe(email.to_string())).await.map(|_| ())
    }

    async fn subscribers(&self) -> Result<Vec<String>, StorageError> {
        self.read_first("subscribers", |s| async move { s.subscribers().await }).await
    }

    async fn persistents(&self) -> Result<Vec<Incident>, StorageError> {
        self.read_first("persistents", |s| async move { s.persistents().await }).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.read_first("ping", |s| async move { s.ping().await }).await
    }
}
