// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic for transient storage failures.
//!
//! Two layers live here:
//! - [`retry_if`] / [`retry`]: a generic async retry loop driven by a [`RetryConfig`]
//! - [`Retry`]: a [`Store`] decorator that runs every operation through that loop,
//!   treating [`StorageError::NotFound`] as permanent
//!
//! # Example
//!
//! ```
//! use incident_store::RetryConfig;
//! use std::time::Duration;
//!
//! // Store operations: 3 attempts, fixed 500ms apart
//! let ops = RetryConfig::default();
//! assert_eq!(ops.max_attempts, 3);
//! assert_eq!(ops.initial_delay, Duration::from_millis(500));
//!
//! // Startup: exponential backoff while a backend comes up
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, 5);
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::incident::Incident;
use crate::storage::traits::{StorageError, Store, StoreKind};

/// Configuration for operation retry behavior.
///
/// A `factor` of 1.0 gives a fixed delay between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts, including the first one.
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(500))
    }
}

impl RetryConfig {
    /// `attempts` tries separated by a constant `delay`.
    #[must_use]
    pub fn fixed(attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            factor: 1.0,
        }
    }

    /// Fast-fail retry for initial backend connections.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self::fixed(3, Duration::from_millis(1))
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
///
/// Errors for which `is_permanent` returns true are returned immediately.
/// There is no sleep after the final attempt.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    is_permanent: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if is_permanent(&err) {
                    debug!(operation = operation_name, error = %err, "Permanent failure, not retrying");
                    return Err(err);
                }
                if attempts >= max {
                    return Err(err);
                }

                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, max, err, delay
                );
                crate::metrics::record_retry(operation_name);

                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}

/// [`retry_if`] where every error is transient.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, |_| false, operation).await
}

/// Store decorator that retries transient failures of the wrapped store.
pub struct Retry<S> {
    inner: S,
    config: RetryConfig,
    backend: &'static str,
}

impl<S: Store> Retry<S> {
    /// Wrap `inner`; `backend` labels logs and metrics.
    pub fn new(inner: S, config: RetryConfig, backend: &'static str) -> Self {
        Self { inner, config, backend }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn op_name(&self, op: &str) -> String {
        format!("{}_{}", self.backend, op)
    }
}

#[async_trait]
impl<S: Store> Store for Retry<S> {
    async fn create(&self, incident: &Incident) -> Result<Incident, StorageError> {
        retry_if(&self.op_name("create"), &self.config, StorageError::is_permanent, || {
            self.inner.create(incident)
        })
        .await
    }

    async fn update(&self, guid: &str, incident: &Incident) -> Result<Incident, StorageError> {
        retry_if(&self.op_name("update"), &self.config, StorageError::is_permanent, || {
            self.inner.update(guid, incident)
        })
        .await
    }

    async fn delete(&self, guid: &str) -> Result<(), StorageError> {
        retry_if(&self.op_name("delete"), &self.config, StorageError::is_permanent, || {
            self.inner.delete(guid)
        })
        .await
    }

    async fn read(&self, guid: &str) -> Result<Incident, StorageError> {
        retry_if(&self.op_name("read"), &self.config, StorageError::is_permanent, || {
            self.inner.read(guid)
        })
        .await
    }

    async fn by_date(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StorageError> {
        retry_if(&self.op_name("by_date"), &self.config, StorageError::is_permanent, || {
            self.inner.by_date(from, to)
        })
        .await
    }

    async fn subscribe(&self, email: &str) -> Result<(), StorageError> {
        retry_if(&self.op_name("subscribe"), &self.config, StorageError::is_permanent, || {
            self.inner.subscribe(email)
        })
        .await
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), StorageError> {
        retry_if(&self.op_name("unsubscribe"), &self.config, StorageError::is_permanent, || {
            self.inner.unsubscribe(email)
        })
        .await
    }

    async fn subscribers(&self) -> Result<Vec<String>, StorageError> {
        retry_if(&self.op_name("subscribers"), &self.config, StorageError::is_permanent, || {
            self.inner.subscribers()
        })
        .await
    }

    async fn persistents(&self) -> Result<Vec<Incident>, StorageError> {
        retry_if(&self.op_name("persistents"), &self.config, StorageError::is_permanent, || {
            self.inner.persistents()
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        retry_if(&self.op_name("ping"), &self.config, StorageError::is_permanent, || {
            self.inner.ping()
        })
        .await
    }
}

/// Wraps another kind so that every store it opens comes back Retry-wrapped.
pub struct RetryKind {
    inner: Arc<dyn StoreKind>,
    config: RetryConfig,
}

impl RetryKind {
    pub fn new(inner: Arc<dyn StoreKind>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl StoreKind for RetryKind {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn detect(&self, target: &Url) -> bool {
        self.inner.detect(target)
    }

    async fn open(&self, target: &Url) -> Result<Arc<dyn Store>, StorageError> {
        let store = self.inner.open(target).await?;
        Ok(Arc::new(Retry::new(store, self.config.clone(), self.inner.name())))
    }
}
