// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Build a [`Store`] from target URLs.
//!
//! One target gives that backend directly (wrapped in [`Retry`]); several
//! targets give a [`Replicate`] coordinator over all of them.
//!
//! Candidate kinds are injected and tried in order:
//!
//! | Kind     | Schemes                                   |
//! |----------|-------------------------------------------|
//! | `sql`    | `sqlite`, `mysql`, `mariadb`, `postgres`  |
//! | `s3`     | `s3`                                      |
//! | `file`   | `file`                                    |
//! | `memory` | `memory`                                  |
//!
//! [`Retry`]: crate::resilience::retry::Retry
//! [`Replicate`]: crate::coordinator::Replicate

use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::config::StoreConfig;
use crate::coordinator::{ReplicateBuilder, ReplicateTimings};
use crate::resilience::retry::{RetryConfig, RetryKind};
use crate::storage::local::LocalKind;
use crate::storage::memory::MemoryKind;
use crate::storage::s3::S3Kind;
use crate::storage::sql::SqlKind;
use crate::storage::traits::{StorageError, Store, StoreKind};

/// Production candidate list, each kind wrapped in retry with `retry`.
#[must_use]
pub fn default_kinds(retry: RetryConfig) -> Vec<Arc<dyn StoreKind>> {
    let kinds: Vec<Arc<dyn StoreKind>> = vec![
        Arc::new(SqlKind),
        Arc::new(S3Kind),
        Arc::new(LocalKind),
        Arc::new(MemoryKind),
    ];
    kinds
        .into_iter()
        .map(|k| Arc::new(RetryKind::new(k, retry.clone())) as Arc<dyn StoreKind>)
        .collect()
}

pub struct Factory {
    kinds: Vec<Arc<dyn StoreKind>>,
    timings: ReplicateTimings,
}

impl Factory {
    pub fn new(kinds: Vec<Arc<dyn StoreKind>>) -> Self {
        Self {
            kinds,
            timings: ReplicateTimings::default(),
        }
    }

    /// Worker intervals for the coordinator built from several targets.
    #[must_use]
    pub fn with_timings(mut self, timings: ReplicateTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Default kinds and timings taken from `config`.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(default_kinds(config.retry_config())).with_timings(config.timings())
    }

    pub async fn build(&self, targets: &[Url]) -> Result<Arc<dyn Store>, StorageError> {
        match targets {
            [] => Err(StorageError::Config("no store targets configured".to_string())),
            [target] => self.single(target).await,
            _ => {
                // Before any backend is opened
                self.timings.validate()?;
                let mut builder = ReplicateBuilder::new(self.kinds.clone(), self.timings);
                for target in targets {
                    builder.register(target).await?;
                }
                Ok(Arc::new(builder.start()?))
            }
        }
    }

    async fn single(&self, target: &Url) -> Result<Arc<dyn Store>, StorageError> {
        let kind = self
            .kinds
            .iter()
            .find(|k| k.detect(target))
            .ok_or_else(|| StorageError::Config("no valid store found".to_string()))?;
        let store = kind.open(target).await?;
        info!(kind = kind.name(), scheme = target.scheme(), "Opened store");
        Ok(store)
    }
}

/// Parse `config.targets` and build the store they describe.
pub async fn open_from_config(config: &StoreConfig) -> Result<Arc<dyn Store>, StorageError> {
    let targets = config.parse_targets()?;
    Factory::from_config(config).build(&targets).await
}
