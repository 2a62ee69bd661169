// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the incident store.
//!
//! # Example
//!
//! ```
//! use incident_store::StoreConfig;
//!
//! // Minimal config (uses defaults)
//! let config = StoreConfig::default();
//! assert_eq!(config.retry_attempts, 3);
//!
//! // Replicated over a database and a local directory
//! let config = StoreConfig {
//!     targets: vec![
//!         "sqlite:///var/lib/status/status.db".into(),
//!         "file:///var/lib/status/incidents".into(),
//!     ],
//!     replay_interval_secs: 30,
//!     ..Default::default()
//! };
//! assert_eq!(config.parse_targets().unwrap().len(), 2);
//! ```

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::coordinator::ReplicateTimings;
use crate::resilience::retry::RetryConfig;
use crate::storage::traits::StorageError;

/// Configuration for the incident store.
///
/// All fields but `targets` have sensible defaults. The crate never reads a
/// config file itself; the host deserialises this from its own.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Target URLs, one per backend (e.g. "mysql://user:pass@db/status", "s3://bucket")
    #[serde(default)]
    pub targets: Vec<String>,

    /// Attempts per backend operation, first try included
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    /// Fixed pause between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Replicate background workers; zero is rejected when a Replicate is built
    #[serde(default = "default_replay_interval_secs")]
    pub replay_interval_secs: u64,
    #[serde(default = "default_clean_interval_secs")]
    pub clean_interval_secs: u64,
}

fn default_retry_attempts() -> usize { 3 }
fn default_retry_delay_ms() -> u64 { 500 }
fn default_replay_interval_secs() -> u64 { 90 }
fn default_clean_interval_secs() -> u64 { 3600 } // 1 hour

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            replay_interval_secs: default_replay_interval_secs(),
            clean_interval_secs: default_clean_interval_secs(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::fixed(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    #[must_use]
    pub fn timings(&self) -> ReplicateTimings {
        ReplicateTimings {
            replay_interval: Duration::from_secs(self.replay_interval_secs),
            clean_interval: Duration::from_secs(self.clean_interval_secs),
        }
    }

    /// Parse every target. Fails on the first one that isn't a URL.
    pub fn parse_targets(&self) -> Result<Vec<Url>, StorageError> {
        self.targets
            .iter()
            .map(|t| {
                Url::parse(t).map_err(|e| StorageError::Config(format!("invalid target '{}': {}", t, e)))
            })
            .collect()
    }
}
