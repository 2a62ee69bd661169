// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Incident Store
//!
//! Storage layer for a status page: incidents, their messages and metadata,
//! and the list of notification subscribers, kept on one or more backends.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Replicate (2+ targets)                     │
//! │  • Writes fan out to every backend, in registration order  │
//! │  • Success = at least one backend accepted the write       │
//! │  • Failed writes queued per backend, replayed every 90s    │
//! │  • Reads answered by the first backend that can            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Retry (per backend)                     │
//! │  • 3 attempts, 500ms apart                                 │
//! │  • NotFound and invalid input are returned immediately     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Backends                            │
//! │  • SQL: SQLite / MySQL / MariaDB / Postgres (sqlx)          │
//! │  • S3-compatible object storage                            │
//! │  • Local directory of JSON files                           │
//! │  • In-memory (development and tests)                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use incident_store::{open_from_config, Incident, IncidentState, ComponentState, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = StoreConfig {
//!         targets: vec![
//!             "mysql://status:secret@db/status".into(),
//!             "s3://AKIA...:secret@status-backup.s3.amazonaws.com/incidents/".into(),
//!         ],
//!         ..Default::default()
//!     };
//!
//!     let store = open_from_config(&config).await.expect("Failed to open store");
//!
//!     let incident = Incident::new(IncidentState::Unresolved, ComponentState::PartialOutage);
//!     store.create(&incident).await.expect("Failed to create");
//!
//!     let current = store.read(&incident.guid).await.unwrap();
//!     println!("{} is {}", current.guid, current.state.as_str());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: the [`Store`] contract and the backends
//! - [`resilience`]: retry decorator
//! - [`coordinator`]: the [`Replicate`] coordinator
//! - [`factory`]: target URLs → store
//! - [`incident`]: the data model

pub mod config;
pub mod incident;
pub mod storage;
pub mod resilience;
pub mod coordinator;
pub mod factory;
pub mod metrics;

pub use config::StoreConfig;
pub use incident::{Component, ComponentState, Incident, IncidentState, Message, Metadata};
pub use storage::traits::{StorageError, Store, StoreKind};
pub use storage::{local::LocalStore, memory::InMemoryStore, s3::S3Store, sql::SqlStore};
pub use resilience::retry::{Retry, RetryConfig, RetryKind};
pub use coordinator::{ReplayAction, Replicate, ReplicateBuilder, ReplicateTimings};
pub use factory::{default_kinds, open_from_config, Factory};
pub use metrics::LatencyTimer;
