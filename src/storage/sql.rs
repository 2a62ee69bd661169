// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Relational storage backend (SQLite, MySQL/MariaDB, Postgres).
//!
//! Each incident is one row; the full record lives in a JSON `payload`
//! column, with the two fields the store filters on lifted into columns:
//!
//! ```sql
//! CREATE TABLE incidents (
//!   guid VARCHAR(64) PRIMARY KEY,
//!   created_at BIGINT NOT NULL,      -- epoch micros
//!   persistent BIGINT NOT NULL,      -- 0/1
//!   payload LONGTEXT NOT NULL        -- Incident as JSON
//! );
//! CREATE TABLE subscribers (email VARCHAR(255) PRIMARY KEY);
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! - Payload is TEXT rather than a native JSON type; the `Any` driver has no
//!   mapping for MySQL's JSON columns.
//! - MySQL LONGTEXT comes back as bytes, so payloads are read as `String`
//!   first and `Vec<u8>` second.
//! - Postgres wants `$1` placeholders; queries are written with `?` and
//!   rewritten per dialect.

use std::borrow::Cow;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::info;
use url::Url;

use super::select_by_date;
use super::traits::{StorageError, Store, StoreKind};
use crate::incident::{sort_by_created, Incident};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
    Postgres,
}

impl Dialect {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "sqlite" => Some(Self::Sqlite),
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" => Some(Self::Postgres),
            _ => None,
        }
    }

    /// Rewrite `?` placeholders to `$n` for Postgres.
    fn query<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        if *self != Self::Postgres {
            return Cow::Borrowed(sql);
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0;
        for c in sql.chars() {
            if c == '?' {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            } else {
                out.push(c);
            }
        }
        Cow::Owned(out)
    }

    fn schema(&self) -> &'static [&'static str] {
        match self {
            Self::Sqlite => &[
                "CREATE TABLE IF NOT EXISTS incidents (
                    guid TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL,
                    persistent INTEGER NOT NULL DEFAULT 0,
                    payload TEXT NOT NULL
                )",
                "CREATE INDEX IF NOT EXISTS idx_incidents_created_at ON incidents (created_at)",
                "CREATE TABLE IF NOT EXISTS subscribers (email TEXT PRIMARY KEY)",
            ],
            // Index declared inline: MySQL has no CREATE INDEX IF NOT EXISTS
            Self::MySql => &[
                "CREATE TABLE IF NOT EXISTS incidents (
                    guid VARCHAR(64) PRIMARY KEY,
                    created_at BIGINT NOT NULL,
                    persistent BIGINT NOT NULL DEFAULT 0,
                    payload LONGTEXT NOT NULL,
                    INDEX idx_incidents_created_at (created_at)
                )",
                "CREATE TABLE IF NOT EXISTS subscribers (email VARCHAR(255) PRIMARY KEY)",
            ],
            Self::Postgres => &[
                "CREATE TABLE IF NOT EXISTS incidents (
                    guid VARCHAR(64) PRIMARY KEY,
                    created_at BIGINT NOT NULL,
                    persistent BIGINT NOT NULL DEFAULT 0,
                    payload TEXT NOT NULL
                )",
                "CREATE INDEX IF NOT EXISTS idx_incidents_created_at ON incidents (created_at)",
                "CREATE TABLE IF NOT EXISTS subscribers (email VARCHAR(255) PRIMARY KEY)",
            ],
        }
    }

    fn upsert_incident(&self) -> &'static str {
        match self {
            Self::MySql => {
                "INSERT INTO incidents (guid, created_at, persistent, payload) VALUES (?, ?, ?, ?)
                 ON DUPLICATE KEY UPDATE
                    created_at = VALUES(created_at),
                    persistent = VALUES(persistent),
                    payload = VALUES(payload)"
            }
            Self::Sqlite | Self::Postgres => {
                "INSERT INTO incidents (guid, created_at, persistent, payload) VALUES (?, ?, ?, ?)
                 ON CONFLICT (guid) DO UPDATE SET
                    created_at = excluded.created_at,
                    persistent = excluded.persistent,
                    payload = excluded.payload"
            }
        }
    }

    fn insert_subscriber(&self) -> &'static str {
        match self {
            Self::MySql => "INSERT IGNORE INTO subscribers (email) VALUES (?)",
            Self::Sqlite | Self::Postgres => {
                "INSERT INTO subscribers (email) VALUES (?) ON CONFLICT (email) DO NOTHING"
            }
        }
    }
}

/// Turn a target URL into a driver connection string.
///
/// `mariadb://` becomes `mysql://`; SQLite targets get `mode=rwc` so a missing
/// database file is created.
fn connection_string(target: &Url) -> Result<(Dialect, String), StorageError> {
    let dialect = Dialect::from_scheme(target.scheme()).ok_or_else(|| {
        StorageError::Config(format!("unsupported database scheme '{}'", target.scheme()))
    })?;

    let conn = match dialect {
        Dialect::MySql if target.scheme() == "mariadb" => {
            format!("mysql{}", &target.as_str()["mariadb".len()..])
        }
        Dialect::Sqlite if !target.query_pairs().any(|(k, _)| k == "mode") => {
            let mut with_mode = target.clone();
            with_mode.query_pairs_mut().append_pair("mode", "rwc");
            with_mode.to_string()
        }
        _ => target.to_string(),
    };
    Ok((dialect, conn))
}

fn backend_err(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the schema if needed.
    pub async fn new(target: &Url) -> Result<Self, StorageError> {
        install_drivers();

        let (dialect, conn) = connection_string(target)?;

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(&conn)
                .await
                .map_err(backend_err)
        })
        .await?;

        let store = Self { pool, dialect };

        if dialect == Dialect::Sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        info!(dialect = ?dialect, "SQL store ready");
        Ok(store)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Enable WAL mode for SQLite so readers don't block the writer.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        // WAL mode is safe with NORMAL
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for &sql in self.dialect.schema() {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(backend_err)
            })
            .await?;
        }
        Ok(())
    }

    fn decode(row: &AnyRow) -> Result<Incident, StorageError> {
        // String first (SQLite/Postgres TEXT), then bytes (MySQL LONGTEXT)
        let payload: String = row
            .try_get::<String, _>("payload")
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>("payload")
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
            .ok_or_else(|| StorageError::Backend("No payload in row".to_string()))?;

        let mut incident: Incident = serde_json::from_str(&payload)?;
        incident.sort_messages();
        Ok(incident)
    }

    async fn upsert(&self, incident: &Incident) -> Result<(), StorageError> {
        let payload = serde_json::to_string(incident)?;
        sqlx::query(&self.dialect.query(self.dialect.upsert_incident()))
            .bind(incident.guid.clone())
            .bind(incident.created_at.timestamp_micros())
            .bind(i64::from(incident.persistent))
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn create(&self, incident: &Incident) -> Result<Incident, StorageError> {
        self.upsert(incident).await?;
        Ok(incident.clone())
    }

    async fn update(&self, guid: &str, incident: &Incident) -> Result<Incident, StorageError> {
        let mut stored = incident.clone();
        stored.guid = guid.to_string();
        self.upsert(&stored).await?;
        Ok(stored)
    }

    async fn delete(&self, guid: &str) -> Result<(), StorageError> {
        let result = sqlx::query(&self.dialect.query("DELETE FROM incidents WHERE guid = ?"))
            .bind(guid.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(guid.to_string()));
        }
        Ok(())
    }

    async fn read(&self, guid: &str) -> Result<Incident, StorageError> {
        let row = sqlx::query(&self.dialect.query("SELECT payload FROM incidents WHERE guid = ?"))
            .bind(guid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?
            .ok_or_else(|| StorageError::NotFound(guid.to_string()))?;
        Self::decode(&row)
    }

    async fn by_date(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StorageError> {
        // Columns hold micros; the exact bounds are re-applied after decoding.
        let rows = sqlx::query(&self.dialect.query(
            "SELECT payload FROM incidents
             WHERE persistent = 0 AND created_at >= ? AND created_at <= ?
             ORDER BY created_at",
        ))
        .bind(from.timestamp_micros())
        .bind(to.timestamp_micros())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        let incidents = rows.iter().map(Self::decode).collect::<Result<Vec<_>, _>>()?;
        Ok(select_by_date(incidents, from, to))
    }

    async fn subscribe(&self, email: &str) -> Result<(), StorageError> {
        sqlx::query(&self.dialect.query(self.dialect.insert_subscriber()))
            .bind(email.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), StorageError> {
        sqlx::query(&self.dialect.query("DELETE FROM subscribers WHERE email = ?"))
            .bind(email.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn subscribers(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT email FROM subscribers ORDER BY email")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("email")
                    .ok()
                    .or_else(|| {
                        row.try_get::<Vec<u8>, _>("email")
                            .ok()
                            .and_then(|bytes| String::from_utf8(bytes).ok())
                    })
                    .ok_or_else(|| StorageError::Backend("Unreadable subscriber email".to_string()))
            })
            .collect()
    }

    async fn persistents(&self) -> Result<Vec<Incident>, StorageError> {
        let rows = sqlx::query("SELECT payload FROM incidents WHERE persistent = 1 ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        let mut incidents = rows.iter().map(Self::decode).collect::<Result<Vec<_>, _>>()?;
        sort_by_created(&mut incidents);
        Ok(incidents)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

/// Kind for `sqlite://`, `mysql://`, `mariadb://` and `postgres://` targets.
pub struct SqlKind;

#[async_trait]
impl StoreKind for SqlKind {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn detect(&self, target: &Url) -> bool {
        Dialect::from_scheme(target.scheme()).is_some()
    }

    async fn open(&self, target: &Url) -> Result<Arc<dyn Store>, StorageError> {
        Ok(Arc::new(SqlStore::new(target).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{ComponentState, IncidentState};
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn incident() -> Incident {
        Incident::new(IncidentState::Unresolved, ComponentState::MajorOutage)
    }

    async fn sqlite_store() -> (TempDir, SqlStore) {
        let dir = TempDir::new().unwrap();
        let target = Url::parse(&format!("sqlite://{}", dir.path().join("status.db").display())).unwrap();
        let store = SqlStore::new(&target).await.unwrap();
        (dir, store)
    }

    #[test]
    fn test_postgres_placeholders() {
        let q = Dialect::Postgres.query("SELECT a FROM t WHERE x = ? AND y <= ?");
        assert_eq!(q, "SELECT a FROM t WHERE x = $1 AND y <= $2");
        let q = Dialect::MySql.query("SELECT a FROM t WHERE x = ?");
        assert_eq!(q, "SELECT a FROM t WHERE x = ?");
    }

    #[test]
    fn test_connection_string_rewrites() {
        let (dialect, conn) = connection_string(&Url::parse("mariadb://u:p@db:3306/status").unwrap()).unwrap();
        assert_eq!(dialect, Dialect::MySql);
        assert_eq!(conn, "mysql://u:p@db:3306/status");

        let (dialect, conn) = connection_string(&Url::parse("sqlite:///var/lib/status.db").unwrap()).unwrap();
        assert_eq!(dialect, Dialect::Sqlite);
        assert_eq!(conn, "sqlite:///var/lib/status.db?mode=rwc");

        let (_, conn) = connection_string(&Url::parse("sqlite:///x.db?mode=ro").unwrap()).unwrap();
        assert_eq!(conn, "sqlite:///x.db?mode=ro");

        let (dialect, _) = connection_string(&Url::parse("postgres://u@pg/status").unwrap()).unwrap();
        assert_eq!(dialect, Dialect::Postgres);

        assert!(matches!(
            connection_string(&Url::parse("redis://localhost").unwrap()),
            Err(StorageError::Config(_))
        ));
    }

    #[test]
    fn test_kind_detects_database_schemes() {
        let kind = SqlKind;
        for target in ["sqlite:///a.db", "mysql://h/db", "mariadb://h/db", "postgres://h/db"] {
            assert!(kind.detect(&Url::parse(target).unwrap()), "{}", target);
        }
        assert!(!kind.detect(&Url::parse("s3://h/bucket").unwrap()));
    }

    #[tokio::test]
    async fn test_sqlite_create_read_update_delete() {
        let (_dir, store) = sqlite_store().await;
        let incident = incident();

        store.create(&incident).await.unwrap();
        assert_eq!(store.read(&incident.guid).await.unwrap(), incident);

        // Replaying a create is harmless
        store.create(&incident).await.unwrap();

        let mut changed = incident.clone();
        changed.state = IncidentState::Resolved;
        store.update(&incident.guid, &changed).await.unwrap();
        assert_eq!(store.read(&incident.guid).await.unwrap().state, IncidentState::Resolved);

        store.delete(&incident.guid).await.unwrap();
        assert!(matches!(store.read(&incident.guid).await, Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete(&incident.guid).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sqlite_by_date_and_persistents() {
        let (_dir, store) = sqlite_store().await;
        let mut old = incident();
        old.created_at = Utc::now() - ChronoDuration::days(40);
        let recent = incident();
        let mut pinned = incident();
        pinned.persistent = true;
        for i in [&old, &recent, &pinned] {
            store.create(i).await.unwrap();
        }

        let got = store.by_date(recent.created_at, recent.created_at).await.unwrap();
        assert_eq!(got.len(), 1, "range bounds are inclusive");
        assert_eq!(got[0].guid, recent.guid);

        let all = store
            .by_date(Utc::now() - ChronoDuration::days(60), Utc::now())
            .await
            .unwrap();
        assert_eq!(all.iter().map(|i| &i.guid).collect::<Vec<_>>(), vec![&old.guid, &recent.guid]);

        let persistents = store.persistents().await.unwrap();
        assert_eq!(persistents.len(), 1);
        assert_eq!(persistents[0].guid, pinned.guid);
    }

    #[tokio::test]
    async fn test_sqlite_subscribers() {
        let (_dir, store) = sqlite_store().await;
        store.subscribe("b@example.com").await.unwrap();
        store.subscribe("a@example.com").await.unwrap();
        store.subscribe("a@example.com").await.unwrap();

        assert_eq!(store.subscribers().await.unwrap(), vec!["a@example.com", "b@example.com"]);

        store.unsubscribe("a@example.com").await.unwrap();
        store.unsubscribe("missing@example.com").await.unwrap();
        assert_eq!(store.subscribers().await.unwrap(), vec!["b@example.com"]);
    }

    #[tokio::test]
    async fn test_sqlite_ping_and_reopen() {
        let dir = TempDir::new().unwrap();
        let target = Url::parse(&format!("sqlite://{}", dir.path().join("reopen.db").display())).unwrap();
        let incident = incident();

        {
            let store = SqlStore::new(&target).await.unwrap();
            store.ping().await.unwrap();
            store.create(&incident).await.unwrap();
        }

        let store = SqlStore::new(&target).await.unwrap();
        assert_eq!(store.read(&incident.guid).await.unwrap().guid, incident.guid);
    }
}
