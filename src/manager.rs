//! Connection lifecycle, pool stats, registry bootstrap, and the only place
//! that inspects driver error messages.

use crate::config::{DatabaseConfig, DatabaseType};
use crate::error::{Error, ErrorKind, Result};
use crate::schema::{builtin_schemas, is_valid_identifier, EntitySchema};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Registry tables backing the dynamic engine. `entity_schemas` is itself a
/// core-shaped row; the version and dependency tables use rowid keys.
const REGISTRY_DDL: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS entity_schemas (
        id TEXT PRIMARY KEY,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        deleted_at TIMESTAMP,
        name TEXT UNIQUE NOT NULL,
        description TEXT,
        fields TEXT NOT NULL,
        indexes TEXT NOT NULL,
        annotations TEXT
    )",
    "CREATE TABLE IF NOT EXISTS schema_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        schema_name TEXT NOT NULL,
        version INTEGER NOT NULL,
        changes TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_schema_versions_schema_name
        ON schema_versions (schema_name)",
    "CREATE TABLE IF NOT EXISTS schema_dependencies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_schema TEXT NOT NULL,
        child_schema TEXT NOT NULL,
        dependency_type TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
];

/// Pool snapshot. `healthy` reflects a ping at collection time.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PoolStats {
    pub max_open: u32,
    pub open: u32,
    pub in_use: u32,
    pub idle: u32,
    pub healthy: bool,
}

/// Owns the connection pool for one DSN.
pub struct Manager {
    pool: SqlitePool,
    dsn: String,
    max_conns: u32,
}

impl Manager {
    /// Open a pool for the configured database. Only sqlite is wired
    /// end-to-end; other engines are declared in config for adapters that
    /// bring their own manager.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        match config.db_type {
            DatabaseType::Sqlite => {}
            other => {
                return Err(ErrorKind::NotImplemented
                    .with_reason(format!("database type {other:?} is not supported")));
            }
        }

        let dsn = config.dsn();
        // Every :memory: connection is a distinct database, so the pool must
        // not grow past one connection there.
        let in_memory = dsn.contains(":memory:");
        let max_conns = if in_memory { 1 } else { config.max_conns.max(1) };

        let mut options = SqliteConnectOptions::from_str(&format!("sqlite:{dsn}"))
            .map_err(|err| ErrorKind::DatabaseConnection.with_reason(err.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_conns)
            .connect_with(options)
            .await
            .map_err(|err| ErrorKind::DatabaseConnection.with_reason(err.to_string()))?;

        Ok(Manager {
            pool,
            dsn,
            max_conns,
        })
    }

    /// Ensure the registry tables and the built-in schemas exist. Safe to run
    /// repeatedly; a second call leaves state unchanged.
    pub async fn initialize(&self) -> Result<()> {
        for ddl in REGISTRY_DDL {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|err| classify("initialize registry", err))?;
        }
        for schema in builtin_schemas() {
            if !self.schema_registered(&schema.name).await? {
                self.create_schema_table(&schema).await?;
            }
        }
        Ok(())
    }

    /// Whether the registry has a live row for `name`.
    pub async fn schema_registered(&self, name: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM entity_schemas WHERE name = ? AND deleted_at IS NULL",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| classify("check schema registration", err))?;
        Ok(row.is_some())
    }

    /// Create the physical table, its indexes, and the registry row in one
    /// transaction, so the catalog and the database never diverge.
    pub async fn create_schema_table(&self, schema: &EntitySchema) -> Result<()> {
        if !is_valid_identifier(&schema.name) {
            return Err(
                ErrorKind::InvalidInput.with_reason(format!("invalid table name: {}", schema.name))
            );
        }
        for index in &schema.indexes {
            if !is_valid_identifier(&index.name)
                || index.columns.iter().any(|c| !is_valid_identifier(c))
            {
                return Err(ErrorKind::InvalidInput
                    .with_reason(format!("invalid index definition: {}", index.name)));
            }
        }

        let table_sql = schema.render_create_table()?;
        let fields = serde_json::to_string(&schema.fields)
            .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))?;
        let indexes = serde_json::to_string(&schema.indexes)
            .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))?;
        let annotations = serde_json::to_string(&schema.annotations)
            .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))?;
        let now = crate::schema::value::now_timestamp();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| ErrorKind::TransactionFailed.with_reason(err.to_string()))?;

        tracing::debug!(sql = %table_sql, "create table");
        sqlx::query(&table_sql)
            .execute(&mut *tx)
            .await
            .map_err(|err| classify("create table", err))?;

        for index in &schema.indexes {
            let index_sql = index.render_create(&schema.name);
            tracing::debug!(sql = %index_sql, "create index");
            sqlx::query(&index_sql)
                .execute(&mut *tx)
                .await
                .map_err(|err| classify("create index", err))?;
        }

        sqlx::query(
            "INSERT INTO entity_schemas
                (id, name, description, fields, indexes, annotations, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&schema.name)
        .bind(&schema.description)
        .bind(&fields)
        .bind(&indexes)
        .bind(&annotations)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|err| classify("store schema definition", err))?;

        tx.commit()
            .await
            .map_err(|err| ErrorKind::TransactionFailed.with_reason(err.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn stats(&self) -> PoolStats {
        let open = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let healthy = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();
        PoolStats {
            max_open: self.max_conns,
            open,
            in_use: open.saturating_sub(idle),
            idle,
            healthy,
        }
    }
}

/// Map a driver error to the taxonomy. Driver-message matching lives here so
/// stores dispatch on kinds, never on engine-specific text.
pub(crate) fn classify(op: &str, err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
            ErrorKind::AlreadyExists.with_reason(db.message().to_string())
        }
        sqlx::Error::RowNotFound => ErrorKind::NotFound.with_reason(op.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            ErrorKind::DatabaseConnection.with_reason(format!("{op}: {err}"))
        }
        _ => ErrorKind::StorageOperation.with_reason(format!("{op}: {err}")),
    }
}
