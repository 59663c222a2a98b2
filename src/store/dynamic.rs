//! The dynamic store: runtime table lifecycle, schema-validated CRUD, version
//! tracking, and the batch-copy column drop for engines without native
//! `DROP COLUMN`.

use crate::error::{Error, ErrorKind, Result};
use crate::manager::{classify, Manager};
use crate::schema::value::{coerce_value, now_timestamp, validate_value};
use crate::schema::{is_valid_identifier, EntitySchema, FieldDef, FieldType, TableOptions};
use crate::sql::{QueryParams, SqliteBindValue};
use crate::store::cache::{CacheStats, TtlCache, DEFAULT_PURGE_INTERVAL, DEFAULT_TTL};
use crate::store::Row;
use serde::Serialize;
use serde_json::{Number, Value};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row as SqlxRow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One row of `schema_versions`, newest-first in listings.
#[derive(Clone, Debug, Serialize)]
pub struct SchemaVersion {
    pub id: i64,
    pub schema_name: String,
    pub version: i64,
    pub changes: String,
    pub created_at: String,
}

/// A directed, labelled edge between two schemas.
#[derive(Clone, Debug, Serialize)]
pub struct SchemaDependency {
    pub id: i64,
    pub parent_schema: String,
    pub child_schema: String,
    pub dependency_type: String,
    pub created_at: String,
}

/// Requested change per column entry in [`DynamicStore::alter_table`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeAction {
    /// Key is `"<column> <type>"`.
    Add,
    /// Key is the column name; executed via the batch-copy rewrite.
    Drop,
    /// Unsupported without native column alteration.
    Modify,
}

pub struct DynamicStore {
    manager: Arc<Manager>,
    version_cache: TtlCache<Vec<SchemaVersion>>,
}

impl DynamicStore {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self::with_version_cache(manager, DEFAULT_TTL, DEFAULT_PURGE_INTERVAL)
    }

    /// Construct with explicit version-cache timing (tests shorten the TTL).
    pub fn with_version_cache(manager: Arc<Manager>, ttl: Duration, purge_interval: Duration) -> Self {
        DynamicStore {
            manager,
            version_cache: TtlCache::new(ttl, purge_interval),
        }
    }

    fn pool(&self) -> &SqlitePool {
        self.manager.pool()
    }

    // ---- table lifecycle -------------------------------------------------

    /// Create the physical table (core columns plus the requested fields),
    /// its indexes, and the registry row atomically.
    pub async fn create_table(&self, name: &str, options: TableOptions) -> Result<()> {
        if !is_valid_identifier(name) {
            return Err(ErrorKind::InvalidInput.with_reason(format!("invalid table name: {name}")));
        }
        if self.manager.schema_registered(name).await? {
            return Err(ErrorKind::AlreadyExists.with_reason(format!("table {name} already exists")));
        }
        let schema = EntitySchema {
            name: name.to_string(),
            description: options.description,
            fields: options.fields,
            indexes: options.indexes,
            annotations: options.annotations,
        };
        self.manager.create_schema_table(&schema).await
    }

    /// Drop the physical table and its registry row in one transaction.
    pub async fn drop_table(&self, name: &str) -> Result<()> {
        if !is_valid_identifier(name) {
            return Err(ErrorKind::InvalidInput.with_reason(format!("invalid table name: {name}")));
        }
        if !self.manager.schema_registered(name).await? {
            return Err(ErrorKind::NotFound.with_reason(format!("table {name} does not exist")));
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|err| ErrorKind::TransactionFailed.with_reason(err.to_string()))?;
        let drop_sql = format!("DROP TABLE IF EXISTS {name}");
        tracing::debug!(sql = %drop_sql, "drop table");
        sqlx::query(&drop_sql)
            .execute(&mut *tx)
            .await
            .map_err(|err| classify("drop table", err))?;
        sqlx::query("DELETE FROM entity_schemas WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|err| classify("remove schema definition", err))?;
        tx.commit()
            .await
            .map_err(|err| ErrorKind::TransactionFailed.with_reason(err.to_string()))?;
        Ok(())
    }

    /// Apply column changes. `batch_size` only affects `Drop` entries, which
    /// run the copy rewrite in batches of that many rows.
    pub async fn alter_table(
        &self,
        table: &str,
        changes: &HashMap<String, ChangeAction>,
        batch_size: i64,
    ) -> Result<()> {
        if !is_valid_identifier(table) {
            return Err(ErrorKind::InvalidInput.with_reason(format!("invalid table name: {table}")));
        }
        for (column, action) in changes {
            match action {
                ChangeAction::Add => {
                    let parts: Vec<&str> = column.split_whitespace().collect();
                    let [name, sql_type] = parts.as_slice() else {
                        return Err(ErrorKind::InvalidInput
                            .with_reason(format!("invalid column definition for ADD: {column}")));
                    };
                    self.add_column(table, name, sql_type).await?;
                }
                ChangeAction::Drop => {
                    self.drop_column(table, column, batch_size).await?;
                }
                ChangeAction::Modify => {
                    return Err(ErrorKind::NotImplemented.with_reason(format!(
                        "SQLite does not support MODIFY COLUMN for {column}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// `ALTER TABLE ... ADD COLUMN`, folding the new column into the
    /// registry's field list when the table is catalogued.
    pub async fn add_column(&self, table: &str, column: &str, sql_type: &str) -> Result<()> {
        if !is_valid_identifier(table) || !is_valid_identifier(column) || !is_valid_identifier(sql_type)
        {
            return Err(ErrorKind::InvalidInput
                .with_reason(format!("invalid column definition: {column} {sql_type}")));
        }
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type}");
        tracing::debug!(sql = %sql, "add column");
        sqlx::query(&sql)
            .execute(self.pool())
            .await
            .map_err(|err| classify("add column", err))?;

        match self.get_schema(table).await {
            Ok(mut schema) => {
                if schema.field(column).is_none() {
                    schema
                        .fields
                        .push(FieldDef::new(column, FieldType::from_sql(sql_type)));
                    self.update_registry(&schema).await?;
                }
                Ok(())
            }
            Err(err) if err.kind == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drop a column by rewriting the table, since the engine has no native
    /// `DROP COLUMN`:
    ///
    /// 1. introspect and verify the column exists,
    /// 2. create `<table>_temp` holding only the retained columns,
    /// 3. copy rows in `LIMIT ?/OFFSET ?` batches until a batch affects zero
    ///    rows,
    /// 4. drop the source and rename the temp table into place.
    ///
    /// A copy failure aborts before step 4 and leaves the source intact; the
    /// partial temp table is removed so a retry starts clean. DDL here runs
    /// outside a transaction (the engine forbids DDL mid-transaction).
    pub async fn drop_column(&self, table: &str, column: &str, batch_size: i64) -> Result<()> {
        if !is_valid_identifier(table) || !is_valid_identifier(column) {
            return Err(ErrorKind::InvalidInput
                .with_reason(format!("invalid identifier: {table}/{column}")));
        }
        if batch_size <= 0 {
            return Err(ErrorKind::InvalidInput.with_reason("batch size must be positive"));
        }

        let columns = self.pragma_columns(table).await?;
        if !columns.iter().any(|(name, _)| name == column) {
            return Err(ErrorKind::NotFound
                .with_reason(format!("column {column} does not exist in table {table}")));
        }
        let retained: Vec<&(String, String)> =
            columns.iter().filter(|(name, _)| name != column).collect();

        let temp = format!("{table}_temp");
        // A leftover temp table from an aborted earlier run would fail the
        // CREATE below; clear it so retries succeed.
        sqlx::query(&format!("DROP TABLE IF EXISTS {temp}"))
            .execute(self.pool())
            .await
            .map_err(|err| classify("clear temp table", err))?;

        let column_defs: Vec<String> = retained
            .iter()
            .map(|(name, ty)| {
                if ty.is_empty() {
                    name.clone()
                } else {
                    format!("{name} {ty}")
                }
            })
            .collect();
        let create_sql = format!("CREATE TABLE {temp} ({})", column_defs.join(", "));
        tracing::debug!(sql = %create_sql, "create temp table");
        sqlx::query(&create_sql)
            .execute(self.pool())
            .await
            .map_err(|err| classify("create temp table", err))?;

        let names: Vec<&str> = retained.iter().map(|(name, _)| name.as_str()).collect();
        let names = names.join(", ");
        let copy_sql =
            format!("INSERT INTO {temp} ({names}) SELECT {names} FROM {table} LIMIT ? OFFSET ?");
        let mut offset: i64 = 0;
        loop {
            let copied = sqlx::query(&copy_sql)
                .bind(batch_size)
                .bind(offset)
                .execute(self.pool())
                .await;
            match copied {
                Ok(done) if done.rows_affected() == 0 => break,
                Ok(_) => offset += batch_size,
                Err(err) => {
                    let _ = sqlx::query(&format!("DROP TABLE IF EXISTS {temp}"))
                        .execute(self.pool())
                        .await;
                    return Err(ErrorKind::StorageOperation
                        .with_reason(format!("batch copy failed at offset {offset}: {err}")));
                }
            }
        }

        sqlx::query(&format!("DROP TABLE {table}"))
            .execute(self.pool())
            .await
            .map_err(|err| classify("drop original table", err))?;
        sqlx::query(&format!("ALTER TABLE {temp} RENAME TO {table}"))
            .execute(self.pool())
            .await
            .map_err(|err| classify("rename temp table", err))?;

        // DROP TABLE discarded the indexes; recreate survivors and keep the
        // registry row in step with the physical shape.
        match self.get_schema(table).await {
            Ok(mut schema) => {
                schema.fields.retain(|f| f.name != column);
                schema
                    .indexes
                    .retain(|i| !i.columns.iter().any(|c| c == column));
                for index in &schema.indexes {
                    sqlx::query(&index.render_create(table))
                        .execute(self.pool())
                        .await
                        .map_err(|err| classify("recreate index", err))?;
                }
                self.update_registry(&schema).await
            }
            Err(err) if err.kind == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    // ---- CRUD ------------------------------------------------------------

    /// Insert one row, auto-filling `id` (UUID v4), `created_at`, and
    /// `updated_at` when absent. Returns the row id.
    pub async fn insert(&self, table: &str, mut row: Row) -> Result<String> {
        let schema = self.get_schema(table).await?;

        let id = match row.get("id") {
            Some(value) => value
                .as_str()
                .ok_or_else(|| ErrorKind::InvalidInput.with_reason("id must be a string"))?
                .to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                row.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };
        let now = now_timestamp();
        row.entry("created_at".to_string())
            .or_insert_with(|| Value::String(now.clone()));
        row.entry("updated_at".to_string())
            .or_insert_with(|| Value::String(now));

        for field in &schema.fields {
            match row.get(&field.name) {
                None if field.required => {
                    return Err(ErrorKind::InvalidInput
                        .with_reason(format!("field '{}' is required", field.name)));
                }
                Some(value) if !value.is_null() => {
                    validate_value(value, field.field_type)
                        .map_err(|err| field_error(&field.name, err))?;
                }
                _ => {}
            }
        }

        let mut columns: Vec<&str> = vec!["id", "created_at", "updated_at"];
        for field in &schema.fields {
            if row.contains_key(&field.name) {
                columns.push(field.name.as_str());
            }
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );
        tracing::debug!(sql = %sql, "insert");
        let mut query = sqlx::query(&sql);
        for name in &columns {
            query = match row.get(*name) {
                Some(value) => query.bind(SqliteBindValue::from_json(value)),
                None => query.bind(SqliteBindValue::Null),
            };
        }
        query
            .execute(self.pool())
            .await
            .map_err(|err| classify("insert", err))?;
        Ok(id)
    }

    /// Point read by id; soft-deleted rows are invisible.
    pub async fn get(&self, table: &str, id: &str) -> Result<Row> {
        let schema = self.get_schema(table).await?;
        let sql = format!("SELECT * FROM {table} WHERE id = ? AND deleted_at IS NULL");
        tracing::debug!(sql = %sql, id = %id, "get");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|err| classify("get", err))?;
        let Some(row) = row else {
            return Err(ErrorKind::NotFound.with_reason(format!("{table}/{id}")));
        };
        let mut map = row_to_map(&row);
        coerce_row(&mut map, &schema)?;
        Ok(map)
    }

    /// Patch columns by id. `updated_at` always advances; unknown keys are
    /// ignored; zero rows affected surfaces as `NotFound`.
    pub async fn update(&self, table: &str, id: &str, patch: Row) -> Result<()> {
        let schema = self.get_schema(table).await?;

        let mut sets = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        for field in &schema.fields {
            if let Some(value) = patch.get(&field.name) {
                let converted = if value.is_null() {
                    Value::Null
                } else {
                    coerce_value(value.clone(), field.field_type)
                        .map_err(|err| field_error(&field.name, err))?
                };
                sets.push(format!("{} = ?", field.name));
                binds.push(converted);
            }
        }
        sets.push("updated_at = ?".to_string());
        binds.push(Value::String(now_timestamp()));

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? AND deleted_at IS NULL",
            table,
            sets.join(", ")
        );
        tracing::debug!(sql = %sql, id = %id, "update");
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(SqliteBindValue::from_json(value));
        }
        let result = query
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|err| classify("update", err))?;
        if result.rows_affected() == 0 {
            return Err(ErrorKind::NotFound.with_reason(format!("{table}/{id}")));
        }
        Ok(())
    }

    /// Soft delete: stamps `deleted_at`, leaving the physical row in place.
    pub async fn delete(&self, table: &str, id: &str) -> Result<()> {
        if !is_valid_identifier(table) {
            return Err(ErrorKind::InvalidInput.with_reason(format!("invalid table name: {table}")));
        }
        let sql = format!(
            "UPDATE {table} SET deleted_at = CURRENT_TIMESTAMP WHERE id = ? AND deleted_at IS NULL"
        );
        tracing::debug!(sql = %sql, id = %id, "soft delete");
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|err| classify("delete", err))?;
        if result.rows_affected() == 0 {
            return Err(ErrorKind::NotFound.with_reason(format!("{table}/{id}")));
        }
        Ok(())
    }

    /// Alive rows matching one `column = ?` clause per filter entry.
    pub async fn select(&self, table: &str, filter: &Row) -> Result<Vec<Row>> {
        let schema = self.get_schema(table).await?;

        let mut keys: Vec<&String> = filter.keys().collect();
        keys.sort();
        let mut clauses = vec!["deleted_at IS NULL".to_string()];
        for key in &keys {
            if !is_valid_identifier(key) {
                return Err(
                    ErrorKind::InvalidInput.with_reason(format!("invalid column name: {key}"))
                );
            }
            clauses.push(format!("{key} = ?"));
        }
        let sql = format!("SELECT * FROM {} WHERE {}", table, clauses.join(" AND "));
        tracing::debug!(sql = %sql, "select");
        let mut query = sqlx::query(&sql);
        for key in &keys {
            query = query.bind(SqliteBindValue::from_json(&filter[key.as_str()]));
        }
        let rows = query
            .fetch_all(self.pool())
            .await
            .map_err(|err| classify("select", err))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut map = row_to_map(row);
            coerce_row(&mut map, &schema)?;
            results.push(map);
        }
        Ok(results)
    }

    /// Count of alive rows matching the equality filter.
    pub async fn count(&self, table: &str, filter: &Row) -> Result<i64> {
        if !is_valid_identifier(table) {
            return Err(ErrorKind::InvalidInput.with_reason(format!("invalid table name: {table}")));
        }
        let mut keys: Vec<&String> = filter.keys().collect();
        keys.sort();
        let mut clauses = vec!["deleted_at IS NULL".to_string()];
        for key in &keys {
            if !is_valid_identifier(key) {
                return Err(
                    ErrorKind::InvalidInput.with_reason(format!("invalid column name: {key}"))
                );
            }
            clauses.push(format!("{key} = ?"));
        }
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            table,
            clauses.join(" AND ")
        );
        let mut query = sqlx::query_as::<_, (i64,)>(&sql);
        for key in &keys {
            query = query.bind(SqliteBindValue::from_json(&filter[key.as_str()]));
        }
        let (count,) = query
            .fetch_one(self.pool())
            .await
            .map_err(|err| classify("count", err))?;
        Ok(count)
    }

    /// Execute a built query against the table. Predicates are the caller's;
    /// no aliveness filter is injected here.
    pub async fn query(&self, table: &str, params: &QueryParams) -> Result<Vec<Row>> {
        let schema = self.get_schema(table).await?;
        let built = params.build(table)?;
        tracing::debug!(sql = %built.sql, args = ?built.args, "query");
        let mut query = sqlx::query(&built.sql);
        for arg in &built.args {
            query = query.bind(SqliteBindValue::from_json(arg));
        }
        let rows = query
            .fetch_all(self.pool())
            .await
            .map_err(|err| classify("query", err))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut map = row_to_map(row);
            coerce_row(&mut map, &schema)?;
            results.push(map);
        }
        Ok(results)
    }

    // ---- registry --------------------------------------------------------

    /// Load the schema record for a table from the registry.
    pub async fn get_schema(&self, table: &str) -> Result<EntitySchema> {
        if !is_valid_identifier(table) {
            return Err(ErrorKind::InvalidInput.with_reason(format!("invalid table name: {table}")));
        }
        let row: Option<(String, Option<String>, String, String, Option<String>)> =
            sqlx::query_as(
                "SELECT name, description, fields, indexes, annotations
                 FROM entity_schemas WHERE name = ? AND deleted_at IS NULL",
            )
            .bind(table)
            .fetch_optional(self.pool())
            .await
            .map_err(|err| classify("get schema", err))?;
        let Some((name, description, fields, indexes, annotations)) = row else {
            return Err(ErrorKind::NotFound.with_reason(format!("table {table} not found")));
        };

        Ok(EntitySchema {
            name,
            description: description.unwrap_or_default(),
            fields: serde_json::from_str(&fields)
                .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))?,
            indexes: serde_json::from_str(&indexes)
                .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))?,
            annotations: match annotations {
                Some(text) if !text.is_empty() => serde_json::from_str(&text)
                    .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))?,
                _ => HashMap::new(),
            },
        })
    }

    async fn update_registry(&self, schema: &EntitySchema) -> Result<()> {
        let fields = serde_json::to_string(&schema.fields)
            .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))?;
        let indexes = serde_json::to_string(&schema.indexes)
            .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))?;
        sqlx::query(
            "UPDATE entity_schemas SET fields = ?, indexes = ?, updated_at = ?
             WHERE name = ? AND deleted_at IS NULL",
        )
        .bind(&fields)
        .bind(&indexes)
        .bind(now_timestamp())
        .bind(&schema.name)
        .execute(self.pool())
        .await
        .map_err(|err| classify("update schema definition", err))?;
        Ok(())
    }

    // ---- versions and dependencies ---------------------------------------

    /// Record a schema change with `version = max(version) + 1` for the
    /// schema, computed inside the INSERT. Concurrent trackers can collide on
    /// the same version; the losing caller retries.
    pub async fn track_version(&self, schema_name: &str, changes: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO schema_versions (schema_name, version, changes, created_at)
             VALUES (?, (SELECT COALESCE(MAX(version), 0) + 1
                         FROM schema_versions WHERE schema_name = ?),
                     ?, CURRENT_TIMESTAMP)",
        )
        .bind(schema_name)
        .bind(schema_name)
        .bind(changes)
        .execute(self.pool())
        .await
        .map_err(|err| classify("track version", err))?;
        Ok(())
    }

    /// Version history newest-first, memoized per schema name. Within the TTL
    /// a repeat read is served from memory; writes do not invalidate.
    pub async fn list_versions(&self, schema_name: &str) -> Result<Vec<SchemaVersion>> {
        if let Some(versions) = self.version_cache.get(schema_name) {
            return Ok(versions);
        }
        let rows: Vec<(i64, String, i64, Option<String>, String)> = sqlx::query_as(
            "SELECT id, schema_name, version, changes, created_at
             FROM schema_versions WHERE schema_name = ? ORDER BY version DESC",
        )
        .bind(schema_name)
        .fetch_all(self.pool())
        .await
        .map_err(|err| classify("list versions", err))?;

        let versions: Vec<SchemaVersion> = rows
            .into_iter()
            .map(|(id, schema_name, version, changes, created_at)| SchemaVersion {
                id,
                schema_name,
                version,
                changes: changes.unwrap_or_default(),
                created_at,
            })
            .collect();
        self.version_cache.insert(schema_name, versions.clone());
        Ok(versions)
    }

    /// Version-cache counters; a miss is one database read.
    pub fn version_cache_stats(&self) -> CacheStats {
        self.version_cache.stats()
    }

    pub async fn add_dependency(&self, parent: &str, child: &str, dependency_type: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO schema_dependencies (parent_schema, child_schema, dependency_type, created_at)
             VALUES (?, ?, ?, CURRENT_TIMESTAMP)",
        )
        .bind(parent)
        .bind(child)
        .bind(dependency_type)
        .execute(self.pool())
        .await
        .map_err(|err| classify("add dependency", err))?;
        Ok(())
    }

    /// Edges where the schema is either endpoint.
    pub async fn list_dependencies(&self, schema_name: &str) -> Result<Vec<SchemaDependency>> {
        let rows: Vec<(i64, String, String, String, String)> = sqlx::query_as(
            "SELECT id, parent_schema, child_schema, dependency_type, created_at
             FROM schema_dependencies WHERE parent_schema = ? OR child_schema = ?",
        )
        .bind(schema_name)
        .bind(schema_name)
        .fetch_all(self.pool())
        .await
        .map_err(|err| classify("list dependencies", err))?;
        Ok(rows
            .into_iter()
            .map(
                |(id, parent_schema, child_schema, dependency_type, created_at)| SchemaDependency {
                    id,
                    parent_schema,
                    child_schema,
                    dependency_type,
                    created_at,
                },
            )
            .collect())
    }

    // ---- introspection ---------------------------------------------------

    /// Whether a physical table exists, registry-managed or not.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name)
                .fetch_optional(self.pool())
                .await
                .map_err(|err| classify("table exists", err))?;
        Ok(row.is_some())
    }

    /// Physical columns as `"<name> <type>"` strings, in table order.
    pub async fn table_schema(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .pragma_columns(name)
            .await?
            .into_iter()
            .map(|(column, ty)| {
                if ty.is_empty() {
                    column
                } else {
                    format!("{column} {ty}")
                }
            })
            .collect())
    }

    async fn pragma_columns(&self, table: &str) -> Result<Vec<(String, String)>> {
        if !is_valid_identifier(table) {
            return Err(ErrorKind::InvalidInput.with_reason(format!("invalid table name: {table}")));
        }
        let sql = format!("PRAGMA table_info({table})");
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|err| classify("table info", err))?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row
                .try_get("name")
                .map_err(|err| classify("table info", err))?;
            let ty: String = row
                .try_get("type")
                .map_err(|err| classify("table info", err))?;
            columns.push((name, ty));
        }
        Ok(columns)
    }
}

fn field_error(field: &str, err: Error) -> Error {
    let detail = err.reason.unwrap_or_else(|| err.kind.to_string());
    err.kind.with_reason(format!("field '{field}': {detail}"))
}

fn row_to_map(row: &SqliteRow) -> Row {
    let mut map = Row::new();
    for column in row.columns() {
        map.insert(column.name().to_string(), cell_to_value(row, column.name()));
    }
    map
}

/// Scan a cell into a JSON value by storage class. Byte slices are coerced to
/// strings; schema-level coercion later restores the declared types.
fn cell_to_value(row: &SqliteRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(f)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(num) = Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(bytes)) = row.try_get::<Option<Vec<u8>>, _>(name) {
        return Value::String(String::from_utf8_lossy(&bytes).into_owned());
    }
    Value::Null
}

fn coerce_row(row: &mut Row, schema: &EntitySchema) -> Result<()> {
    for field in &schema.fields {
        let Some(value) = row.get(&field.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let coerced = coerce_value(value.clone(), field.field_type)
            .map_err(|err| ErrorKind::StorageOperation.with_reason(format!(
                "field '{}': {}",
                field.name,
                err.reason.unwrap_or_default()
            )))?;
        row.insert(field.name.clone(), coerced);
    }
    Ok(())
}
