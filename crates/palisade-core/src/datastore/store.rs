//! SQLite-backed namespaced data store
//!
//! The composite primary keys on `plugin_tables` and `plugin_entries` keep
//! identity unique at the schema level; the duplicate-identifier check on
//! insert is therefore atomic with the insert itself. Update and delete are
//! read-modify-write and run under the store's write lock.

use std::sync::Arc;

use chrono::Utc;
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;

use crate::datastore::types::{identifier_from_value, DataEntry, DataTable, ValueMap};
use crate::error::{Error, Result};
use crate::storage::Database;

/// SQLite-backed store for plugin-owned tables and entries.
#[derive(Debug, Clone)]
pub struct DataStore {
    pool: SqlitePool,
    // Serializes read-modify-write operations (update/delete merge paths).
    write_lock: Arc<Mutex<()>>,
}

impl DataStore {
    /// Create a data store over an open database.
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a table for a plugin. Idempotent: when `(module, name)` already
    /// exists the stored descriptor is returned unchanged.
    pub async fn create_table(
        &self,
        module: &str,
        table_name: &str,
        primary_key: &str,
    ) -> Result<DataTable> {
        let _lock = self.write_lock.lock().await;

        if let Some(existing) = self.find_table(module, table_name).await? {
            return Ok(existing);
        }

        let table = DataTable {
            module: module.to_string(),
            table_name: table_name.to_string(),
            primary_key: primary_key.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO plugin_tables (module, table_name, primary_key, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&table.module)
        .bind(&table.table_name)
        .bind(&table.primary_key)
        .bind(table.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(table = %table.qualified_name(), "table created");
        Ok(table)
    }

    /// All known tables, across every plugin.
    pub async fn tables(&self) -> Result<Vec<DataTable>> {
        let rows: Vec<TableRow> = sqlx::query_as("SELECT * FROM plugin_tables ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_table()).collect()
    }

    /// Look up a table by its `(module, table_name)` identity.
    pub async fn find_table(&self, module: &str, table_name: &str) -> Result<Option<DataTable>> {
        let row: Option<TableRow> =
            sqlx::query_as("SELECT * FROM plugin_tables WHERE module = ? AND table_name = ?")
                .bind(module)
                .bind(table_name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.into_table()).transpose()
    }

    /// Look up an entry by its full identity triplet.
    pub async fn find_entry(
        &self,
        module: &str,
        table_name: &str,
        identifier: &str,
    ) -> Result<Option<DataEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(
            "SELECT * FROM plugin_entries
             WHERE module = ? AND table_name = ? AND identifier = ?",
        )
        .bind(module)
        .bind(table_name)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_entry()).transpose()
    }

    /// Insert a new entry. The table must exist, `data` must carry the
    /// table's primary key field, and the identifier must be unused.
    pub async fn insert_entry(
        &self,
        module: &str,
        table_name: &str,
        data: ValueMap,
    ) -> Result<DataEntry> {
        let table = self.table_or_fail(module, table_name).await?;
        let identifier = primary_key_value("insert", &table, &data)?;

        let now = Utc::now();
        let entry = DataEntry {
            module: module.to_string(),
            table_name: table_name.to_string(),
            identifier,
            values: data,
            created_at: now,
            updated_at: now,
        };

        let inserted = sqlx::query(
            "INSERT INTO plugin_entries
                 (module, table_name, identifier, field_values, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.module)
        .bind(&entry.table_name)
        .bind(&entry.identifier)
        .bind(encode_values(&entry.values)?)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                debug!(table = %table.qualified_name(), id = %entry.identifier, "entry inserted");
                Ok(entry)
            }
            Err(e) if is_unique_violation(&e) => Err(Error::DuplicateKey(
                entry.identifier,
                table.qualified_name(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Update an existing entry by shallow field overlay: fields in `data`
    /// replace same-named fields of the stored value map, other stored
    /// fields are untouched.
    pub async fn update_entry(
        &self,
        module: &str,
        table_name: &str,
        data: ValueMap,
    ) -> Result<DataEntry> {
        let _lock = self.write_lock.lock().await;

        let table = self.table_or_fail(module, table_name).await?;
        let identifier = primary_key_value("update", &table, &data)?;

        let mut entry = self
            .find_entry(module, table_name, &identifier)
            .await?
            .ok_or_else(|| Error::EntryNotFound(identifier.clone(), table.qualified_name()))?;

        for (field, value) in data {
            entry.values.insert(field, value);
        }
        entry.updated_at = Utc::now();

        sqlx::query(
            "UPDATE plugin_entries SET field_values = ?, updated_at = ?
             WHERE module = ? AND table_name = ? AND identifier = ?",
        )
        .bind(encode_values(&entry.values)?)
        .bind(entry.updated_at.to_rfc3339())
        .bind(module)
        .bind(table_name)
        .bind(&identifier)
        .execute(&self.pool)
        .await?;

        debug!(table = %table.qualified_name(), id = %identifier, "entry updated");
        Ok(entry)
    }

    /// Delete an existing entry; the identifier is read from `data` at the
    /// table's primary key field.
    pub async fn delete_entry(
        &self,
        module: &str,
        table_name: &str,
        data: ValueMap,
    ) -> Result<()> {
        let _lock = self.write_lock.lock().await;

        let table = self.table_or_fail(module, table_name).await?;
        let identifier = primary_key_value("delete", &table, &data)?;

        let deleted = sqlx::query(
            "DELETE FROM plugin_entries
             WHERE module = ? AND table_name = ? AND identifier = ?",
        )
        .bind(module)
        .bind(table_name)
        .bind(&identifier)
        .execute(&self.pool)
        .await?;

        if deleted.rows_affected() == 0 {
            return Err(Error::EntryNotFound(identifier, table.qualified_name()));
        }

        debug!(table = %table.qualified_name(), id = %identifier, "entry deleted");
        Ok(())
    }

    /// Read entries, optionally narrowed to one module and/or table, and
    /// filtered by exact match on every supplied field (AND semantics).
    pub async fn get_entries(
        &self,
        module: Option<&str>,
        table_name: Option<&str>,
        filters: Option<&ValueMap>,
    ) -> Result<Vec<DataEntry>> {
        let rows: Vec<EntryRow> = match (module, table_name) {
            (Some(module), Some(table_name)) => {
                sqlx::query_as(
                    "SELECT * FROM plugin_entries
                     WHERE module = ? AND table_name = ? ORDER BY rowid",
                )
                .bind(module)
                .bind(table_name)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(module), None) => {
                sqlx::query_as("SELECT * FROM plugin_entries WHERE module = ? ORDER BY rowid")
                    .bind(module)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(table_name)) => {
                sqlx::query_as("SELECT * FROM plugin_entries WHERE table_name = ? ORDER BY rowid")
                    .bind(table_name)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, None) => {
                sqlx::query_as("SELECT * FROM plugin_entries ORDER BY rowid")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut entries = rows
            .into_iter()
            .map(|r| r.into_entry())
            .collect::<Result<Vec<_>>>()?;

        if let Some(filters) = filters {
            if !filters.is_empty() {
                entries.retain(|entry| {
                    filters
                        .iter()
                        .all(|(field, expected)| entry.values.get(field) == Some(expected))
                });
            }
        }

        Ok(entries)
    }

    /// Drop every plugin table and entry.
    pub async fn reset(&self) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        sqlx::query("DELETE FROM plugin_entries").execute(&self.pool).await?;
        sqlx::query("DELETE FROM plugin_tables").execute(&self.pool).await?;
        Ok(())
    }

    async fn table_or_fail(&self, module: &str, table_name: &str) -> Result<DataTable> {
        self.find_table(module, table_name)
            .await?
            .ok_or_else(|| Error::TableNotFound(module.to_string(), table_name.to_string()))
    }
}

fn primary_key_value(operation: &'static str, table: &DataTable, data: &ValueMap) -> Result<String> {
    data.get(&table.primary_key)
        .map(identifier_from_value)
        .ok_or_else(|| Error::MissingPrimaryKey(operation, table.qualified_name()))
}

fn encode_values(values: &ValueMap) -> Result<String> {
    serde_json::to_string(values)
        .map_err(|e| Error::Other(format!("failed to serialize entry values: {e}")))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

/// Raw row shape for the `plugin_tables` table.
#[derive(FromRow)]
struct TableRow {
    module: String,
    table_name: String,
    primary_key: String,
    created_at: String,
}

impl TableRow {
    fn into_table(self) -> Result<DataTable> {
        Ok(DataTable {
            module: self.module,
            table_name: self.table_name,
            primary_key: self.primary_key,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Raw row shape for the `plugin_entries` table.
#[derive(FromRow)]
struct EntryRow {
    module: String,
    table_name: String,
    identifier: String,
    field_values: String,
    created_at: String,
    updated_at: String,
}

impl EntryRow {
    fn into_entry(self) -> Result<DataEntry> {
        Ok(DataEntry {
            module: self.module,
            table_name: self.table_name,
            identifier: self.identifier,
            values: serde_json::from_str(&self.field_values)
                .map_err(|e| Error::Other(format!("corrupt entry values: {e}")))?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(data: &str) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(data)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("corrupt timestamp: {e}")))
}
