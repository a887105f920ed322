//! Per-plugin settings storage
//!
//! A plugin declares its settings (with optional defaults) in its runtime
//! declarations; values set by the user are stored here. Reading falls back
//! to the declared default when no value was ever set.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::RegistryStore;
use crate::storage::Database;

/// A stored setting value for one plugin.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PluginSetting {
    pub module: String,
    pub name: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed store for plugin settings values.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
    registry: RegistryStore,
}

impl SettingsStore {
    pub fn new(db: &Database, registry: RegistryStore) -> Self {
        Self {
            pool: db.pool().clone(),
            registry,
        }
    }

    /// Set a setting value, inserting or replacing as needed.
    pub async fn set(&self, module: &str, name: &str, value: serde_json::Value) -> Result<PluginSetting> {
        if self.registry.find(module).await?.is_none() {
            return Err(Error::PluginNotFound(module.to_string()));
        }

        let setting = PluginSetting {
            module: module.to_string(),
            name: name.to_string(),
            value,
            updated_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO plugin_settings (module, name, value, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(module, name) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
        )
        .bind(&setting.module)
        .bind(&setting.name)
        .bind(setting.value.to_string())
        .bind(setting.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(module = %module, name = %name, "setting saved");
        Ok(setting)
    }

    /// Read a setting value; falls back to the default declared on the
    /// plugin's descriptor when no stored value exists.
    pub async fn get(&self, module: &str, name: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<SettingRow> =
            sqlx::query_as("SELECT * FROM plugin_settings WHERE module = ? AND name = ?")
                .bind(module)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(row) = row {
            return Ok(Some(row.into_setting()?.value));
        }

        let descriptor = self
            .registry
            .find(module)
            .await?
            .ok_or_else(|| Error::PluginNotFound(module.to_string()))?;

        Ok(descriptor
            .settings
            .iter()
            .find(|declaration| declaration.name == name)
            .and_then(|declaration| declaration.default.clone()))
    }

    /// All stored settings for a plugin.
    pub async fn all(&self, module: &str) -> Result<Vec<PluginSetting>> {
        let rows: Vec<SettingRow> =
            sqlx::query_as("SELECT * FROM plugin_settings WHERE module = ? ORDER BY name")
                .bind(module)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.into_setting()).collect()
    }
}

/// Raw row shape for the `plugin_settings` table.
#[derive(FromRow)]
struct SettingRow {
    module: String,
    name: String,
    value: String,
    updated_at: String,
}

impl SettingRow {
    fn into_setting(self) -> Result<PluginSetting> {
        Ok(PluginSetting {
            module: self.module,
            name: self.name,
            value: serde_json::from_str(&self.value)
                .map_err(|e| Error::Other(format!("corrupt setting value: {e}")))?,
            updated_at: DateTime::parse_from_rfc3339(&self.updated_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::Other(format!("corrupt setting timestamp: {e}")))?,
        })
    }
}
