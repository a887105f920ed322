//! Data store model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field dictionary for an entry: scalar values (or arrays of scalars)
/// keyed by field name.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

/// A plugin-owned custom table. Identity is `(module, table_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub module: String,
    pub table_name: String,
    pub primary_key: String,
    pub created_at: DateTime<Utc>,
}

impl DataTable {
    /// Namespaced table name as used in diagnostics: `module::table`.
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.module, &self.table_name)
    }
}

/// One row of a plugin-owned table. Identity is
/// `(module, table_name, identifier)`; `identifier` is the stringified value
/// of the owning table's primary key field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    pub module: String,
    pub table_name: String,
    pub identifier: String,
    pub values: ValueMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Join a module and table name into the namespaced diagnostic form.
pub fn qualified_name(module: &str, table_name: &str) -> String {
    format!("{module}::{table_name}")
}

/// Stringify a primary key value the way identifiers are stored: strings
/// verbatim, other scalars via their JSON rendering.
pub fn identifier_from_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
