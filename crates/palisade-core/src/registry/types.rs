//! Registry data model

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manifest::{PackageManifest, PluginAuthor, PluginRepository};

/// Plugin lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Installed,
    Enabled,
    Disabled,
    Uninstalled,
}

impl InstallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Uninstalled => "uninstalled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "installed" => Some(Self::Installed),
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            "uninstalled" => Some(Self::Uninstalled),
            _ => None,
        }
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A route a plugin wants mounted in the host UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDeclaration {
    pub path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

/// A custom database table a plugin wants created at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDeclaration {
    pub table_name: String,
    pub primary_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A user-tunable setting a plugin declares, with an optional default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// The host's record of a plugin's identity, manifest data and lifecycle
/// status. `module` is the globally unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub module: String,
    pub install_path: String,
    pub name: String,
    pub version: String,
    pub main: Option<String>,
    pub author: Option<PluginAuthor>,
    pub description: String,
    pub homepage: String,
    pub repository: Option<PluginRepository>,
    pub dependencies: BTreeMap<String, String>,
    pub status: InstallStatus,
    pub routes: Vec<RouteDeclaration>,
    pub component_names: Vec<String>,
    pub storages: Vec<StorageDeclaration>,
    pub settings: Vec<SettingDeclaration>,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PluginDescriptor {
    /// Build a freshly discovered descriptor from a parsed manifest. The
    /// `name` is the slug the plugin was configured under; runtime-derived
    /// fields (routes, components, storages, settings, permissions) start
    /// empty and are filled in when the plugin is loaded.
    pub fn from_manifest(name: &str, install_path: &str, manifest: PackageManifest) -> Self {
        let now = Utc::now();
        Self {
            module: manifest.name,
            install_path: install_path.to_string(),
            name: name.to_string(),
            version: manifest.version,
            main: manifest.main,
            author: manifest.author,
            description: manifest.description,
            homepage: manifest.homepage,
            repository: manifest.repository,
            dependencies: manifest.dependencies,
            status: InstallStatus::Installed,
            routes: Vec::new(),
            component_names: Vec::new(),
            storages: Vec::new(),
            settings: Vec::new(),
            permissions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Compare everything that identifies the descriptor's content,
    /// ignoring `updated_at`. Reconciliation uses this to decide whether a
    /// pass actually changed anything.
    pub fn same_content(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.updated_at = b.updated_at;
        a == b
    }
}

/// A permission the user granted a specific plugin for a specific request
/// target. Live while `revoked_at` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: Uuid,
    pub module: String,
    pub target: String,
    pub granted_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl PermissionGrant {
    pub fn is_live(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Runtime-derived plugin details reported when a plugin's entry point has
/// been evaluated on the plugin side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadedPlugin {
    pub module: String,
    pub entry_point: String,
    #[serde(default)]
    pub component_names: Vec<String>,
    #[serde(default)]
    pub routes: Vec<RouteDeclaration>,
    #[serde(default)]
    pub storages: Vec<StorageDeclaration>,
    #[serde(default)]
    pub settings: Vec<SettingDeclaration>,
    #[serde(default)]
    pub permissions: Vec<String>,
}
