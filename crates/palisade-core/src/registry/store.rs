//! SQLite-backed plugin registry
//!
//! Persists plugin descriptors and permission grants. Reconciliation merges
//! each discovery pass into the stored state: discovered manifest data wins,
//! stored-only fields survive, and modules that vanished from discovery are
//! flagged `Uninstalled` rather than deleted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{PluginEvent, PluginEvents};
use crate::registry::types::{InstallStatus, LoadedPlugin, PermissionGrant, PluginDescriptor};
use crate::storage::Database;

/// SQLite-backed registry of known plugins and their grants.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    pool: SqlitePool,
    events: Option<PluginEvents>,
    // Serializes reconciliation and status transitions (read-merge-write).
    write_lock: Arc<Mutex<()>>,
}

impl RegistryStore {
    /// Create a registry store over an open database.
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
            events: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Attach a lifecycle event channel; reconciliation passes emit
    /// `PluginEvent::Discovered` on it.
    pub fn with_events(mut self, events: PluginEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// All known descriptors, in registration order.
    pub async fn plugins(&self) -> Result<Vec<PluginDescriptor>> {
        let rows: Vec<PluginRow> = sqlx::query_as("SELECT * FROM plugins ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_descriptor()).collect()
    }

    /// Look up one descriptor by module name.
    pub async fn find(&self, module: &str) -> Result<Option<PluginDescriptor>> {
        let row: Option<PluginRow> = sqlx::query_as("SELECT * FROM plugins WHERE module = ?")
            .bind(module)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_descriptor()).transpose()
    }

    /// Persist descriptors as-is (upsert by module).
    pub async fn install(&self, descriptors: &[PluginDescriptor]) -> Result<()> {
        for descriptor in descriptors {
            self.upsert(descriptor).await?;
        }
        Ok(())
    }

    /// Reconcile a freshly discovered descriptor list against the stored
    /// registry and return the new persisted state.
    ///
    /// Running the same discovery input twice yields identical stored state:
    /// `updated_at` only advances when a descriptor materially changed.
    pub async fn reconcile(
        &self,
        discovered: Vec<PluginDescriptor>,
    ) -> Result<Vec<PluginDescriptor>> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let stored = self.plugins().await?;
        let mut stored_by_module: HashMap<&str, &PluginDescriptor> = HashMap::new();
        for descriptor in &stored {
            // first occurrence wins
            stored_by_module
                .entry(descriptor.module.as_str())
                .or_insert(descriptor);
        }

        let mut reconciled = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for fresh in discovered {
            // first occurrence wins within the discovery list too
            if !seen.insert(fresh.module.clone()) {
                continue;
            }

            let merged = match stored_by_module.get(fresh.module.as_str()) {
                Some(previous) => {
                    let mut merged = fresh;
                    // discovered manifest data wins; stored-only fields
                    // (runtime declarations, created_at, status) survive
                    merged.created_at = previous.created_at;
                    merged.routes = previous.routes.clone();
                    merged.component_names = previous.component_names.clone();
                    merged.storages = previous.storages.clone();
                    merged.settings = previous.settings.clone();
                    merged.permissions = previous.permissions.clone();
                    merged.status = match previous.status {
                        // the module reappeared after an uninstall
                        InstallStatus::Uninstalled => InstallStatus::Installed,
                        status => status,
                    };

                    if merged.same_content(previous) {
                        merged.updated_at = previous.updated_at;
                    } else {
                        merged.updated_at = now;
                        self.upsert(&merged).await?;
                    }
                    merged
                }
                None => {
                    let mut merged = fresh;
                    merged.status = InstallStatus::Installed;
                    merged.created_at = now;
                    merged.updated_at = now;
                    self.upsert(&merged).await?;
                    merged
                }
            };

            reconciled.push(merged);
        }

        // previously stored modules absent from this pass
        for previous in &stored {
            if seen.contains(&previous.module) {
                continue;
            }
            seen.insert(previous.module.clone());

            let mut gone = previous.clone();
            if gone.status != InstallStatus::Uninstalled {
                gone.status = InstallStatus::Uninstalled;
                gone.updated_at = now;
                self.upsert(&gone).await?;
                info!(module = %gone.module, "plugin no longer discovered, flagged uninstalled");
            }
            reconciled.push(gone);
        }

        debug!(count = reconciled.len(), "registry reconciled");
        if let Some(events) = &self.events {
            events.emit(PluginEvent::Discovered(reconciled.clone()));
        }

        Ok(reconciled)
    }

    /// Enable a plugin. Valid from `Installed` or `Disabled`.
    pub async fn enable(&self, module: &str) -> Result<PluginDescriptor> {
        self.transition(module, "enabled", InstallStatus::Enabled, |status| {
            matches!(status, InstallStatus::Installed | InstallStatus::Disabled)
        })
        .await
    }

    /// Disable a plugin. Valid only from `Enabled`.
    pub async fn disable(&self, module: &str) -> Result<PluginDescriptor> {
        self.transition(module, "disabled", InstallStatus::Disabled, |status| {
            matches!(status, InstallStatus::Enabled)
        })
        .await
    }

    async fn transition(
        &self,
        module: &str,
        verb: &'static str,
        to: InstallStatus,
        guard: impl Fn(InstallStatus) -> bool,
    ) -> Result<PluginDescriptor> {
        let _lock = self.write_lock.lock().await;

        let mut descriptor = self
            .find(module)
            .await?
            .ok_or_else(|| Error::PluginNotFound(module.to_string()))?;

        if !guard(descriptor.status) {
            return Err(Error::InvalidStatus(
                module.to_string(),
                verb,
                descriptor.status.to_string(),
            ));
        }

        descriptor.status = to;
        descriptor.updated_at = Utc::now();
        self.upsert(&descriptor).await?;

        info!(module = %module, status = %to, "plugin status changed");
        Ok(descriptor)
    }

    /// Apply runtime-derived fields reported by a loaded plugin.
    pub async fn apply_loaded(&self, loaded: &LoadedPlugin) -> Result<PluginDescriptor> {
        let _lock = self.write_lock.lock().await;

        let mut descriptor = self
            .find(&loaded.module)
            .await?
            .ok_or_else(|| Error::PluginNotFound(loaded.module.clone()))?;

        descriptor.routes = loaded.routes.clone();
        descriptor.component_names = loaded.component_names.clone();
        descriptor.storages = loaded.storages.clone();
        descriptor.settings = loaded.settings.clone();
        descriptor.permissions = loaded.permissions.clone();
        descriptor.updated_at = Utc::now();
        self.upsert(&descriptor).await?;

        Ok(descriptor)
    }

    // region permission grants

    /// Grant a plugin access to a request target. Idempotent over live
    /// grants: an identical live grant is returned unchanged.
    pub async fn grant(&self, module: &str, target: &str) -> Result<PermissionGrant> {
        if self.find(module).await?.is_none() {
            return Err(Error::PluginNotFound(module.to_string()));
        }

        if let Some(existing) = self.find_live_grant(module, target).await? {
            return Ok(existing);
        }

        let grant = PermissionGrant {
            id: Uuid::new_v4(),
            module: module.to_string(),
            target: target.to_string(),
            granted_at: Utc::now(),
            revoked_at: None,
        };

        sqlx::query(
            "INSERT INTO permission_grants (id, module, target, granted_at, revoked_at)
             VALUES (?, ?, ?, ?, NULL)",
        )
        .bind(grant.id.to_string())
        .bind(&grant.module)
        .bind(&grant.target)
        .bind(grant.granted_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!(module = %module, target = %target, "permission granted");
        Ok(grant)
    }

    /// Revoke every live grant a plugin holds for a target.
    pub async fn revoke(&self, module: &str, target: &str) -> Result<()> {
        sqlx::query(
            "UPDATE permission_grants SET revoked_at = ?
             WHERE module = ? AND target = ? AND revoked_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(module)
        .bind(target)
        .execute(&self.pool)
        .await?;

        info!(module = %module, target = %target, "permission revoked");
        Ok(())
    }

    /// Whether a live grant exists matching the target exactly.
    pub async fn has_live_grant(&self, module: &str, target: &str) -> Result<bool> {
        Ok(self.find_live_grant(module, target).await?.is_some())
    }

    /// All grants (live and revoked) held by a plugin.
    pub async fn grants(&self, module: &str) -> Result<Vec<PermissionGrant>> {
        let rows: Vec<GrantRow> = sqlx::query_as(
            "SELECT * FROM permission_grants WHERE module = ? ORDER BY granted_at",
        )
        .bind(module)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_grant()).collect()
    }

    async fn find_live_grant(&self, module: &str, target: &str) -> Result<Option<PermissionGrant>> {
        let row: Option<GrantRow> = sqlx::query_as(
            "SELECT * FROM permission_grants
             WHERE module = ? AND target = ? AND revoked_at IS NULL",
        )
        .bind(module)
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_grant()).transpose()
    }

    // endregion

    /// Remove every descriptor (and, via cascade, grants and settings).
    pub async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM plugins").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert(&self, descriptor: &PluginDescriptor) -> Result<()> {
        let author = descriptor
            .author
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Other(format!("failed to serialize author: {e}")))?;
        let repository = descriptor
            .repository
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Other(format!("failed to serialize repository: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO plugins (
                module, install_path, name, version, main, author, description,
                homepage, repository, dependencies, status, routes, components,
                storages, settings, permissions, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(module) DO UPDATE SET
                install_path = excluded.install_path,
                name = excluded.name,
                version = excluded.version,
                main = excluded.main,
                author = excluded.author,
                description = excluded.description,
                homepage = excluded.homepage,
                repository = excluded.repository,
                dependencies = excluded.dependencies,
                status = excluded.status,
                routes = excluded.routes,
                components = excluded.components,
                storages = excluded.storages,
                settings = excluded.settings,
                permissions = excluded.permissions,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&descriptor.module)
        .bind(&descriptor.install_path)
        .bind(&descriptor.name)
        .bind(&descriptor.version)
        .bind(&descriptor.main)
        .bind(author)
        .bind(&descriptor.description)
        .bind(&descriptor.homepage)
        .bind(repository)
        .bind(encode_json(&descriptor.dependencies)?)
        .bind(descriptor.status.as_str())
        .bind(encode_json(&descriptor.routes)?)
        .bind(encode_json(&descriptor.component_names)?)
        .bind(encode_json(&descriptor.storages)?)
        .bind(encode_json(&descriptor.settings)?)
        .bind(encode_json(&descriptor.permissions)?)
        .bind(descriptor.created_at.to_rfc3339())
        .bind(descriptor.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(module = %descriptor.module, "descriptor saved");
        Ok(())
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Other(format!("failed to serialize field: {e}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(column: &str, data: &str) -> Result<T> {
    serde_json::from_str(data)
        .map_err(|e| Error::Other(format!("corrupt registry column '{column}': {e}")))
}

fn decode_timestamp(column: &str, data: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(data)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("corrupt registry column '{column}': {e}")))
}

/// Raw row shape for the `plugins` table.
#[derive(FromRow)]
struct PluginRow {
    module: String,
    install_path: String,
    name: String,
    version: String,
    main: Option<String>,
    author: Option<String>,
    description: String,
    homepage: String,
    repository: Option<String>,
    dependencies: String,
    status: String,
    routes: String,
    components: String,
    storages: String,
    settings: String,
    permissions: String,
    created_at: String,
    updated_at: String,
}

impl PluginRow {
    fn into_descriptor(self) -> Result<PluginDescriptor> {
        let status = InstallStatus::parse(&self.status)
            .ok_or_else(|| Error::Other(format!("corrupt registry status '{}'", self.status)))?;

        Ok(PluginDescriptor {
            module: self.module,
            install_path: self.install_path,
            name: self.name,
            version: self.version,
            main: self.main,
            author: self
                .author
                .as_deref()
                .map(|a| decode_json("author", a))
                .transpose()?,
            description: self.description,
            homepage: self.homepage,
            repository: self
                .repository
                .as_deref()
                .map(|r| decode_json("repository", r))
                .transpose()?,
            dependencies: decode_json("dependencies", &self.dependencies)?,
            status,
            routes: decode_json("routes", &self.routes)?,
            component_names: decode_json("components", &self.components)?,
            storages: decode_json("storages", &self.storages)?,
            settings: decode_json("settings", &self.settings)?,
            permissions: decode_json("permissions", &self.permissions)?,
            created_at: decode_timestamp("created_at", &self.created_at)?,
            updated_at: decode_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

/// Raw row shape for the `permission_grants` table.
#[derive(FromRow)]
struct GrantRow {
    id: String,
    module: String,
    target: String,
    granted_at: String,
    revoked_at: Option<String>,
}

impl GrantRow {
    fn into_grant(self) -> Result<PermissionGrant> {
        Ok(PermissionGrant {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| Error::Other(format!("corrupt grant id: {e}")))?,
            module: self.module,
            target: self.target,
            granted_at: decode_timestamp("granted_at", &self.granted_at)?,
            revoked_at: self
                .revoked_at
                .as_deref()
                .map(|t| decode_timestamp("revoked_at", t))
                .transpose()?,
        })
    }
}
