//! Database migrations
//!
//! This module manages SQLite schema migrations for the plugin host.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Plugin registry, grants, settings and namespaced data tables
const MIGRATION_V1: &str = r#"
    -- Known plugins and their lifecycle status. One row per module;
    -- descriptors are flagged 'uninstalled', never deleted.
    CREATE TABLE IF NOT EXISTS plugins (
        module TEXT PRIMARY KEY NOT NULL,
        install_path TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL DEFAULT '',
        version TEXT NOT NULL DEFAULT '',
        main TEXT,
        author TEXT,                              -- JSON object
        description TEXT NOT NULL DEFAULT '',
        homepage TEXT NOT NULL DEFAULT '',
        repository TEXT,                          -- JSON object
        dependencies TEXT NOT NULL DEFAULT '{}',  -- JSON object: module -> version
        status TEXT NOT NULL DEFAULT 'installed'
            CHECK (status IN ('installed', 'enabled', 'disabled', 'uninstalled')),
        routes TEXT NOT NULL DEFAULT '[]',        -- JSON array
        components TEXT NOT NULL DEFAULT '[]',    -- JSON array of component names
        storages TEXT NOT NULL DEFAULT '[]',      -- JSON array of storage declarations
        settings TEXT NOT NULL DEFAULT '[]',      -- JSON array of setting declarations
        permissions TEXT NOT NULL DEFAULT '[]',   -- JSON array of requested targets
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_plugins_status ON plugins(status);

    -- Per-plugin permission grants. A grant is live while revoked_at is NULL.
    CREATE TABLE IF NOT EXISTS permission_grants (
        id TEXT PRIMARY KEY NOT NULL,
        module TEXT NOT NULL REFERENCES plugins(module) ON DELETE CASCADE,
        target TEXT NOT NULL,
        granted_at TEXT NOT NULL,
        revoked_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_permission_grants_module ON permission_grants(module);
    CREATE INDEX IF NOT EXISTS idx_permission_grants_target ON permission_grants(module, target);

    -- Per-plugin settings values; declared defaults live on the descriptor.
    CREATE TABLE IF NOT EXISTS plugin_settings (
        module TEXT NOT NULL REFERENCES plugins(module) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value TEXT NOT NULL,                      -- JSON value
        updated_at TEXT NOT NULL,
        PRIMARY KEY (module, name)
    );

    -- Plugin-owned custom tables; identity is (module, table_name).
    CREATE TABLE IF NOT EXISTS plugin_tables (
        module TEXT NOT NULL,
        table_name TEXT NOT NULL,
        primary_key TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (module, table_name)
    );

    -- Plugin-owned entries; identity is (module, table_name, identifier).
    -- The composite primary key makes duplicate-insert detection atomic.
    CREATE TABLE IF NOT EXISTS plugin_entries (
        module TEXT NOT NULL,
        table_name TEXT NOT NULL,
        identifier TEXT NOT NULL,
        field_values TEXT NOT NULL DEFAULT '{}',  -- JSON object
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (module, table_name, identifier),
        FOREIGN KEY (module, table_name)
            REFERENCES plugin_tables(module, table_name) ON DELETE CASCADE
    );
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    // Get the latest version
    let row: Option<(i32,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Plugin registry and data store schema");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}
