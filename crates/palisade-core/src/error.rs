//! Error types for Palisade

use thiserror::Error;

/// Result type alias using Palisade's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Palisade error types with helpful messages
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors (E001-E099)
    #[error("Plugin '{0}' is not registered. Run `palisade discover` to refresh the registry.")]
    PluginNotFound(String),

    #[error("Database table not found: {0}::{1}")]
    TableNotFound(String, String),

    #[error("Entry with primary key value of '{0}' does not exist in table {1}")]
    EntryNotFound(String, String),

    // Lifecycle errors (E100-E199)
    #[error("Plugin '{0}' cannot be {1} while its status is '{2}'")]
    InvalidStatus(String, &'static str, String),

    // Access control errors (E200-E299)
    #[error("Plugin '{0}' is not the started plugin and may not issue requests")]
    PluginMustBeStarted(String),

    #[error("Plugin '{0}' must be enabled before it may issue requests")]
    PluginMustBeEnabled(String),

    #[error("Plugin '{0}' holds no grant for request target '{1}'")]
    PermissionNotGranted(String, String),

    #[error("Access denied for {0} target '{1}'")]
    AccessDenied(String, String),

    // Validation errors (E300-E399)
    #[error("Missing primary key value for {0} in table: {1}")]
    MissingPrimaryKey(&'static str, String),

    #[error("Invalid plugin manifest: {0}")]
    InvalidManifest(String),

    // Duplicate key errors (E400-E499)
    #[error("Entry with primary key value of '{0}' already exists in table {1}")]
    DuplicateKey(String, String),

    // Bridge errors (E600-E699)
    #[error("Request timed out after {0} seconds")]
    RequestTimeout(u64),

    #[error("Unknown request target '{0}'")]
    UnknownTarget(String),

    // Config errors (E700-E799)
    #[error("Configuration error: {0}")]
    Config(String),

    // External failures (E500-E599)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Network error: {0}. Check your internet connection.")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::PluginNotFound(_) => "E001",
            Self::TableNotFound(..) => "E002",
            Self::EntryNotFound(..) => "E003",
            Self::InvalidStatus(..) => "E100",
            Self::PluginMustBeStarted(_) => "E200",
            Self::PluginMustBeEnabled(_) => "E201",
            Self::PermissionNotGranted(..) => "E202",
            Self::AccessDenied(..) => "E203",
            Self::MissingPrimaryKey(..) => "E300",
            Self::InvalidManifest(_) => "E301",
            Self::DuplicateKey(..) => "E400",
            Self::Database(_) => "E500",
            Self::Network(_) => "E501",
            Self::Io(_) => "E502",
            Self::RequestTimeout(_) => "E600",
            Self::UnknownTarget(_) => "E601",
            Self::Config(_) => "E700",
            Self::Other(_) => "E9999",
        }
    }

    /// Whether the error denotes an authorization failure (bridge gates or
    /// policy evaluation) rather than an execution failure.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PluginMustBeStarted(_)
                | Self::PluginMustBeEnabled(_)
                | Self::PermissionNotGranted(..)
                | Self::AccessDenied(..)
        )
    }
}
