//! Plugin discovery
//!
//! Produces plugin descriptors from two sources: a local plugins directory
//! (one subfolder per module, each with a `package.json`) and a remote
//! unpkg-style package registry. Discovery is driven by a `plugins.json`
//! config file mapping module name -> requested version; a missing config
//! means "no plugins", never an error, and one broken candidate never
//! aborts the pass.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;
use crate::manifest::PackageManifest;
use crate::registry::PluginDescriptor;

/// Module name -> requested version, as configured in `plugins.json`.
pub type DiscoveryConfig = BTreeMap<String, String>;

/// Read the discovery config. Absence yields an empty config; a malformed
/// file is logged and treated as empty rather than failing the pass.
pub fn read_config(path: &Path) -> DiscoveryConfig {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return DiscoveryConfig::new(),
        Err(e) => {
            warn!(path = %path.display(), "failed to read plugins config: {e}");
            return DiscoveryConfig::new();
        }
    };

    match serde_json::from_str(&data) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), "malformed plugins config, ignoring: {e}");
            DiscoveryConfig::new()
        }
    }
}

/// Create an empty discovery config (`{}`) if none exists yet.
pub fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, "{}")?;
    Ok(())
}

/// Filesystem-based plugin discovery.
#[derive(Debug, Clone)]
pub struct LocalDiscovery {
    plugins_dir: PathBuf,
    config_path: PathBuf,
}

impl LocalDiscovery {
    pub fn new(plugins_dir: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            config_path: config_path.into(),
        }
    }

    /// Enumerate every configured plugin present on disk. Candidates with a
    /// missing or malformed manifest are skipped with a diagnostic.
    pub fn discover(&self) -> Vec<PluginDescriptor> {
        let config = read_config(&self.config_path);
        let mut descriptors = Vec::new();

        for (module, version) in &config {
            let install_path = self.plugins_dir.join(module);
            let manifest_path = install_path.join("package.json");

            let manifest = match PackageManifest::load(&manifest_path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(
                        module = %module,
                        version = %version,
                        path = %manifest_path.display(),
                        "skipping plugin candidate: {e}"
                    );
                    continue;
                }
            };

            descriptors.push(PluginDescriptor::from_manifest(
                module,
                &install_path.display().to_string(),
                manifest,
            ));
        }

        info!(
            discovered = descriptors.len(),
            configured = config.len(),
            "local discovery pass complete"
        );
        descriptors
    }
}

/// Remote package registry lookup (unpkg layout:
/// `{base}/{module}@{version}/package.json`).
#[derive(Debug, Clone)]
pub struct RemoteRegistry {
    base_url: String,
    install_root: PathBuf,
    client: reqwest::Client,
}

impl RemoteRegistry {
    pub fn new(base_url: impl Into<String>, install_root: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            install_root: install_root.into(),
            client: reqwest::Client::new(),
        }
    }

    /// URL of a module's manifest on the registry.
    pub fn manifest_url(&self, module: &str, version: &str) -> String {
        format!(
            "{}/{module}@{version}/package.json",
            self.base_url.trim_end_matches('/')
        )
    }

    /// Fetch one module's manifest and build its descriptor. The install
    /// path is derived under the local plugins root, where the external
    /// installer places packages.
    pub async fn fetch(&self, module: &str, version: &str) -> Result<PluginDescriptor> {
        let url = self.manifest_url(module, version);
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let manifest = PackageManifest::parse(&body)?;
        let install_path = self.install_root.join(module);

        Ok(PluginDescriptor::from_manifest(
            module,
            &install_path.display().to_string(),
            manifest,
        ))
    }

    /// Look up every configured plugin on the registry. Fetch and parse
    /// failures are skipped with a diagnostic.
    pub async fn discover(&self, config: &DiscoveryConfig) -> Vec<PluginDescriptor> {
        let mut descriptors = Vec::new();

        for (module, version) in config {
            match self.fetch(module, version).await {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    warn!(
                        module = %module,
                        version = %version,
                        "skipping remote plugin candidate: {e}"
                    );
                }
            }
        }

        info!(
            discovered = descriptors.len(),
            configured = config.len(),
            "remote discovery pass complete"
        );
        descriptors
    }
}
