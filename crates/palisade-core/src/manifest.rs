//! Plugin package manifest parsing
//!
//! A plugin candidate ships a `package.json` manifest. Only `name` and
//! `version` are required; every optional field is defaulted once here, at
//! construction, so descriptor code never probes for missing keys.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Manifests larger than this are rejected outright.
const MAX_MANIFEST_BYTES: u64 = 64 * 1024;

/// A plugin author record. A bare-string author in the manifest is
/// normalized to `{ name }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A source repository record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRepository {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub url: String,
}

/// Author field as it appears on the wire: either `"Jane <j@x.y>"` or a
/// structured record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AuthorField {
    Text(String),
    Record(PluginAuthor),
}

/// Repository field as it appears on the wire: a URL string or a record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RepositoryField {
    Text(String),
    Record(PluginRepository),
}

/// Raw manifest shape as read from `package.json`.
#[derive(Debug, Clone, Deserialize)]
struct RawManifest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    author: Option<AuthorField>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    repository: Option<RepositoryField>,
    #[serde(default)]
    dependencies: Option<BTreeMap<String, String>>,
}

/// A validated plugin package manifest with all optional fields defaulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub main: Option<String>,
    pub author: Option<PluginAuthor>,
    pub description: String,
    pub homepage: String,
    pub repository: Option<PluginRepository>,
    pub dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Parse and validate a manifest from its JSON text.
    pub fn parse(data: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(data)
            .map_err(|e| Error::InvalidManifest(format!("invalid manifest JSON: {e}")))?;

        let manifest = Self {
            name: raw.name,
            version: raw.version,
            main: raw.main,
            author: raw.author.map(AuthorField::normalize),
            description: raw.description.unwrap_or_default(),
            homepage: raw.homepage.unwrap_or_default(),
            repository: raw.repository.and_then(RepositoryField::normalize),
            dependencies: raw.dependencies.unwrap_or_default(),
        };

        manifest.validate()?;
        Ok(manifest)
    }

    /// Load and parse a manifest file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        if metadata.len() > MAX_MANIFEST_BYTES {
            return Err(Error::InvalidManifest("manifest file too large".to_string()));
        }

        let data = fs::read_to_string(path)?;
        Self::parse(&data)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidManifest("manifest name cannot be empty".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(Error::InvalidManifest(format!(
                "manifest for '{}' carries no version",
                self.name
            )));
        }
        Ok(())
    }
}

impl AuthorField {
    fn normalize(self) -> PluginAuthor {
        match self {
            Self::Text(name) => PluginAuthor {
                name,
                email: None,
                url: None,
            },
            Self::Record(author) => author,
        }
    }
}

impl RepositoryField {
    fn normalize(self) -> Option<PluginRepository> {
        match self {
            Self::Text(url) if url.trim().is_empty() => None,
            Self::Text(url) => Some(PluginRepository {
                kind: String::new(),
                url,
            }),
            Self::Record(repo) => Some(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let manifest = PackageManifest::parse(r#"{"name": "@acme/foo", "version": "1.0.0"}"#)
            .expect("minimal manifest should parse");

        assert_eq!(manifest.name, "@acme/foo");
        assert_eq!(manifest.version, "1.0.0");
        assert!(manifest.main.is_none());
        assert!(manifest.author.is_none());
        assert_eq!(manifest.description, "");
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn normalizes_string_author() {
        let manifest = PackageManifest::parse(
            r#"{"name": "@acme/foo", "version": "1.0.0", "author": "Jane Doe"}"#,
        )
        .unwrap();

        let author = manifest.author.expect("author should be set");
        assert_eq!(author.name, "Jane Doe");
        assert!(author.email.is_none());
    }

    #[test]
    fn keeps_structured_author() {
        let manifest = PackageManifest::parse(
            r#"{
                "name": "@acme/foo",
                "version": "1.0.0",
                "author": {"name": "Jane", "email": "jane@acme.io"}
            }"#,
        )
        .unwrap();

        let author = manifest.author.unwrap();
        assert_eq!(author.name, "Jane");
        assert_eq!(author.email.as_deref(), Some("jane@acme.io"));
    }

    #[test]
    fn repository_string_becomes_record() {
        let manifest = PackageManifest::parse(
            r#"{"name": "a", "version": "1", "repository": "https://git.acme.io/foo"}"#,
        )
        .unwrap();

        let repo = manifest.repository.unwrap();
        assert_eq!(repo.url, "https://git.acme.io/foo");
        assert_eq!(repo.kind, "");
    }

    #[test]
    fn rejects_missing_name_or_version() {
        assert!(PackageManifest::parse(r#"{"version": "1.0.0"}"#).is_err());
        assert!(PackageManifest::parse(r#"{"name": "@acme/foo"}"#).is_err());
        assert!(PackageManifest::parse("not json").is_err());
    }
}
