//! Plugin load step
//!
//! When a plugin's entry point has been evaluated on the plugin side, the
//! host applies its runtime declarations: descriptor fields are updated,
//! declared storage tables are created (idempotently), and a `Loaded`
//! notification goes out to the UI layer.

use tracing::info;

use crate::datastore::DataStore;
use crate::error::Result;
use crate::events::{PluginEvent, PluginEvents};
use crate::registry::types::{LoadedPlugin, PluginDescriptor};
use crate::registry::RegistryStore;

/// Apply a loaded plugin's runtime declarations to the registry and data
/// store, then notify subscribers.
pub async fn load_plugin(
    registry: &RegistryStore,
    datastore: &DataStore,
    events: &PluginEvents,
    loaded: LoadedPlugin,
) -> Result<PluginDescriptor> {
    let descriptor = registry.apply_loaded(&loaded).await?;

    for storage in &loaded.storages {
        datastore
            .create_table(&loaded.module, &storage.table_name, &storage.primary_key)
            .await?;
    }

    info!(
        module = %loaded.module,
        components = loaded.component_names.len(),
        routes = loaded.routes.len(),
        "plugin loaded"
    );
    events.emit(PluginEvent::Loaded(loaded));

    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PackageManifest;
    use crate::registry::types::StorageDeclaration;
    use crate::registry::PluginDescriptor;
    use crate::storage::Database;

    fn descriptor(module: &str) -> PluginDescriptor {
        let manifest =
            PackageManifest::parse(&format!(r#"{{"name": "{module}", "version": "1.0.0"}}"#))
                .unwrap();
        PluginDescriptor::from_manifest(module, &format!("/plugins/{module}"), manifest)
    }

    fn loaded(module: &str) -> LoadedPlugin {
        LoadedPlugin {
            module: module.to_string(),
            entry_point: format!("/plugins/{module}/dist/index.js"),
            component_names: vec!["FooPanel".to_string()],
            storages: vec![StorageDeclaration {
                table_name: "notes".to_string(),
                primary_key: "id".to_string(),
                description: None,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn load_creates_declared_tables_and_emits() {
        let db = Database::in_memory().await.unwrap();
        let registry = RegistryStore::new(&db);
        let datastore = DataStore::new(&db);
        let events = PluginEvents::new();
        let mut rx = events.subscribe();

        registry.reconcile(vec![descriptor("@acme/foo")]).await.unwrap();

        let result = load_plugin(&registry, &datastore, &events, loaded("@acme/foo"))
            .await
            .unwrap();
        assert_eq!(result.component_names, vec!["FooPanel".to_string()]);

        let table = datastore
            .find_table("@acme/foo", "notes")
            .await
            .unwrap()
            .expect("declared table should exist");
        assert_eq!(table.primary_key, "id");

        match rx.recv().await.unwrap() {
            PluginEvent::Loaded(event) => assert_eq!(event.module, "@acme/foo"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_is_idempotent_over_tables() {
        let db = Database::in_memory().await.unwrap();
        let registry = RegistryStore::new(&db);
        let datastore = DataStore::new(&db);
        let events = PluginEvents::new();

        registry.reconcile(vec![descriptor("@acme/foo")]).await.unwrap();

        load_plugin(&registry, &datastore, &events, loaded("@acme/foo"))
            .await
            .unwrap();
        load_plugin(&registry, &datastore, &events, loaded("@acme/foo"))
            .await
            .unwrap();

        assert_eq!(datastore.tables().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_requires_known_module() {
        let db = Database::in_memory().await.unwrap();
        let registry = RegistryStore::new(&db);
        let datastore = DataStore::new(&db);
        let events = PluginEvents::new();

        let err = load_plugin(&registry, &datastore, &events, loaded("@acme/ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::PluginNotFound(_)), "got {err:?}");
    }
}
