//! Request/response bridge
//!
//! The single point where a plugin's intent to read or mutate host state
//! becomes an actual host-side effect. Requests arrive as envelopes over a
//! channel (or directly via [`Bridge::handle`]), pass three authentication
//! gates and the access policy, and are dispatched either to the host state
//! store or, for `db/*` targets, to the plugin's own namespaced data store.
//!
//! Dispatch is serialized per plugin: the wire protocol carries no
//! correlation id of its own, so at most one request per plugin is in
//! flight at a time. The host assigns a `request_id` to every envelope and
//! echoes it in the response; gate and policy failures come back as a
//! structured `error` rather than a dropped request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::datastore::{DataStore, ValueMap};
use crate::error::{Error, Result};
use crate::policy::{AccessPolicy, RequestKind};
use crate::registry::{InstallStatus, RegistryStore};

/// Default timeout for a single dispatched request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Host-side state store the bridge dispatches non-`db/*` targets to.
///
/// The actual wallet state (accounts, profiles, network) lives behind this
/// seam; the bridge only guarantees that `action` args always carry the
/// authenticated caller under the `plugin` key.
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Read-only lookup of a named getter.
    async fn getter(&self, target: &str) -> Result<Value>;

    /// Invoke a named action with its arguments and await the result.
    async fn action(&self, target: &str, args: Value) -> Result<Value>;

    /// Apply a named state write and return its result.
    async fn mutation(&self, target: &str, args: Value) -> Result<Value>;
}

/// Request envelope emitted by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id; assigned host-side when the plugin omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    pub plugin: String,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

/// Response envelope returned to the plugin: the request fields plus either
/// a result or a structured error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: Uuid,
    pub plugin: String,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A paired request and its one-shot response channel.
pub type BridgeRequest = (RequestEnvelope, oneshot::Sender<ResponseEnvelope>);

/// The request/response bridge between running plugins and host state.
#[derive(Clone)]
pub struct Bridge {
    registry: RegistryStore,
    datastore: DataStore,
    host: Arc<dyn HostStore>,
    policy: Arc<AccessPolicy>,
    /// The single currently started plugin, if any.
    active: Arc<RwLock<Option<String>>>,
    /// One dispatch lock per plugin; held across the whole request.
    plugin_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    request_timeout: Duration,
}

impl Bridge {
    pub fn new(registry: RegistryStore, datastore: DataStore, host: Arc<dyn HostStore>) -> Self {
        Self {
            registry,
            datastore,
            host,
            policy: Arc::new(AccessPolicy::default()),
            active: Arc::new(RwLock::new(None)),
            plugin_locks: Arc::new(Mutex::new(HashMap::new())),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Replace the default access policy.
    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Mark a plugin as started; only the started plugin passes gate (a).
    pub async fn start_plugin(&self, module: &str) -> Result<()> {
        if self.registry.find(module).await?.is_none() {
            return Err(Error::PluginNotFound(module.to_string()));
        }
        *self.active.write().await = Some(module.to_string());
        debug!(module = %module, "plugin started");
        Ok(())
    }

    /// Clear the started plugin.
    pub async fn stop_plugin(&self) {
        *self.active.write().await = None;
    }

    /// The currently started plugin, if any.
    pub async fn active_plugin(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// Serve paired requests from a channel until the sender side closes.
    /// Requests for distinct plugins run concurrently; per-plugin dispatch
    /// stays serialized by [`Bridge::handle`].
    pub async fn serve(&self, mut requests: mpsc::Receiver<BridgeRequest>) {
        while let Some((envelope, reply)) = requests.recv().await {
            let bridge = self.clone();
            tokio::spawn(async move {
                let response = bridge.handle(envelope).await;
                if reply.send(response).is_err() {
                    debug!("bridge response dropped: requester went away");
                }
            });
        }
    }

    /// Authenticate, authorize, and execute one request, always producing a
    /// response envelope. Failures are carried in the `error` field.
    pub async fn handle(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        let request_id = envelope.request_id.unwrap_or_else(Uuid::new_v4);

        let lock = self.plugin_lock(&envelope.plugin).await;
        let _serialized = lock.lock().await;

        let outcome = tokio::time::timeout(self.request_timeout, self.dispatch(&envelope)).await;
        let (response, error) = match outcome {
            Ok(Ok(value)) => (Some(value), None),
            Ok(Err(e)) => {
                warn!(
                    plugin = %envelope.plugin,
                    target = %envelope.action,
                    code = e.code(),
                    "bridge request failed: {e}"
                );
                (None, Some(format!("[{}] {e}", e.code())))
            }
            Err(_) => {
                let e = Error::RequestTimeout(self.request_timeout.as_secs());
                warn!(
                    plugin = %envelope.plugin,
                    target = %envelope.action,
                    "bridge request timed out"
                );
                (None, Some(format!("[{}] {e}", e.code())))
            }
        };

        ResponseEnvelope {
            request_id,
            plugin: envelope.plugin,
            kind: envelope.kind,
            action: envelope.action,
            response,
            error,
        }
    }

    async fn dispatch(&self, envelope: &RequestEnvelope) -> Result<Value> {
        self.authorize(envelope).await?;

        match envelope.kind {
            RequestKind::Getter => self.dispatch_getter(envelope).await,
            RequestKind::Action => self.dispatch_action(envelope).await,
            RequestKind::Mutation => {
                let args = envelope.args.clone().unwrap_or(Value::Null);
                self.host.mutation(&envelope.action, args).await
            }
        }
    }

    /// The three gates, in order, then the wildcard policy. Each gate is a
    /// distinct failure mode; ordering is observable and load-bearing.
    async fn authorize(&self, envelope: &RequestEnvelope) -> Result<()> {
        // (a) the caller must be the started plugin
        let active = self.active.read().await.clone();
        if active.as_deref() != Some(envelope.plugin.as_str()) {
            return Err(Error::PluginMustBeStarted(envelope.plugin.clone()));
        }

        // (b) the caller's descriptor must be enabled
        let descriptor = self
            .registry
            .find(&envelope.plugin)
            .await?
            .ok_or_else(|| Error::PluginNotFound(envelope.plugin.clone()))?;
        if descriptor.status != InstallStatus::Enabled {
            return Err(Error::PluginMustBeEnabled(envelope.plugin.clone()));
        }

        // (c) a live grant must match the target exactly
        if !self
            .registry
            .has_live_grant(&envelope.plugin, &envelope.action)
            .await?
        {
            return Err(Error::PermissionNotGranted(
                envelope.plugin.clone(),
                envelope.action.clone(),
            ));
        }

        self.policy.assert_allowed(envelope.kind, &envelope.action)
    }

    async fn dispatch_getter(&self, envelope: &RequestEnvelope) -> Result<Value> {
        match envelope.action.as_str() {
            "db/tables" => {
                let tables: Vec<_> = self
                    .datastore
                    .tables()
                    .await?
                    .into_iter()
                    .filter(|t| t.module == envelope.plugin)
                    .collect();
                encode(&tables)
            }
            "db/entries" => {
                let entries = self
                    .datastore
                    .get_entries(Some(&envelope.plugin), None, None)
                    .await?;
                encode(&entries)
            }
            target => self.host.getter(target).await,
        }
    }

    async fn dispatch_action(&self, envelope: &RequestEnvelope) -> Result<Value> {
        // the host handler always learns the true caller, whatever the
        // envelope args claimed
        let mut args = match envelope.args.clone() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = ValueMap::new();
                map.insert("args".to_string(), other);
                map
            }
            None => ValueMap::new(),
        };
        args.insert("plugin".to_string(), Value::String(envelope.plugin.clone()));

        match envelope.action.as_str() {
            "db/SELECT" => {
                let table = required_table(&envelope.action, &args)?;
                let filters = match args.get("data") {
                    Some(Value::Object(map)) => Some(map.clone()),
                    _ => None,
                };
                let entries = self
                    .datastore
                    .get_entries(Some(&envelope.plugin), Some(&table), filters.as_ref())
                    .await?;
                encode(&entries)
            }
            "db/INSERT" => {
                let table = required_table(&envelope.action, &args)?;
                let data = required_data(&envelope.action, &args)?;
                let entry = self
                    .datastore
                    .insert_entry(&envelope.plugin, &table, data)
                    .await?;
                encode(&entry)
            }
            "db/UPDATE" => {
                let table = required_table(&envelope.action, &args)?;
                let data = required_data(&envelope.action, &args)?;
                let entry = self
                    .datastore
                    .update_entry(&envelope.plugin, &table, data)
                    .await?;
                encode(&entry)
            }
            "db/DELETE" => {
                let table = required_table(&envelope.action, &args)?;
                let data = required_data(&envelope.action, &args)?;
                self.datastore
                    .delete_entry(&envelope.plugin, &table, data)
                    .await?;
                Ok(Value::Null)
            }
            target => self.host.action(target, Value::Object(args)).await,
        }
    }

    async fn plugin_lock(&self, module: &str) -> Arc<Mutex<()>> {
        let mut locks = self.plugin_locks.lock().await;
        locks
            .entry(module.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Other(format!("failed to encode response: {e}")))
}

fn required_table(action: &str, args: &ValueMap) -> Result<String> {
    match args.get("table") {
        Some(Value::String(table)) => Ok(table.clone()),
        _ => Err(Error::Other(format!(
            "action '{action}' requires a 'table' argument"
        ))),
    }
}

fn required_data(action: &str, args: &ValueMap) -> Result<ValueMap> {
    match args.get("data") {
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Err(Error::Other(format!(
            "action '{action}' requires a 'data' object argument"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PackageManifest;
    use crate::policy::PatternLists;
    use crate::registry::PluginDescriptor;
    use crate::storage::Database;
    use serde_json::json;

    /// Host store that echoes back the target and args it was called with.
    struct EchoHost;

    #[async_trait]
    impl HostStore for EchoHost {
        async fn getter(&self, target: &str) -> Result<Value> {
            Ok(json!({ "getter": target }))
        }

        async fn action(&self, target: &str, args: Value) -> Result<Value> {
            Ok(json!({ "action": target, "args": args }))
        }

        async fn mutation(&self, target: &str, args: Value) -> Result<Value> {
            Ok(json!({ "mutation": target, "args": args }))
        }
    }

    /// Host store whose actions never resolve.
    struct HangingHost;

    #[async_trait]
    impl HostStore for HangingHost {
        async fn getter(&self, _target: &str) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn action(&self, _target: &str, _args: Value) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }

        async fn mutation(&self, _target: &str, _args: Value) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn descriptor(module: &str) -> PluginDescriptor {
        let manifest =
            PackageManifest::parse(&format!(r#"{{"name": "{module}", "version": "1.0.0"}}"#))
                .unwrap();
        PluginDescriptor::from_manifest(module, &format!("/plugins/{module}"), manifest)
    }

    /// Policy that additionally opens the `host/*` action surface.
    fn open_host_policy() -> AccessPolicy {
        let mut blacklist = PatternLists::new();
        let mut whitelist = PatternLists::new();
        for kind in [RequestKind::Getter, RequestKind::Action, RequestKind::Mutation] {
            blacklist.insert(kind, vec!["*".to_string()]);
        }
        whitelist.insert(
            RequestKind::Action,
            vec!["db/*".to_string(), "host/*".to_string()],
        );
        whitelist.insert(RequestKind::Getter, vec!["db/entries".to_string()]);
        whitelist.insert(RequestKind::Mutation, vec!["notification/add".to_string()]);
        AccessPolicy::new(blacklist, whitelist)
    }

    async fn bridge_with(host: Arc<dyn HostStore>, policy: AccessPolicy) -> (Bridge, RegistryStore, DataStore) {
        let db = Database::in_memory().await.expect("in-memory database");
        let registry = RegistryStore::new(&db);
        let datastore = DataStore::new(&db);
        let bridge = Bridge::new(registry.clone(), datastore.clone(), host).with_policy(policy);
        (bridge, registry, datastore)
    }

    /// Register, enable and start `@acme/foo` with the given grants.
    async fn started_plugin(registry: &RegistryStore, bridge: &Bridge, grants: &[&str]) {
        registry
            .reconcile(vec![descriptor("@acme/foo")])
            .await
            .unwrap();
        registry.enable("@acme/foo").await.unwrap();
        for target in grants {
            registry.grant("@acme/foo", target).await.unwrap();
        }
        bridge.start_plugin("@acme/foo").await.unwrap();
    }

    fn request(plugin: &str, kind: RequestKind, action: &str, args: Option<Value>) -> RequestEnvelope {
        RequestEnvelope {
            request_id: None,
            plugin: plugin.to_string(),
            kind,
            action: action.to_string(),
            args,
        }
    }

    #[tokio::test]
    async fn gate_order_started_before_grants() {
        let (bridge, registry, _) = bridge_with(Arc::new(EchoHost), open_host_policy()).await;

        // two enabled plugins with full grants; only @acme/foo is started
        registry
            .reconcile(vec![descriptor("@acme/foo"), descriptor("@acme/bar")])
            .await
            .unwrap();
        registry.enable("@acme/foo").await.unwrap();
        registry.enable("@acme/bar").await.unwrap();
        registry.grant("@acme/bar", "db/SELECT").await.unwrap();
        bridge.start_plugin("@acme/foo").await.unwrap();
        assert_eq!(bridge.active_plugin().await.as_deref(), Some("@acme/foo"));

        let response = bridge
            .handle(request(
                "@acme/bar",
                RequestKind::Action,
                "db/SELECT",
                Some(json!({ "table": "notes" })),
            ))
            .await;

        // gate (a) fires even though the grant (gate c) would pass
        assert!(!response.succeeded());
        let error = response.error.expect("request should be denied");
        assert!(error.contains("E200"), "got {error}");

        // stopping the active plugin closes the bridge for everyone
        bridge.stop_plugin().await;
        assert_eq!(bridge.active_plugin().await, None);
        let response = bridge
            .handle(request("@acme/foo", RequestKind::Getter, "db/entries", None))
            .await;
        assert!(response.error.expect("no started plugin").contains("E200"));
    }

    #[tokio::test]
    async fn gate_requires_enabled_status() {
        let (bridge, registry, _) = bridge_with(Arc::new(EchoHost), open_host_policy()).await;

        registry
            .reconcile(vec![descriptor("@acme/foo")])
            .await
            .unwrap();
        registry.grant("@acme/foo", "db/SELECT").await.unwrap();
        // started but never enabled
        bridge.start_plugin("@acme/foo").await.unwrap();

        let response = bridge
            .handle(request(
                "@acme/foo",
                RequestKind::Action,
                "db/SELECT",
                Some(json!({ "table": "notes" })),
            ))
            .await;

        let error = response.error.expect("request should be denied");
        assert!(error.contains("E201"), "got {error}");
    }

    #[tokio::test]
    async fn gate_requires_exact_grant() {
        let (bridge, registry, _) = bridge_with(Arc::new(EchoHost), open_host_policy()).await;
        started_plugin(&registry, &bridge, &["db/INSERT"]).await;

        let response = bridge
            .handle(request(
                "@acme/foo",
                RequestKind::Action,
                "db/SELECT",
                Some(json!({ "table": "notes" })),
            ))
            .await;

        let error = response.error.expect("request should be denied");
        assert!(error.contains("E202"), "got {error}");
    }

    #[tokio::test]
    async fn policy_denies_after_gates() {
        let (bridge, registry, _) = bridge_with(Arc::new(EchoHost), AccessPolicy::default()).await;
        started_plugin(&registry, &bridge, &["account/currentAccount"]).await;

        let response = bridge
            .handle(request(
                "@acme/foo",
                RequestKind::Getter,
                "account/currentAccount",
                None,
            ))
            .await;

        // the grant exists, but the default policy never exposes host state
        let error = response.error.expect("request should be denied");
        assert!(error.contains("E203"), "got {error}");
    }

    #[tokio::test]
    async fn db_insert_select_round_trip() {
        let (bridge, registry, datastore) =
            bridge_with(Arc::new(EchoHost), AccessPolicy::default()).await;
        started_plugin(&registry, &bridge, &["db/INSERT", "db/SELECT"]).await;
        datastore
            .create_table("@acme/foo", "notes", "id")
            .await
            .unwrap();

        let inserted = bridge
            .handle(request(
                "@acme/foo",
                RequestKind::Action,
                "db/INSERT",
                Some(json!({ "table": "notes", "data": { "id": "1", "text": "hi" } })),
            ))
            .await;
        assert!(inserted.error.is_none(), "insert failed: {:?}", inserted.error);

        let selected = bridge
            .handle(request(
                "@acme/foo",
                RequestKind::Action,
                "db/SELECT",
                Some(json!({ "table": "notes" })),
            ))
            .await;

        let rows = selected.response.expect("select should return rows");
        let rows = rows.as_array().expect("rows should be an array");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["values"]["text"], json!("hi"));
    }

    #[tokio::test]
    async fn db_errors_surface_as_structured_responses() {
        let (bridge, registry, _) = bridge_with(Arc::new(EchoHost), AccessPolicy::default()).await;
        started_plugin(&registry, &bridge, &["db/INSERT"]).await;

        // no table was ever created
        let response = bridge
            .handle(request(
                "@acme/foo",
                RequestKind::Action,
                "db/INSERT",
                Some(json!({ "table": "notes", "data": { "id": "1" } })),
            ))
            .await;

        let error = response.error.expect("insert should fail");
        assert!(error.contains("E002"), "got {error}");
    }

    #[tokio::test]
    async fn action_args_carry_authenticated_caller() {
        let (bridge, registry, _) = bridge_with(Arc::new(EchoHost), open_host_policy()).await;
        started_plugin(&registry, &bridge, &["host/echo"]).await;

        // the envelope claims to be someone else in its args
        let response = bridge
            .handle(request(
                "@acme/foo",
                RequestKind::Action,
                "host/echo",
                Some(json!({ "plugin": "@evil/impostor", "payload": 7 })),
            ))
            .await;

        let value = response.response.expect("action should succeed");
        assert_eq!(value["args"]["plugin"], json!("@acme/foo"));
        assert_eq!(value["args"]["payload"], json!(7));
    }

    #[tokio::test]
    async fn unresponsive_host_action_times_out() {
        let (bridge, registry, _) = bridge_with(Arc::new(HangingHost), open_host_policy()).await;
        let bridge = bridge.with_timeout(Duration::from_millis(50));
        started_plugin(&registry, &bridge, &["host/forever"]).await;

        let response = bridge
            .handle(request("@acme/foo", RequestKind::Action, "host/forever", None))
            .await;

        let error = response.error.expect("request should time out");
        assert!(error.contains("E600"), "got {error}");
    }

    #[tokio::test]
    async fn request_id_is_assigned_and_echoed() {
        let (bridge, registry, _) = bridge_with(Arc::new(EchoHost), open_host_policy()).await;
        started_plugin(&registry, &bridge, &["db/entries"]).await;

        let supplied = Uuid::new_v4();
        let mut envelope = request("@acme/foo", RequestKind::Getter, "db/entries", None);
        envelope.request_id = Some(supplied);

        let response = bridge.handle(envelope).await;
        assert_eq!(response.request_id, supplied);

        let response = bridge
            .handle(request("@acme/foo", RequestKind::Getter, "db/entries", None))
            .await;
        assert_ne!(response.request_id, Uuid::nil());
    }

    #[tokio::test]
    async fn serve_pairs_requests_with_responses() {
        let (bridge, registry, _) = bridge_with(Arc::new(EchoHost), open_host_policy()).await;
        started_plugin(&registry, &bridge, &["notification/add"]).await;

        let (tx, rx) = mpsc::channel(8);
        let server = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.serve(rx).await })
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send((
            request(
                "@acme/foo",
                RequestKind::Mutation,
                "notification/add",
                Some(json!({ "level": "info" })),
            ),
            reply_tx,
        ))
        .await
        .expect("bridge should accept requests");

        let response = reply_rx.await.expect("response should arrive");
        assert!(response.error.is_none(), "got {:?}", response.error);
        assert_eq!(
            response.response.unwrap()["mutation"],
            json!("notification/add")
        );

        drop(tx);
        server.await.unwrap();
    }
}
