//! Dispatches one decoded action-protocol request to the right core
//! collaborator and renders the JSON reply envelope (spec.md §4.1/§7).
//!
//! `get` renders its datapoint stringified by default
//! (`as_string = true`): a quoted `"2345.0"` is what the protocol's own
//! worked example expects back from a prior `set "2345.0"`, even though
//! `TreeStore::get_signal` itself defaults to typed JSON. Wire-level
//! callers that want typed JSON back can still ask `TreeStore` directly
//! with `as_string = false`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::access::AccessChecker;
use crate::channel::Channel;
use crate::error::Error;
use crate::interfaces::{ConnectionSink, Publisher};
use crate::path::PathAddress;
use crate::subscription::SubscriptionEngine;
use crate::token::TokenVerifier;
use crate::tree::node::Attribute;
use crate::tree::TreeStore;
use crate::validator::{Action, RequestValidator};

/// One client-visible `subscribe` call may fan out to several leaves
/// (wildcard expansion); the group is what `unsubscribe` and connection
/// teardown actually act on, while each leaf still gets its own entry in
/// `SubscriptionEngine`'s registry.
struct SubscriptionGroup {
    channel_id: u64,
    internal_ids: Vec<Uuid>,
    forwarders: Vec<JoinHandle<()>>,
}

pub struct RequestProcessor {
    tree: Arc<TreeStore>,
    validator: RequestValidator,
    tokens: TokenVerifier,
    subscriptions: SubscriptionEngine,
    publisher: Arc<dyn Publisher>,
    sink: Arc<dyn ConnectionSink>,
    groups: Mutex<HashMap<Uuid, SubscriptionGroup>>,
}

impl RequestProcessor {
    #[must_use]
    pub fn new(
        tree: Arc<TreeStore>,
        tokens: TokenVerifier,
        subscriptions: SubscriptionEngine,
        publisher: Arc<dyn Publisher>,
        sink: Arc<dyn ConnectionSink>,
    ) -> Self {
        Self {
            tree,
            validator: RequestValidator::new(),
            tokens,
            subscriptions,
            publisher,
            sink,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Tear down every subscription a connection owns, e.g. on transport
    /// disconnect (spec.md §5: "channel teardown triggers
    /// `unsubscribe_all`").
    pub async fn forget_connection(&self, connection_id: u64) {
        self.subscriptions.unsubscribe_all(connection_id).await;
        let mut groups = self.groups.lock().await;
        let stale: Vec<Uuid> = groups
            .iter()
            .filter(|(_, g)| g.channel_id == connection_id)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(group) = groups.remove(&id) {
                for handle in group.forwarders {
                    handle.abort();
                }
            }
        }
    }

    /// Handle one request body and render its reply. Never panics on
    /// malformed input; every failure path still produces a JSON error
    /// envelope carrying whatever `requestId` could be recovered.
    pub async fn process_query(
        &self,
        connection_id: u64,
        channel: &Arc<RwLock<Channel>>,
        body_json: &str,
    ) -> String {
        let body: serde_json::Value = match serde_json::from_str(body_json) {
            Ok(v) => v,
            Err(e) => return error_envelope(None, &Error::MalformedRequest(e.to_string())),
        };
        let request_id = RequestValidator::try_extract_request_id(&body);

        let action = match self.validator.validate(&body) {
            Ok(a) => a,
            Err(e) => return error_envelope(request_id.as_deref(), &e.into()),
        };

        let result = self.dispatch(connection_id, channel, action, &body).await;
        match result {
            Ok(reply) => reply,
            Err(e) => error_envelope(request_id.as_deref(), &e),
        }
    }

    async fn dispatch(
        &self,
        connection_id: u64,
        channel: &Arc<RwLock<Channel>>,
        action: Action,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        let request_id = body
            .get("requestId")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        match action {
            Action::Authorize => self.handle_authorize(channel, request_id, body).await,
            Action::Get => self.handle_get(channel, request_id, body).await,
            Action::Set => self.handle_set(channel, request_id, body).await,
            Action::Subscribe => {
                self.handle_subscribe(connection_id, channel, request_id, body)
                    .await
            }
            Action::Unsubscribe => self.handle_unsubscribe(request_id, body).await,
            Action::GetMetaData => self.handle_get_metadata(channel, request_id, body).await,
            Action::UpdateMetaData => {
                self.handle_update_metadata(channel, request_id, body).await
            }
            Action::UpdateVssTree => self.handle_update_tree(channel, request_id, body).await,
        }
    }

    async fn handle_authorize(
        &self,
        channel: &Arc<RwLock<Channel>>,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        let token = body.get("tokens").and_then(|v| v.as_str()).unwrap_or("");
        let claims = self.tokens.verify(token)?;
        let ttl = claims.expiry.timestamp();
        channel.write().await.apply_claims(claims, &self.tree).await;
        let mut fields = serde_json::Map::new();
        fields.insert("TTL".into(), json!(ttl));
        Ok(success_envelope("authorize", request_id, fields))
    }

    async fn handle_get(
        &self,
        channel: &Arc<RwLock<Channel>>,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        let path_str = body.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let as_string = body
            .get("valueInString")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);
        let pattern = PathAddress::from_auto(path_str)?;
        let leaves = self.tree.expand_leaves(&pattern).await?;
        if leaves.is_empty() {
            return Err(Error::Tree(crate::error::TreeError::PathNotFound(
                pattern.as_origin_form(),
            )));
        }

        // Wildcard requests filter per leaf rather than fail on the first
        // denial: a leaf the token does not cover is silently dropped,
        // and only a request left with nothing readable is `Forbidden`
        // (spec.md §4.3).
        let guard = channel.read().await;
        let readable: Vec<PathAddress> = leaves
            .into_iter()
            .filter(|leaf| AccessChecker::check_read(&guard, leaf).is_ok())
            .collect();
        drop(guard);
        if readable.is_empty() {
            return Err(Error::Access(crate::error::AccessError::ReadDenied(
                pattern.as_origin_form(),
            )));
        }
        let leaves = readable;

        let mut fields = serde_json::Map::new();
        if leaves.len() == 1 {
            let dp = self
                .tree
                .get_signal(&leaves[0], Attribute::Value, as_string)
                .await?;
            fields.insert("path".into(), json!(leaves[0].as_origin_form()));
            fields.insert("dp".into(), json!({ "value": dp.value, "ts": dp.ts }));
        } else {
            let mut data = Vec::with_capacity(leaves.len());
            for leaf in &leaves {
                let dp = self.tree.get_signal(leaf, Attribute::Value, as_string).await?;
                data.push(json!({
                    "path": leaf.as_origin_form(),
                    "dp": { "value": dp.value, "ts": dp.ts },
                }));
            }
            fields.insert("data".into(), serde_json::Value::Array(data));
        }
        Ok(success_envelope("get", request_id, fields))
    }

    async fn handle_set(
        &self,
        channel: &Arc<RwLock<Channel>>,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        let path_str = body.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let path = PathAddress::from_auto(path_str)?;
        if !path.is_concrete() {
            return Err(Error::MalformedRequest(
                "set does not accept a wildcard path".to_owned(),
            ));
        }
        let value = body.get("value").cloned().unwrap_or(serde_json::Value::Null);

        {
            let guard = channel.read().await;
            AccessChecker::check_write(&guard, &path)?;
        }

        let dp = self
            .tree
            .set_signal(&path, Attribute::Value, &value)
            .await?;
        self.publisher
            .send_path_value(&path, Attribute::Value, &dp)
            .await;
        self.subscriptions
            .publish_change(path, Attribute::Value, dp)
            .await;

        Ok(success_envelope("set", request_id, serde_json::Map::new()))
    }

    async fn handle_subscribe(
        &self,
        connection_id: u64,
        channel: &Arc<RwLock<Channel>>,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        let path_str = body.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let pattern = PathAddress::from_auto(path_str)?;
        let leaves = self.tree.expand_leaves(&pattern).await?;
        if leaves.is_empty() {
            return Err(Error::Tree(crate::error::TreeError::PathNotFound(
                pattern.as_origin_form(),
            )));
        }

        {
            let guard = channel.read().await;
            for leaf in &leaves {
                AccessChecker::check_subscribe(&guard, leaf)?;
            }
        }

        let mut internal_ids = Vec::with_capacity(leaves.len());
        let mut forwarders = Vec::with_capacity(leaves.len());
        let group_id = Uuid::new_v4();

        for leaf in leaves {
            let (internal_id, mut rx) = self
                .subscriptions
                .subscribe(connection_id, channel.clone(), leaf, Attribute::Value)
                .await;
            internal_ids.push(internal_id);
            let sink = self.sink.clone();
            forwarders.push(tokio::spawn(async move {
                while let Some(notification) = rx.recv().await {
                    let message = json!({
                        "action": "subscribe",
                        "subscriptionId": group_id.to_string(),
                        "ts": chrono::Utc::now(),
                        "value": {
                            "path": notification.path.as_origin_form(),
                            "dp": { "value": notification.datapoint.value, "ts": notification.datapoint.ts },
                        },
                    })
                    .to_string();
                    sink.send_to_connection(connection_id, message).await;
                }
            }));
        }

        self.groups.lock().await.insert(
            group_id,
            SubscriptionGroup {
                channel_id: connection_id,
                internal_ids,
                forwarders,
            },
        );

        let mut fields = serde_json::Map::new();
        fields.insert("subscriptionId".into(), json!(group_id.to_string()));
        Ok(success_envelope("subscribe", request_id, fields))
    }

    async fn handle_unsubscribe(
        &self,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        let group_id = body
            .get("subscriptionId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| Error::MalformedRequest("missing or invalid subscriptionId".to_owned()))?;

        let group = self
            .groups
            .lock()
            .await
            .remove(&group_id)
            .ok_or(crate::error::SubscriptionError::NotFound)?;
        for id in group.internal_ids {
            let _ = self.subscriptions.unsubscribe(id).await;
        }
        for handle in group.forwarders {
            handle.abort();
        }

        Ok(success_envelope(
            "unsubscribe",
            request_id,
            serde_json::Map::new(),
        ))
    }

    async fn handle_get_metadata(
        &self,
        channel: &Arc<RwLock<Channel>>,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        let path_str = body.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let path = PathAddress::from_auto(path_str)?;
        {
            let guard = channel.read().await;
            AccessChecker::check_read(&guard, &path)?;
        }
        let metadata = self.tree.get_metadata(&path).await?;
        let mut fields = serde_json::Map::new();
        fields.insert("metadata".into(), metadata);
        Ok(success_envelope("getMetaData", request_id, fields))
    }

    async fn handle_update_metadata(
        &self,
        channel: &Arc<RwLock<Channel>>,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        let path_str = body.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let path = PathAddress::from_auto(path_str)?;
        let metadata = body
            .get("metadata")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let guard = channel.read().await;
        self.tree.update_metadata(&guard, &path, &metadata).await?;
        Ok(success_envelope(
            "updateMetaData",
            request_id,
            serde_json::Map::new(),
        ))
    }

    async fn handle_update_tree(
        &self,
        channel: &Arc<RwLock<Channel>>,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        let tree_json = body
            .get("tree")
            .map(serde_json::Value::to_string)
            .unwrap_or_default();
        let guard = channel.read().await;
        self.tree.update_tree(&guard, &tree_json).await?;
        Ok(success_envelope(
            "updateVSSTree",
            request_id,
            serde_json::Map::new(),
        ))
    }
}

fn success_envelope(
    action: &str,
    request_id: &str,
    mut fields: serde_json::Map<String, serde_json::Value>,
) -> String {
    fields.insert("action".into(), json!(action));
    fields.insert("requestId".into(), json!(request_id));
    fields.insert("ts".into(), json!(chrono::Utc::now()));
    serde_json::Value::Object(fields).to_string()
}

fn error_envelope(request_id: Option<&str>, error: &Error) -> String {
    json!({
        "action": "error",
        "requestId": request_id.unwrap_or(""),
        "ts": chrono::Utc::now(),
        "error": {
            "number": error.number(),
            "reason": error.reason(),
            "message": error.message(),
        },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Transport;
    use crate::tree::load::{into_runtime, parse_document};

    struct NullSink;
    #[async_trait::async_trait]
    impl ConnectionSink for NullSink {
        async fn send_to_connection(&self, _connection_id: u64, _message: String) {}
    }

    fn sample_tree() -> Arc<TreeStore> {
        let doc = r#"{
            "Vehicle": {
                "type": "branch",
                "uuid": "root",
                "children": {
                    "Speed": { "type": "sensor", "datatype": "float", "uuid": "speed" }
                }
            }
        }"#;
        let (name, raw) = parse_document(doc).unwrap();
        let root = into_runtime(raw).unwrap();
        Arc::new(TreeStore::from_parts(name, root))
    }

    fn processor() -> RequestProcessor {
        RequestProcessor::new(
            sample_tree(),
            crate::token::TokenVerifier::for_testing(),
            SubscriptionEngine::spawn(),
            Arc::new(crate::interfaces::NoopPublisher),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn malformed_json_yields_error_envelope() {
        let p = processor();
        let channel = Arc::new(RwLock::new(Channel::new(1, Transport::Ws)));
        let reply = p.process_query(1, &channel, "not json").await;
        let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["action"], "error");
        assert_eq!(parsed["error"]["number"], "400");
    }

    #[tokio::test]
    async fn get_without_prior_authorize_is_denied() {
        let p = processor();
        let channel = Arc::new(RwLock::new(Channel::new(1, Transport::Ws)));
        let body = json!({"action": "get", "requestId": "1", "path": "Vehicle.Speed"}).to_string();
        let reply = p.process_query(1, &channel, &body).await;
        let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["action"], "error");
        assert_eq!(parsed["error"]["number"], "403");
    }

    #[tokio::test]
    async fn get_on_unknown_path_is_not_found() {
        let p = processor();
        let mut channel = Channel::new(1, Transport::Ws);
        channel.authorized = true;
        channel.token_expiry = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        channel
            .scope
            .insert("Vehicle.*".to_owned(), crate::channel::Permission::parse("r"));
        let channel = Arc::new(RwLock::new(channel));
        let body = json!({"action": "get", "requestId": "1", "path": "Vehicle.Nope"}).to_string();
        let reply = p.process_query(1, &channel, &body).await;
        let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["action"], "error");
        assert_eq!(parsed["error"]["number"], "404");
    }
}
