//! `Hooks`: translates the five broker lifecycle callbacks into calls on
//! `AuthService`, `BridgeManager` and `Engine`. Every method here must be
//! safe to call concurrently from many connection-handling contexts at
//! once — the broker library invokes these from wherever it schedules
//! client I/O, not from a single dispatcher thread.

use std::sync::Arc;

use embermq_auth::{Action, AuthService};
use embermq_bridge::{BridgeManager, LocalPublish};
use embermq_script::{Engine, ScriptEvent, TriggerType};
use tracing::warn;

use crate::repository::ClientRepository;

pub struct Hooks {
    auth: Arc<AuthService>,
    bridges: Arc<BridgeManager>,
    engine: Arc<Engine>,
    clients: Arc<dyn ClientRepository>,
}

impl Hooks {
    pub fn new(
        auth: Arc<AuthService>,
        bridges: Arc<BridgeManager>,
        engine: Arc<Engine>,
        clients: Arc<dyn ClientRepository>,
    ) -> Arc<Self> {
        Arc::new(Self {
            auth,
            bridges,
            engine,
            clients,
        })
    }

    /// `false` tells the broker to reject the CONNECT outright.
    pub async fn on_connect_authenticate(&self, username: &str, password: &str) -> bool {
        metrics::counter!("embermq_auth_attempts_total").increment(1);
        let ok = self.auth.authenticate(username, password).await.is_some();
        if !ok {
            metrics::counter!("embermq_auth_failures_total").increment(1);
        }
        ok
    }

    /// `write = true` for publish, `false` for subscribe.
    pub async fn on_acl_check(&self, username: &str, topic: &str, write: bool) -> bool {
        let action = if write { Action::Pub } else { Action::Sub };
        let allowed = self.auth.check_acl(username, topic, action).await;
        if !allowed {
            metrics::counter!("embermq_acl_denials_total").increment(1);
        }
        allowed
    }

    pub async fn on_connect(&self, client_id: &str, username: &str, clean_session: bool) {
        if let Err(e) = self.clients.upsert_active(client_id, username).await {
            warn!(client_id, error = %e, "hooks: failed to upsert client record on connect");
        }
        metrics::gauge!("embermq_connected_clients").increment(1.0);

        self.engine.dispatch(
            TriggerType::OnConnect,
            ScriptEvent {
                event_type: TriggerType::OnConnect,
                topic: String::new(),
                payload: String::new(),
                client_id: client_id.to_string(),
                username: username.to_string(),
                qos: 0,
                retain: false,
                clean_session,
                error: None,
            },
        );
    }

    pub async fn on_disconnect(&self, client_id: &str, username: &str, error: Option<String>) {
        if let Err(e) = self.clients.mark_inactive(client_id).await {
            warn!(client_id, error = %e, "hooks: failed to mark client inactive on disconnect");
        }
        metrics::gauge!("embermq_connected_clients").decrement(1.0);

        self.engine.dispatch(
            TriggerType::OnDisconnect,
            ScriptEvent {
                event_type: TriggerType::OnDisconnect,
                topic: String::new(),
                payload: String::new(),
                client_id: client_id.to_string(),
                username: username.to_string(),
                qos: 0,
                retain: false,
                clean_session: false,
                error,
            },
        );
    }

    /// The broker's contract is "no mutation": the subscribe packet is
    /// returned unchanged by the caller; this only dispatches to the
    /// engine for `on_subscribe` scripts, once per subscribed filter.
    pub async fn on_subscribe(&self, client_id: &str, username: &str, filters: &[(String, u8)]) {
        for (filter, qos) in filters {
            self.engine.dispatch(
                TriggerType::OnSubscribe,
                ScriptEvent {
                    event_type: TriggerType::OnSubscribe,
                    topic: filter.clone(),
                    payload: String::new(),
                    client_id: client_id.to_string(),
                    username: username.to_string(),
                    qos: *qos,
                    retain: false,
                    clean_session: false,
                    error: None,
                },
            );
        }
    }

    /// Same no-mutation contract as `on_subscribe`. Fans out to the script
    /// engine and to the bridge manager's outbound path; neither suspends
    /// on network I/O from this call's point of view (engine dispatch is
    /// a bounded-queue enqueue, bridge fan-out takes a read lock and a
    /// non-blocking channel send per bridge).
    pub async fn on_publish(
        &self,
        client_id: &str,
        username: &str,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) {
        self.engine.dispatch(
            TriggerType::OnPublish,
            ScriptEvent {
                event_type: TriggerType::OnPublish,
                topic: topic.to_string(),
                payload: String::from_utf8_lossy(payload).to_string(),
                client_id: client_id.to_string(),
                username: username.to_string(),
                qos,
                retain,
                clean_session: false,
                error: None,
            },
        );

        self.bridges
            .handle_local_publish(&LocalPublish {
                topic: topic.to_string(),
                payload: bytes::Bytes::copy_from_slice(payload),
                qos,
                retain,
                origin_client_id: client_id.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use embermq_auth::{AuthCache, AuthRepository, MqttCredential};
    use embermq_bridge::LocalPublisher;
    use embermq_script::{DirectStateStore, PublishSink, ScriptCache, ScriptLog, ScriptLogRepository, ScriptRepository};
    use std::sync::Mutex;
    use std::time::Duration;

    struct NullAuthRepo;
    #[async_trait]
    impl AuthRepository for NullAuthRepo {
        async fn credential_by_username(
            &self,
            _username: &str,
        ) -> embermq_auth::Result<Option<MqttCredential>> {
            Ok(None)
        }
        async fn credential_by_id(
            &self,
            _credential_id: &str,
        ) -> embermq_auth::Result<Option<MqttCredential>> {
            Ok(None)
        }
        async fn acl_rules_for_credential(
            &self,
            _credential_id: &str,
        ) -> embermq_auth::Result<Vec<embermq_auth::AclRule>> {
            Ok(vec![])
        }
    }

    struct NullLocalPublisher;
    #[async_trait]
    impl LocalPublisher for NullLocalPublisher {
        async fn publish_local(&self, _inline_client_id: &str, _topic: &str, _payload: bytes::Bytes, _qos: u8, _retain: bool) {}
    }

    struct NullPublishSink;
    #[async_trait]
    impl PublishSink for NullPublishSink {
        async fn inject_publish(&self, _topic: &str, _payload: Vec<u8>, _qos: u8, _retain: bool) {}
    }

    struct NullScriptRepo;
    #[async_trait]
    impl ScriptRepository for NullScriptRepo {
        async fn load_enabled_scripts(&self) -> embermq_script::Result<Vec<embermq_script::Script>> {
            Ok(vec![])
        }
    }

    struct NullLogRepo;
    #[async_trait]
    impl ScriptLogRepository for NullLogRepo {
        async fn append(&self, _log: ScriptLog) -> embermq_script::Result<()> {
            Ok(())
        }

        async fn prune_older_than(&self, _cutoff: chrono::DateTime<chrono::Utc>) -> embermq_script::Result<()> {
            Ok(())
        }
    }

    struct RecordingClientRepo {
        active: Mutex<Vec<String>>,
    }
    #[async_trait]
    impl ClientRepository for RecordingClientRepo {
        async fn upsert_active(&self, client_id: &str, _username: &str) -> crate::repository::Result<()> {
            self.active.lock().unwrap().push(client_id.to_string());
            Ok(())
        }
        async fn mark_inactive(&self, client_id: &str) -> crate::repository::Result<()> {
            self.active.lock().unwrap().retain(|c| c != client_id);
            Ok(())
        }
    }

    fn sample_hooks() -> Arc<Hooks> {
        let auth = Arc::new(AuthService::new(
            AuthCache::new(Duration::from_secs(60)),
            Arc::new(NullAuthRepo),
            false,
        ));
        let bridges = Arc::new(BridgeManager::new(Arc::new(NullLocalPublisher)));
        let cache = Arc::new(ScriptCache::new(Arc::new(NullScriptRepo)));
        let store: Arc<dyn embermq_script::StateStore> =
            Arc::new(DirectStateStore::new(Arc::new(embermq_kv::MemoryStore::new())));
        let engine = Engine::new(cache, store, Arc::new(NullPublishSink), Arc::new(NullLogRepo));
        let clients = Arc::new(RecordingClientRepo {
            active: Mutex::new(vec![]),
        });
        Hooks::new(auth, bridges, engine, clients)
    }

    #[tokio::test]
    async fn acl_disabled_allows_everything() {
        let hooks = sample_hooks();
        assert!(hooks.on_acl_check("anyone", "any/topic", true).await);
    }

    #[tokio::test]
    async fn connect_and_disconnect_do_not_panic_and_never_block() {
        let hooks = sample_hooks();
        hooks.on_connect("c1", "alice", true).await;
        hooks.on_publish("c1", "alice", "t/x", b"payload", 0, false).await;
        hooks.on_subscribe("c1", "alice", &[("t/+".to_string(), 0)]).await;
        hooks.on_disconnect("c1", "alice", None).await;
    }
}
