//! `Engine`: fans broker events out to matching scripts, detects
//! self-triggering, and persists execution logs. Dispatch is fire-and-
//! forget from the caller's point of view — Hooks must never block on
//! script execution.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::cache::ScriptCache;
use crate::error::Result;
use crate::fingerprint::FingerprintTable;
use crate::repository::ScriptLogRepository;
use crate::runtime::{ExecutionDeps, PublishSink, Runtime};
use crate::state_store::StateStore;
use crate::types::{ScriptEvent, ScriptLog, TriggerType};

const DEFAULT_QUEUE_DEPTH: usize = 4096;
const DEFAULT_WORKERS: usize = 8;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_PUBLISHES: u32 = 100;
const FINGERPRINT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// The client id the script engine uses as the origin of every publish it
/// injects. Matching `client_id == "inline"` is the self-trigger oracle
/// Hooks and `Engine::dispatch` both rely on.
pub const INLINE_CLIENT_ID: &str = "inline";

struct DispatchJob {
    trigger_type: TriggerType,
    event: ScriptEvent,
}

pub struct Engine {
    cache: Arc<ScriptCache>,
    state_store: Arc<dyn StateStore>,
    publish_sink: Arc<dyn PublishSink>,
    log_repository: Arc<dyn ScriptLogRepository>,
    fingerprints: Arc<FingerprintTable>,
    default_timeout: Duration,
    default_max_publishes: u32,
    queue_tx: mpsc::Sender<DispatchJob>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<ScriptCache>,
        state_store: Arc<dyn StateStore>,
        publish_sink: Arc<dyn PublishSink>,
        log_repository: Arc<dyn ScriptLogRepository>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        let engine = Arc::new(Self {
            cache,
            state_store,
            publish_sink,
            log_repository,
            fingerprints: Arc::new(FingerprintTable::default()),
            default_timeout: DEFAULT_TIMEOUT,
            default_max_publishes: DEFAULT_MAX_PUBLISHES,
            queue_tx,
        });
        engine.clone().spawn_workers(queue_rx);
        engine.clone().spawn_fingerprint_sweeper();
        engine
    }

    /// Loads the script cache. The state store's own background tasks (if
    /// any) are started by its owner before this is called.
    pub async fn start(&self) -> Result<()> {
        self.cache.load().await
    }

    /// Prunes script log entries older than `retention`. Retention window
    /// and schedule are an operator concern; this is a plain method rather
    /// than a spawned task so the binary wiring the engine decides how
    /// often to call it.
    pub async fn prune_logs(&self, retention: Duration) -> Result<()> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        self.log_repository.prune_older_than(cutoff).await
    }

    /// Re-reads enabled scripts/triggers. Called by the admin layer after
    /// any script or trigger mutation.
    pub async fn reload_scripts(&self) -> Result<()> {
        self.cache.reload().await
    }

    fn spawn_workers(self: Arc<Self>, queue_rx: mpsc::Receiver<DispatchJob>) {
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for _ in 0..DEFAULT_WORKERS {
            let engine = self.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = queue_rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => engine.run_dispatch(job).await,
                        None => break,
                    }
                }
            });
        }
    }

    fn spawn_fingerprint_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(FINGERPRINT_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                self.fingerprints.sweep();
            }
        });
    }

    /// Enqueues every script matching `(trigger_type, event.topic)` for
    /// execution. Returns immediately; a full queue drops the event with a
    /// logged warning and an incremented counter rather than blocking the
    /// broker's I/O path — scripts are best-effort, message delivery is not.
    pub fn dispatch(&self, trigger_type: TriggerType, event: ScriptEvent) {
        let job = DispatchJob { trigger_type, event };
        if self.queue_tx.try_send(job).is_err() {
            metrics::counter!("embermq_script_dispatch_dropped_total").increment(1);
            warn!(?trigger_type, "script engine: dispatch queue full, dropping event");
        }
    }

    async fn run_dispatch(&self, job: DispatchJob) {
        let candidates = self.cache.get_for_trigger(job.trigger_type, &job.event.topic);
        if candidates.is_empty() {
            return;
        }

        for indexed in candidates {
            // Self-trigger suppression: an inline-originated publish whose
            // fingerprint matches this script means this script caused it.
            // Skip dispatching it back to itself; other matching scripts
            // still run normally, which is what makes chaining work.
            if job.trigger_type == TriggerType::OnPublish && job.event.client_id == INLINE_CLIENT_ID {
                let consumed = self.fingerprints.take(
                    &indexed.script.id,
                    &job.event.topic,
                    job.event.payload.as_bytes(),
                );
                if consumed {
                    continue;
                }
            }

            let deps = ExecutionDeps {
                state_store: self.state_store.clone(),
                publish_sink: self.publish_sink.clone(),
                fingerprints: self.fingerprints.clone(),
                default_timeout: self.default_timeout,
                default_max_publishes: self.default_max_publishes,
            };
            let script = indexed.script.clone();
            let event = job.event.clone();
            let trigger_type = job.trigger_type;
            let log_repository = self.log_repository.clone();

            // Each script's execution is independent: one script's failure
            // or timeout never blocks or corrupts another's.
            tokio::spawn(async move {
                let outcome = Runtime::execute(deps, script.clone(), event.clone()).await;

                if !outcome.success {
                    metrics::counter!("embermq_script_errors_total", "script" => script.id.clone())
                        .increment(1);
                    if let Some(err) = &outcome.error {
                        error!(script = %script.id, error = %err, "script: execution failed");
                    }
                    let log = ScriptLog {
                        script_id: script.id.clone(),
                        trigger_type,
                        level: crate::types::LogLevel::Error,
                        message: outcome.error.clone().unwrap_or_default(),
                        context: serde_json::Map::new(),
                        execution_ms: outcome.duration_ms,
                        created_at: chrono::Utc::now(),
                    };
                    if let Err(e) = log_repository.append(log).await {
                        error!(script = %script.id, error = %e, "script: failed to persist failure log");
                    }
                }
                metrics::counter!("embermq_script_executions_total", "script" => script.id.clone())
                    .increment(1);

                for entry in &outcome.user_logs {
                    let log = ScriptLog {
                        script_id: script.id.clone(),
                        trigger_type,
                        level: entry.level,
                        message: entry.message.clone(),
                        context: serde_json::Map::new(),
                        execution_ms: outcome.duration_ms,
                        created_at: chrono::Utc::now(),
                    };
                    if let Err(e) = log_repository.append(log).await {
                        error!(script = %script.id, error = %e, "script: failed to persist user log");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ScriptRepository;
    use crate::state_store::DirectStateStore;
    use crate::types::{Script, Trigger};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct FixedRepository(Vec<Script>);

    #[async_trait]
    impl ScriptRepository for FixedRepository {
        async fn load_enabled_scripts(&self) -> Result<Vec<Script>> {
            Ok(self.0.clone())
        }
    }

    struct RecordingLogRepository {
        logs: Mutex<Vec<ScriptLog>>,
        notify: Notify,
    }

    #[async_trait]
    impl ScriptLogRepository for RecordingLogRepository {
        async fn append(&self, log: ScriptLog) -> Result<()> {
            self.logs.lock().unwrap().push(log);
            self.notify.notify_one();
            Ok(())
        }

        async fn prune_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<()> {
            self.logs.lock().unwrap().retain(|l| l.created_at >= cutoff);
            Ok(())
        }
    }

    struct InjectingSink {
        engine: std::sync::Mutex<Option<Arc<Engine>>>,
    }

    #[async_trait]
    impl PublishSink for InjectingSink {
        async fn inject_publish(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) {
            let engine = self.engine.lock().unwrap().clone();
            if let Some(engine) = engine {
                engine.dispatch(
                    TriggerType::OnPublish,
                    ScriptEvent {
                        event_type: TriggerType::OnPublish,
                        topic: topic.to_string(),
                        payload: String::from_utf8_lossy(&payload).to_string(),
                        client_id: INLINE_CLIENT_ID.to_string(),
                        username: "".to_string(),
                        qos,
                        retain,
                        clean_session: true,
                        error: None,
                    },
                );
            }
        }
    }

    fn trigger(topic_filter: &str) -> Trigger {
        Trigger {
            trigger_type: TriggerType::OnPublish,
            topic_filter: topic_filter.to_string(),
            priority: 0,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn scenario_d_chaining_b_sees_a_publish() {
        let script_a = Script {
            id: "A".into(),
            name: "A".into(),
            content: "mqtt.publish('topic/b', 'from_a', 0, false);".into(),
            enabled: true,
            timeout_s: Some(2),
            max_publishes: Some(5),
            triggers: vec![trigger("topic/a")],
        };
        let script_b = Script {
            id: "B".into(),
            name: "B".into(),
            content: r#"global.set("b_payload", msg.payload);"#.into(),
            enabled: true,
            timeout_s: Some(2),
            max_publishes: Some(5),
            triggers: vec![trigger("topic/b")],
        };

        let cache = Arc::new(ScriptCache::new(Arc::new(FixedRepository(vec![script_a, script_b]))));
        cache.load().await.unwrap();

        let store: Arc<dyn StateStore> =
            Arc::new(DirectStateStore::new(Arc::new(embermq_kv::memory::MemoryStore::new())));
        let log_repo = Arc::new(RecordingLogRepository {
            logs: Mutex::new(Vec::new()),
            notify: Notify::new(),
        });
        let sink = Arc::new(InjectingSink {
            engine: std::sync::Mutex::new(None),
        });

        let engine = Engine::new(cache, store.clone(), sink.clone(), log_repo.clone());
        *sink.engine.lock().unwrap() = Some(engine.clone());
        engine.start().await.unwrap();

        engine.dispatch(
            TriggerType::OnPublish,
            ScriptEvent {
                event_type: TriggerType::OnPublish,
                topic: "topic/a".into(),
                payload: "".into(),
                client_id: "external-client".into(),
                username: "alice".into(),
                qos: 0,
                retain: false,
                clean_session: true,
                error: None,
            },
        );

        // Settle: allow the fire-and-forget dispatch chain (A -> inline
        // publish -> B) to complete.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let payload = store
            .get(&crate::state_store::Scope::Global, "b_payload")
            .await
            .unwrap();
        assert_eq!(payload, Some(serde_json::json!("from_a")));
    }

    #[tokio::test]
    async fn scenario_c_self_trigger_runs_exactly_once() {
        let script_s = Script {
            id: "S".into(),
            name: "S".into(),
            content: r#"
                state.set("n", (state.get("n") || 0) + 1);
                mqtt.publish(msg.topic, msg.payload, 0, false);
            "#
            .into(),
            enabled: true,
            timeout_s: Some(2),
            max_publishes: Some(5),
            triggers: vec![trigger("test/#")],
        };

        let cache = Arc::new(ScriptCache::new(Arc::new(FixedRepository(vec![script_s]))));
        cache.load().await.unwrap();

        let store: Arc<dyn StateStore> =
            Arc::new(DirectStateStore::new(Arc::new(embermq_kv::memory::MemoryStore::new())));
        let log_repo = Arc::new(RecordingLogRepository {
            logs: Mutex::new(Vec::new()),
            notify: Notify::new(),
        });
        let sink = Arc::new(InjectingSink {
            engine: std::sync::Mutex::new(None),
        });

        let engine = Engine::new(cache, store.clone(), sink.clone(), log_repo.clone());
        *sink.engine.lock().unwrap() = Some(engine.clone());
        engine.start().await.unwrap();

        engine.dispatch(
            TriggerType::OnPublish,
            ScriptEvent {
                event_type: TriggerType::OnPublish,
                topic: "test/loop".into(),
                payload: "trigger".into(),
                client_id: "external-client".into(),
                username: "alice".into(),
                qos: 0,
                retain: false,
                clean_session: true,
                error: None,
            },
        );

        tokio::time::sleep(Duration::from_millis(300)).await;

        let n = store
            .get(&crate::state_store::Scope::Script("S".into()), "n")
            .await
            .unwrap();
        assert_eq!(n, Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn prune_logs_removes_only_entries_older_than_cutoff() {
        let log_repo = Arc::new(RecordingLogRepository {
            logs: Mutex::new(vec![
                ScriptLog {
                    script_id: "S".into(),
                    trigger_type: TriggerType::OnPublish,
                    level: crate::types::LogLevel::Info,
                    message: "old".into(),
                    context: serde_json::Map::new(),
                    execution_ms: 1,
                    created_at: chrono::Utc::now() - chrono::Duration::days(10),
                },
                ScriptLog {
                    script_id: "S".into(),
                    trigger_type: TriggerType::OnPublish,
                    level: crate::types::LogLevel::Info,
                    message: "recent".into(),
                    context: serde_json::Map::new(),
                    execution_ms: 1,
                    created_at: chrono::Utc::now(),
                },
            ]),
            notify: Notify::new(),
        });

        let cache = Arc::new(ScriptCache::new(Arc::new(FixedRepository(vec![]))));
        cache.load().await.unwrap();
        let store: Arc<dyn StateStore> =
            Arc::new(DirectStateStore::new(Arc::new(embermq_kv::memory::MemoryStore::new())));
        let sink = Arc::new(InjectingSink {
            engine: std::sync::Mutex::new(None),
        });
        let engine = Engine::new(cache, store, sink, log_repo.clone());

        engine.prune_logs(Duration::from_secs(3600)).await.unwrap();

        let remaining = log_repo.logs.lock().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "recent");
    }
}
