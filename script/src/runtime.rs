//! `Runtime`: executes one script in a fresh, isolated JS interpreter per
//! call. No state leaks between calls beyond what the host bindings write
//! back through `StateStore` / `PublishSink`.
//!
//! The interpreter itself (`boa_engine::Context`) is not `Send`, so each
//! execution runs on a dedicated blocking thread (`spawn_blocking`) rather
//! than inline on the async executor. Host bindings that need to touch
//! async state (the state store, the broker injector) block on the current
//! Tokio handle from that thread, the same way `mqtt.publish`/`state.get`
//! look synchronous from the script's point of view while the underlying
//! work is a channel send or a lock acquisition.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsError, JsNativeError, JsResult, JsValue, NativeFunction, Source};
use tracing::warn;

use crate::error::Error as ScriptError;
use crate::fingerprint::FingerprintTable;
use crate::state_store::{Scope, StateStore};
use crate::types::{LogLevel, Script, ScriptEvent};

const MIN_TIMEOUT: Duration = Duration::from_secs(1);
const INTERRUPT_GRACE: Duration = Duration::from_millis(100);
const DEFAULT_FINGERPRINT_TTL: Duration = Duration::from_secs(2);

/// Sink a script's `mqtt.publish` calls inject into, as if the broker
/// itself had received the publish from the `"inline"` client.
#[async_trait]
pub trait PublishSink: Send + Sync {
    async fn inject_publish(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool);
}

/// One `log.*` call made by the script during execution.
#[derive(Debug, Clone)]
pub struct UserLogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Result of one script execution.
pub struct ExecutionOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub user_logs: Vec<UserLogEntry>,
    pub duration_ms: u64,
}

/// Everything a single execution needs from the outside world, bundled so
/// `Engine::dispatch` can hand off one value per script run.
#[derive(Clone)]
pub struct ExecutionDeps {
    pub state_store: Arc<dyn StateStore>,
    pub publish_sink: Arc<dyn PublishSink>,
    pub fingerprints: Arc<FingerprintTable>,
    pub default_timeout: Duration,
    pub default_max_publishes: u32,
}

pub struct Runtime;

impl Runtime {
    /// Runs `script.content` against `event`, enforcing the script's own
    /// timeout (or the engine default, floored at one second) and
    /// publish quota. Never panics the caller: compile errors, thrown
    /// values, and timeouts all come back as a non-success `ExecutionOutcome`.
    pub async fn execute(deps: ExecutionDeps, script: Arc<Script>, event: ScriptEvent) -> ExecutionOutcome {
        let timeout = script
            .timeout_s
            .map(Duration::from_secs)
            .unwrap_or(deps.default_timeout)
            .max(MIN_TIMEOUT);
        let max_publishes = script.max_publishes.unwrap_or(deps.default_max_publishes);

        let interrupt = Arc::new(AtomicBool::new(false));
        let interrupt_for_timer = interrupt.clone();
        let handle = tokio::runtime::Handle::current();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let start = Instant::now();

        let script_for_vm = script.clone();
        let event_for_vm = event.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = run_vm(handle, deps, script_for_vm, event_for_vm, max_publishes, interrupt, timeout);
            let _ = tx.send(outcome);
        });

        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            interrupt_for_timer.store(true, Ordering::SeqCst);
        });

        let outcome = match tokio::time::timeout(timeout + INTERRUPT_GRACE, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => ExecutionOutcome {
                success: false,
                error: Some("script worker terminated without a result".to_string()),
                user_logs: Vec::new(),
                duration_ms: start.elapsed().as_millis() as u64,
            },
            Err(_) => {
                warn!(script = %script.id, ?timeout, "script: VM unresponsive past grace period, abandoning");
                ExecutionOutcome {
                    success: false,
                    error: Some(format!("script timed out after {timeout:?}")),
                    user_logs: Vec::new(),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        };
        timer.abort();
        outcome
    }
}

/// A failure classified at the point it occurred, inside a native binding
/// closure, before it unwinds through `boa_engine` as a generic `JsError`.
/// Set by `install_mqtt`'s validation checks; consulted once execution
/// fails so the persisted log can say which kind of failure this was
/// instead of a single undifferentiated "script failed".
#[derive(Clone, Copy)]
enum NativeFailure {
    InvalidQos(i32),
    QuotaExceeded(u32),
}

/// Runs entirely on a blocking-pool thread: builds a fresh `Context`,
/// installs the host bindings, and executes `script.content`.
fn run_vm(
    handle: tokio::runtime::Handle,
    deps: ExecutionDeps,
    script: Arc<Script>,
    event: ScriptEvent,
    max_publishes: u32,
    interrupt: Arc<AtomicBool>,
    timeout: Duration,
) -> ExecutionOutcome {
    let start = Instant::now();
    let logs: Arc<Mutex<Vec<UserLogEntry>>> = Arc::new(Mutex::new(Vec::new()));
    let publishes_done = Arc::new(AtomicU32::new(0));
    let native_failure: Arc<Mutex<Option<NativeFailure>>> = Arc::new(Mutex::new(None));

    let mut context = Context::default();

    {
        let interrupt = interrupt.clone();
        // Boa polls this closure between bytecode instructions; returning
        // an error there aborts the running script at that point, which is
        // how a timeout becomes a catchable `JsError` instead of a hang.
        context.set_interrupt_handler(Box::new(move |_ctx| {
            if interrupt.load(Ordering::SeqCst) {
                Err(JsNativeError::typ()
                    .with_message("script execution interrupted (timeout)")
                    .into())
            } else {
                Ok(())
            }
        }));
    }

    if let Err(e) = install_event(&mut context, &event) {
        let err = ScriptError::Runtime(format!("failed to install event bindings: {e}"));
        return failure(err.to_string(), logs, start);
    }
    install_log(&mut context, logs.clone());
    install_mqtt(
        &mut context,
        handle.clone(),
        deps.publish_sink.clone(),
        deps.fingerprints.clone(),
        script.id.clone(),
        max_publishes,
        publishes_done,
        native_failure.clone(),
    );
    install_kv(&mut context, handle.clone(), deps.state_store.clone(), Scope::Script(script.id.clone()), "state");
    install_kv(&mut context, handle, deps.state_store.clone(), Scope::Global, "global");

    // Compiling and executing as two steps (rather than `Context::eval`'s
    // combined parse-and-run) is what lets a syntax error and a thrown/
    // interrupted runtime error come back as distinguishable failures.
    let code_block = match context.compile(Source::from_bytes(&script.content)) {
        Ok(code_block) => code_block,
        Err(e) => {
            let err = ScriptError::Compile(describe_js_error(&e));
            return failure(err.to_string(), logs, start);
        }
    };

    match context.execute(code_block) {
        Ok(_) => {
            let user_logs = std::mem::take(&mut *logs.lock().unwrap());
            ExecutionOutcome {
                success: true,
                error: None,
                user_logs,
                duration_ms: start.elapsed().as_millis() as u64,
            }
        }
        Err(e) => {
            let err = classify_execution_failure(e, &interrupt, &native_failure, timeout);
            failure(err.to_string(), logs, start)
        }
    }
}

/// Turns a `JsError` that unwound out of `Context::execute` into the
/// classified `Error` it actually corresponds to: a quota/qos violation
/// the native `mqtt.publish` binding flagged before throwing, a timeout the
/// interrupt handler fired, or (the default) an ordinary thrown/uncaught
/// script error.
fn classify_execution_failure(
    e: JsError,
    interrupt: &AtomicBool,
    native_failure: &Mutex<Option<NativeFailure>>,
    timeout: Duration,
) -> ScriptError {
    if let Some(failure) = native_failure.lock().unwrap().take() {
        return match failure {
            NativeFailure::InvalidQos(qos) => ScriptError::InvalidQos(qos),
            NativeFailure::QuotaExceeded(max) => ScriptError::QuotaExceeded(max),
        };
    }
    if interrupt.load(Ordering::SeqCst) {
        return ScriptError::Timeout(timeout);
    }
    ScriptError::Runtime(describe_js_error(&e))
}

fn failure(message: String, logs: Arc<Mutex<Vec<UserLogEntry>>>, start: Instant) -> ExecutionOutcome {
    let user_logs = std::mem::take(&mut *logs.lock().unwrap());
    ExecutionOutcome {
        success: false,
        error: Some(message),
        user_logs,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn describe_js_error(e: &JsError) -> String {
    e.to_string()
}

/// Installs the `msg`/`event` global: a plain object populated from the
/// triggering broker event.
fn install_event(context: &mut Context, event: &ScriptEvent) -> JsResult<()> {
    let json = serde_json::to_value(event).map_err(|e| {
        JsNativeError::typ().with_message(format!("event serialization failed: {e}"))
    })?;
    let value = JsValue::from_json(&json, context)?;
    context.register_global_property("msg", value.clone(), Attribute::all())?;
    context.register_global_property("event", value, Attribute::all())?;
    Ok(())
}

/// Installs `log.{debug,info,warn,error}(...)`, each accumulating a
/// structured entry for later persistence rather than printing anywhere.
fn install_log(context: &mut Context, logs: Arc<Mutex<Vec<UserLogEntry>>>) {
    let mut builder = ObjectInitializer::new(context);
    for (name, level) in [
        ("debug", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
    ] {
        let logs = logs.clone();
        builder.function(
            NativeFunction::from_copy_closure_with_captures(
                move |_this, args, level, ctx| {
                    let message = args
                        .iter()
                        .map(|a| a.to_string(ctx).map(|s| s.to_std_string_escaped()))
                        .collect::<JsResult<Vec<_>>>()?
                        .join(" ");
                    logs.lock().unwrap().push(UserLogEntry { level: *level, message });
                    Ok(JsValue::undefined())
                },
                level,
            ),
            name,
            1,
        );
    }
    let log_obj = builder.build();
    context
        .register_global_property("log", log_obj, Attribute::all())
        .expect("log global registration cannot fail");
}

/// Installs `mqtt.publish(topic, payload, qos, retain)`: validates qos,
/// records a self-trigger fingerprint, injects the publish under the
/// `"inline"` identity, and enforces the per-script publish quota.
fn install_mqtt(
    context: &mut Context,
    handle: tokio::runtime::Handle,
    sink: Arc<dyn PublishSink>,
    fingerprints: Arc<FingerprintTable>,
    script_id: String,
    max_publishes: u32,
    published: Arc<AtomicU32>,
    native_failure: Arc<Mutex<Option<NativeFailure>>>,
) {
    let mut builder = ObjectInitializer::new(context);
    builder.function(
        NativeFunction::from_closure(move |_this, args, ctx| {
            let topic = args
                .first()
                .ok_or_else(|| JsNativeError::typ().with_message("mqtt.publish: missing topic"))?
                .to_string(ctx)?
                .to_std_string_escaped();
            let payload_val = args.get(1).cloned().unwrap_or(JsValue::undefined());
            let payload = js_value_to_payload(&payload_val, ctx)?;
            let qos = match args.get(2) {
                Some(v) if !v.is_undefined() => v.to_i32(ctx)?,
                _ => 0,
            };
            if !(0..=2).contains(&qos) {
                *native_failure.lock().unwrap() = Some(NativeFailure::InvalidQos(qos));
                return Err(JsNativeError::typ()
                    .with_message(format!("mqtt.publish: invalid qos {qos}"))
                    .into());
            }
            let retain = match args.get(3) {
                Some(v) => v.to_boolean(),
                None => false,
            };

            let n = published.fetch_add(1, Ordering::SeqCst) + 1;
            if n > max_publishes {
                *native_failure.lock().unwrap() = Some(NativeFailure::QuotaExceeded(max_publishes));
                return Err(JsNativeError::typ()
                    .with_message(format!("mqtt.publish: quota of {max_publishes} publishes exceeded"))
                    .into());
            }

            fingerprints.record(&script_id, &topic, &payload);
            let sink = sink.clone();
            let topic_for_publish = topic.clone();
            let payload_for_publish = payload.clone();
            handle.block_on(async move {
                sink.inject_publish(&topic_for_publish, payload_for_publish, qos as u8, retain).await;
            });

            Ok(JsValue::undefined())
        }),
        "publish",
        4,
    );
    let mqtt_obj = builder.build();
    context
        .register_global_property("mqtt", mqtt_obj, Attribute::all())
        .expect("mqtt global registration cannot fail");
}

/// Installs `state.{set,get,delete,keys}` or `global.{set,get,delete,keys}`
/// bound to a fixed `Scope`. Both globals share this implementation; only
/// the scope and the exposed name differ.
fn install_kv(
    context: &mut Context,
    handle: tokio::runtime::Handle,
    store: Arc<dyn StateStore>,
    scope: Scope,
    global_name: &str,
) {
    let mut builder = ObjectInitializer::new(context);

    {
        let store = store.clone();
        let scope = scope.clone();
        let handle = handle.clone();
        builder.function(
            NativeFunction::from_closure(move |_this, args, ctx| {
                let key = args
                    .first()
                    .ok_or_else(|| JsNativeError::typ().with_message("set: missing key"))?
                    .to_string(ctx)?
                    .to_std_string_escaped();
                let value_js = args.get(1).cloned().unwrap_or(JsValue::undefined());
                let value = value_js
                    .to_json(ctx)?
                    .ok_or_else(|| JsNativeError::typ().with_message("set: value must be JSON-serializable"))?;
                let ttl = args
                    .get(2)
                    .and_then(|opts| opts.as_object().cloned())
                    .and_then(|obj| obj.get("ttl", ctx).ok())
                    .filter(|v| !v.is_undefined())
                    .map(|v| v.to_number(ctx))
                    .transpose()?
                    .map(|secs| Duration::from_secs_f64(secs.max(0.0)));

                let store = store.clone();
                let scope = scope.clone();
                handle.block_on(async move { store.set(&scope, &key, value, ttl).await }).map_err(|e| {
                    JsError::from(JsNativeError::typ().with_message(format!("set: {e}")))
                })?;
                Ok(JsValue::undefined())
            }),
            "set",
            3,
        );
    }
    {
        let store = store.clone();
        let scope = scope.clone();
        let handle = handle.clone();
        builder.function(
            NativeFunction::from_closure(move |_this, args, ctx| {
                let key = args
                    .first()
                    .ok_or_else(|| JsNativeError::typ().with_message("get: missing key"))?
                    .to_string(ctx)?
                    .to_std_string_escaped();
                let store = store.clone();
                let scope = scope.clone();
                let value = handle
                    .block_on(async move { store.get(&scope, &key).await })
                    .map_err(|e| JsError::from(JsNativeError::typ().with_message(format!("get: {e}"))))?;
                match value {
                    Some(v) => JsValue::from_json(&v, ctx),
                    None => Ok(JsValue::null()),
                }
            }),
            "get",
            1,
        );
    }
    {
        let store = store.clone();
        let scope = scope.clone();
        let handle = handle.clone();
        builder.function(
            NativeFunction::from_closure(move |_this, args, ctx| {
                let key = args
                    .first()
                    .ok_or_else(|| JsNativeError::typ().with_message("delete: missing key"))?
                    .to_string(ctx)?
                    .to_std_string_escaped();
                let store = store.clone();
                let scope = scope.clone();
                handle.block_on(async move { store.delete(&scope, &key).await }).map_err(|e| {
                    JsError::from(JsNativeError::typ().with_message(format!("delete: {e}")))
                })?;
                Ok(JsValue::undefined())
            }),
            "delete",
            1,
        );
    }
    {
        let store = store.clone();
        let scope = scope.clone();
        let handle = handle.clone();
        builder.function(
            NativeFunction::from_closure(move |_this, _args, ctx| {
                let store = store.clone();
                let scope = scope.clone();
                let keys = handle
                    .block_on(async move { store.keys(&scope).await })
                    .map_err(|e| JsError::from(JsNativeError::typ().with_message(format!("keys: {e}"))))?;
                let array = boa_engine::object::builtins::JsArray::from_iter(
                    keys.into_iter().map(JsValue::from),
                    ctx,
                );
                Ok(array.into())
            }),
            "keys",
            0,
        );
    }

    let obj = builder.build();
    context
        .register_global_property(global_name, obj, Attribute::all())
        .expect("kv global registration cannot fail");
}

/// `mqtt.publish`'s payload argument may be a string or any JSON value;
/// either way it is hashed and injected as bytes.
fn js_value_to_payload(value: &JsValue, ctx: &mut Context) -> JsResult<Vec<u8>> {
    if let Some(s) = value.as_string() {
        return Ok(s.to_std_string_escaped().into_bytes());
    }
    match value.to_json(ctx)? {
        Some(json) => Ok(serde_json::to_vec(&json).unwrap_or_default()),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::DirectStateStore;
    use crate::types::TriggerType;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        published: StdMutex<Vec<(String, Vec<u8>, u8, bool)>>,
    }

    #[async_trait]
    impl PublishSink for RecordingSink {
        async fn inject_publish(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload, qos, retain));
        }
    }

    fn sample_event(topic: &str, payload: &str) -> ScriptEvent {
        ScriptEvent {
            event_type: TriggerType::OnPublish,
            topic: topic.to_string(),
            payload: payload.to_string(),
            client_id: "client-1".to_string(),
            username: "alice".to_string(),
            qos: 0,
            retain: false,
            clean_session: true,
            error: None,
        }
    }

    fn script(id: &str, content: &str) -> Arc<Script> {
        Arc::new(Script {
            id: id.to_string(),
            name: id.to_string(),
            content: content.to_string(),
            enabled: true,
            timeout_s: Some(2),
            max_publishes: Some(5),
            triggers: Vec::new(),
        })
    }

    fn deps() -> (ExecutionDeps, Arc<RecordingSink>) {
        let store: Arc<dyn StateStore> = Arc::new(DirectStateStore::new(Arc::new(
            embermq_kv::memory::MemoryStore::new(),
        )));
        let sink = Arc::new(RecordingSink {
            published: StdMutex::new(Vec::new()),
        });
        let deps = ExecutionDeps {
            state_store: store,
            publish_sink: sink.clone(),
            fingerprints: Arc::new(FingerprintTable::default()),
            default_timeout: Duration::from_secs(5),
            default_max_publishes: 100,
        };
        (deps, sink)
    }

    #[tokio::test]
    async fn scenario_c_self_trigger_state_increments_once() {
        let (deps, _sink) = deps();
        let script = script(
            "s1",
            r#"
            state.set("n", (state.get("n") || 0) + 1);
            mqtt.publish(msg.topic, msg.payload, 0, false);
            "#,
        );
        let outcome = Runtime::execute(deps.clone(), script.clone(), sample_event("test/loop", "trigger")).await;
        assert!(outcome.success, "{:?}", outcome.error);

        let n = deps
            .state_store
            .get(&Scope::Script("s1".into()), "n")
            .await
            .unwrap();
        assert_eq!(n, Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn log_calls_are_accumulated() {
        let (deps, _sink) = deps();
        let script = script("s1", r#"log.info("hello", 1); log.error("bad");"#);
        let outcome = Runtime::execute(deps, script, sample_event("t", "")).await;
        assert!(outcome.success);
        assert_eq!(outcome.user_logs.len(), 2);
        assert_eq!(outcome.user_logs[0].message, "hello 1");
        assert!(matches!(outcome.user_logs[1].level, LogLevel::Error));
    }

    #[tokio::test]
    async fn publish_quota_exceeded_fails_the_execution() {
        let (mut deps, _sink) = deps();
        deps.default_max_publishes = 1;
        let script = Arc::new(Script {
            max_publishes: Some(1),
            ..(*script("s1", "mqtt.publish('a', 'x', 0, false); mqtt.publish('b', 'y', 0, false);")).clone()
        });
        let outcome = Runtime::execute(deps, script, sample_event("t", "")).await;
        assert!(!outcome.success);
        let err = outcome.error.unwrap();
        assert!(err.contains("quota"), "{err}");
    }

    #[tokio::test]
    async fn invalid_qos_throws() {
        let (deps, _sink) = deps();
        let script = script("s1", "mqtt.publish('a', 'x', 9, false);");
        let outcome = Runtime::execute(deps, script, sample_event("t", "")).await;
        assert!(!outcome.success);
        let err = outcome.error.unwrap();
        assert!(err.contains("invalid qos: 9"), "{err}");
    }

    #[tokio::test]
    async fn compile_error_is_reported_as_failure() {
        let (deps, _sink) = deps();
        let script = script("s1", "this is not valid javascript (((");
        let outcome = Runtime::execute(deps, script, sample_event("t", "")).await;
        assert!(!outcome.success);
        let err = outcome.error.unwrap();
        assert!(err.starts_with("script compile error:"), "{err}");
    }

    #[tokio::test]
    async fn runtime_throw_is_reported_distinctly_from_a_compile_error() {
        let (deps, _sink) = deps();
        let script = script("s1", "undefinedFunctionCall();");
        let outcome = Runtime::execute(deps, script, sample_event("t", "")).await;
        assert!(!outcome.success);
        let err = outcome.error.unwrap();
        assert!(err.starts_with("script runtime error:"), "{err}");
    }

    #[tokio::test]
    async fn timeout_is_reported_as_a_distinct_failure_kind() {
        let (deps, _sink) = deps();
        let script = Arc::new(Script {
            timeout_s: Some(1),
            ..(*script("s1", "while (true) {}")).clone()
        });
        let outcome = Runtime::execute(deps, script, sample_event("t", "")).await;
        assert!(!outcome.success);
        let err = outcome.error.unwrap();
        assert!(err.starts_with("script timed out after"), "{err}");
    }

    #[tokio::test]
    async fn scenario_d_chaining_publishes_through_sink() {
        let (deps, sink) = deps();
        let script = script("a", "mqtt.publish('topic/b', 'from_a', 0, false);");
        let outcome = Runtime::execute(deps, script, sample_event("topic/a", "")).await;
        assert!(outcome.success, "{:?}", outcome.error);

        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "topic/b");
        assert_eq!(published[0].1, b"from_a");
    }
}
