//! Embedded MQTT broker binary: wires `rumqttd` to the auth, bridge and
//! script subsystems via `embermq-core::Hooks`.
//!
//! Only takes a config file and an optional listener override on the
//! command line — no admin API, no TLS, no config hot-reload. Those are
//! all collaborators this binary assumes exist elsewhere.

mod broker;
mod config;
mod repository;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use embermq_auth::{AuthCache, AuthService};
use embermq_bridge::BridgeManager;
use embermq_core::{BridgeLocalPublisher, Hooks, InlinePublishSink};
use embermq_kv::MemoryStore;
use embermq_script::{DirectStateStore, Engine, ScriptCache};
use rumqttd::{Broker as RumqttdDaemon, Config as RumqttdConfig, ConnectionSettings, RouterConfig, ServerSettings};
use tracing::{error, info};

use crate::broker::RumqttdBroker;
use crate::config::FileConfig;
use crate::repository::{
    FileAuthRepository, FileBridgeRepository, FileScriptRepository, InMemoryClientRepository,
    TracingScriptLogRepository,
};

#[derive(Parser, Debug)]
#[command(name = "embermq-server")]
struct Cli {
    /// Path to the YAML file provisioning credentials, ACL rules, bridges and scripts.
    #[arg(long, default_value = "embermq.yaml")]
    config: std::path::PathBuf,

    /// Overrides the listener address from the config file.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

fn rumqttd_config(listen: SocketAddr) -> RumqttdConfig {
    let mut servers = HashMap::new();
    servers.insert(
        "tcp".to_string(),
        ServerSettings {
            name: "tcp".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 60_000,
                max_payload_size: 1024 * 1024,
                max_inflight_count: 100,
                auth: None,
                external_auth: None,
                dynamic_filters: false,
            },
        },
    );

    RumqttdConfig {
        id: 0,
        router: RouterConfig {
            max_connections: 10_000,
            max_outgoing_packet_count: 200,
            max_segment_size: 1024 * 1024,
            max_segment_count: 10,
            ..Default::default()
        },
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        console: None,
        bridge: None,
        cluster: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let file_config = FileConfig::load(&cli.config)?;
    let listen = cli.listen.unwrap_or(file_config.listener.tcp_addr);

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus exporter: {e}"))?;

    let mut daemon = RumqttdDaemon::new(rumqttd_config(listen));
    let (link_tx, mut link_rx) = daemon
        .link("embermq-server")
        .map_err(|e| anyhow::anyhow!("failed to open rumqttd link: {e}"))?;
    link_tx
        .subscribe("#")
        .map_err(|e| anyhow::anyhow!("failed to subscribe link to '#': {e}"))?;

    let rumqttd_broker = Arc::new(RumqttdBroker::new(link_tx));
    let broker: Arc<dyn embermq_core::Broker> = rumqttd_broker.clone();

    let auth_repo: Arc<dyn embermq_auth::AuthRepository> = Arc::new(FileAuthRepository::new(&file_config));
    let auth = Arc::new(AuthService::new(
        AuthCache::new(Duration::from_secs(300)),
        auth_repo,
        file_config.acl_enabled,
    ));

    let bridges = Arc::new(BridgeManager::new(Arc::new(BridgeLocalPublisher::new(broker.clone()))));
    let bridge_repo = FileBridgeRepository::new(&file_config);
    embermq_core::start_bridges(&bridges, &bridge_repo).await?;

    let script_repo: Arc<dyn embermq_script::ScriptRepository> = Arc::new(FileScriptRepository::new(&file_config));
    let cache = Arc::new(ScriptCache::new(script_repo));
    let state_store: Arc<dyn embermq_script::StateStore> =
        Arc::new(DirectStateStore::new(Arc::new(MemoryStore::new())));
    let engine = Engine::new(
        cache,
        state_store,
        Arc::new(InlinePublishSink::new(broker.clone())),
        Arc::new(TracingScriptLogRepository),
    );
    engine.start().await?;

    let clients = InMemoryClientRepository::new();
    let hooks = Hooks::new(auth, bridges, engine, clients);

    info!(%listen, "embermq-server: listening");

    // Publish-notification loop. See `broker::RumqttdBroker` for why only
    // injected packets carry recoverable identity at this layer.
    tokio::spawn(async move {
        loop {
            match link_rx.recv() {
                Ok(Some(rumqttd::Notification::Forward(forward))) => {
                    let topic = String::from_utf8_lossy(&forward.publish.topic).to_string();
                    let payload = forward.publish.payload.to_vec();
                    let retain = forward.publish.retain;
                    let client_id = rumqttd_broker.recover_origin(&topic, &payload).unwrap_or_default();

                    hooks.on_publish(&client_id, "", &topic, &payload, 0, retain).await;
                }
                Ok(Some(_)) => {}
                Ok(None) => tokio::time::sleep(Duration::from_millis(10)).await,
                Err(e) => {
                    error!(error = %e, "embermq-server: link recv error, stopping notification loop");
                    break;
                }
            }
        }
    });

    tokio::task::spawn_blocking(move || daemon.start())
        .await?
        .map_err(|e| anyhow::anyhow!("rumqttd broker exited: {e}"))?;

    Ok(())
}
