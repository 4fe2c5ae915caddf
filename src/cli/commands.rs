//! Command implementations wiring the runtime together.

use crate::cli::args::{StartArgs, StateArgs, TestArgs};
use crate::connection::coordinator::Coordinator;
use crate::connection::rumqtt::RumqttAdapter;
use crate::connection::tester::test_broker;
use crate::core::config::Config;
use crate::core::time::{Clock, SystemClock};
use crate::ops::alerts::LogAlertSink;
use crate::ops::diag::DiagnosticsLog;
use crate::ops::telemetry;
use crate::store::repo::Store;
use crate::store::secrets::{FileSecretStore, SecretStore};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Run the connection service in the foreground until ctrl-c.
pub async fn run_start(args: StartArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    telemetry::init_tracing(
        args.log_level
            .as_deref()
            .or(config.telemetry.log_level.as_deref()),
    );

    let store = Store::open(config.store_path()).context("open store")?;
    if let Some(broker_id) = args.broker {
        store.set_active_broker(Some(broker_id)).await?;
    }

    let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(config.secrets_path()));
    let coordinator = Coordinator::new(
        store,
        Arc::new(RumqttAdapter::new()),
        secrets,
        Arc::new(LogAlertSink),
        DiagnosticsLog::new(),
        SystemClock,
    );
    coordinator.start();
    // A foreground run satisfies both connection modes.
    coordinator.set_ui_visible(true);
    coordinator.set_persistent_running(true);

    tracing::info!("mqttwatch running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    coordinator.shutdown().await;
    Ok(())
}

/// Test connectivity for one stored broker and stamp the pass timestamp so a
/// subsequent save clears the freshness gate.
pub async fn run_test(args: TestArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    telemetry::init_tracing(
        args.log_level
            .as_deref()
            .or(config.telemetry.log_level.as_deref()),
    );

    let store = Store::open(config.store_path()).context("open store")?;
    let mut broker = store
        .broker(args.broker)
        .await?
        .with_context(|| format!("broker {} not found", args.broker))?;

    let secrets = FileSecretStore::new(config.secrets_path());
    let secret = match &broker.credentials_ref {
        Some(reference) => secrets.get(&reference.alias).await?,
        None => None,
    };

    let clock = SystemClock;
    let adapter = RumqttAdapter::new();
    let passed_at = test_broker(&adapter, &clock, &broker, secret)
        .await
        .context("connectivity test failed")?;

    broker.last_test_passed_at = Some(passed_at);
    store.save_broker(broker.clone(), clock.now_millis()).await?;
    println!(
        "broker '{}' ({}:{}) passed at {passed_at}",
        broker.label, broker.host, broker.port
    );
    Ok(())
}

/// Dump the persisted state for inspection.
pub async fn run_state(args: StateArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let store = Store::open(config.store_path()).context("open store")?;

    let state = store.app_state().await?;
    println!("mode:            {:?}", state.mode);
    println!("active broker:   {:?}", state.active_broker_id);
    println!("muted until:     {:?}", state.global_mute_until);
    println!("show previews:   {}", state.show_previews);
    println!("last session at: {:?}", state.last_session_started_at);

    for broker in store.brokers().await? {
        let unread = store.unread_count_for_broker(broker.id).await?;
        let topics = store.topics_for_broker(broker.id).await?.len();
        println!(
            "broker {} '{}' {}:{} topics={topics} unread={unread}",
            broker.id, broker.label, broker.host, broker.port
        );
    }
    Ok(())
}
