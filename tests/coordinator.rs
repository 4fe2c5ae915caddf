//! End-to-end coordinator behavior against a scripted adapter.

mod common;

use common::{seed_broker, seed_topic, wait_for, Call, MockAdapter};
use mqttwatch::connection::coordinator::{Coordinator, SnapshotStatus};
use mqttwatch::connection::{ClientEvent, ConnectionStatus};
use mqttwatch::core::time::{Clock, ManualClock};
use mqttwatch::messaging::InboundMessage;
use mqttwatch::ops::{DiagnosticsLog, MemoryAlertSink};
use mqttwatch::store::{MemorySecretStore, Store, TopicConfig};
use std::sync::Arc;

struct Harness {
    store: Store,
    adapter: Arc<MockAdapter>,
    alerts: MemoryAlertSink,
    clock: ManualClock,
    coordinator: Coordinator<ManualClock>,
}

fn harness() -> Harness {
    let store = Store::in_memory();
    let adapter = MockAdapter::new();
    let alerts = MemoryAlertSink::new();
    let clock = ManualClock::at(1_000);
    let coordinator = Coordinator::new(
        store.clone(),
        adapter.clone(),
        Arc::new(MemorySecretStore::default()),
        Arc::new(alerts.clone()),
        DiagnosticsLog::new(),
        clock.clone(),
    );
    Harness {
        store,
        adapter,
        alerts,
        clock,
        coordinator,
    }
}

fn inbound(topic: &str) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        payload: b"on".to_vec(),
        qos: 1,
        retained: false,
        duplicate: false,
        packet_id: None,
    }
}

#[tokio::test]
async fn test_visible_session_connects_and_tracks_topics() {
    let h = harness();
    let broker_id = seed_broker(&h.store, "home").await;
    seed_topic(&h.store, broker_id, "sensors/#").await;
    h.store.set_active_broker(Some(broker_id)).await.unwrap();

    h.coordinator.start();
    h.coordinator.set_ui_visible(true);

    wait_for("connected snapshot", || {
        h.coordinator.snapshot().status == SnapshotStatus::Connected
    })
    .await;
    wait_for("initial subscribe", || {
        h.adapter.calls().contains(&Call::Subscribe {
            filter: "sensors/#".to_string(),
            qos: 1,
        })
    })
    .await;
    assert_eq!(h.coordinator.snapshot().broker_label.as_deref(), Some("home"));
    assert_eq!(h.coordinator.snapshot().connected_since, Some(1_000));
    wait_for("session start recorded", || {
        h.store
            .watch_app_state()
            .borrow()
            .last_session_started_at
            == Some(1_000)
    })
    .await;

    // A topic added mid-session is subscribed without reconnecting.
    seed_topic(&h.store, broker_id, "doors/front").await;
    wait_for("live subscribe", || {
        h.adapter.calls().contains(&Call::Subscribe {
            filter: "doors/front".to_string(),
            qos: 1,
        })
    })
    .await;
    let connects = h
        .adapter
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Connect { .. }))
        .count();
    assert_eq!(connects, 1);
}

#[tokio::test]
async fn test_switching_broker_tears_down_old_session() {
    let h = harness();
    let first = seed_broker(&h.store, "alpha").await;
    let second = seed_broker(&h.store, "beta").await;
    h.store.set_active_broker(Some(first)).await.unwrap();

    h.coordinator.start();
    h.coordinator.set_ui_visible(true);
    wait_for("first session", || {
        h.coordinator.snapshot().broker_id == Some(first)
            && h.coordinator.snapshot().status == SnapshotStatus::Connected
    })
    .await;

    h.store.set_active_broker(Some(second)).await.unwrap();
    wait_for("second session", || {
        h.coordinator.snapshot().broker_id == Some(second)
            && h.coordinator.snapshot().status == SnapshotStatus::Connected
    })
    .await;

    let calls = h.adapter.calls();
    let disconnect_at = calls.iter().position(|c| *c == Call::Disconnect).unwrap();
    let second_connect_at = calls
        .iter()
        .position(|c| matches!(c, Call::Connect { broker_id, .. } if *broker_id == second))
        .unwrap();
    assert!(disconnect_at < second_connect_at);
}

#[tokio::test]
async fn test_connect_failure_reports_error_without_retry() {
    let h = harness();
    let broker_id = seed_broker(&h.store, "flaky").await;
    h.store.set_active_broker(Some(broker_id)).await.unwrap();
    h.adapter.fail_next_connect("connection refused");

    h.coordinator.start();
    h.coordinator.set_ui_visible(true);
    wait_for("error snapshot", || {
        h.coordinator.snapshot().status == SnapshotStatus::Error
    })
    .await;
    assert!(h
        .coordinator
        .snapshot()
        .last_error
        .unwrap()
        .contains("connection refused"));

    // No retry loop: the failed attempt stands until the next trigger.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let connects = h
        .adapter
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Connect { .. }))
        .count();
    assert_eq!(connects, 1);
}

#[tokio::test]
async fn test_hiding_ui_closes_visible_only_session() {
    let h = harness();
    let broker_id = seed_broker(&h.store, "home").await;
    h.store.set_active_broker(Some(broker_id)).await.unwrap();

    h.coordinator.start();
    h.coordinator.set_ui_visible(true);
    wait_for("connected", || {
        h.coordinator.snapshot().status == SnapshotStatus::Connected
    })
    .await;

    h.coordinator.set_ui_visible(false);
    wait_for("disconnected", || {
        h.coordinator.snapshot().status == SnapshotStatus::Disconnected
    })
    .await;
    assert!(h.adapter.calls().contains(&Call::Disconnect));
    // Label survives teardown for display purposes.
    assert_eq!(h.coordinator.snapshot().broker_label.as_deref(), Some("home"));
}

#[tokio::test]
async fn test_messages_alert_unless_muted() {
    let h = harness();
    let broker_id = seed_broker(&h.store, "home").await;
    seed_topic(&h.store, broker_id, "alarms/#").await;
    h.store.set_active_broker(Some(broker_id)).await.unwrap();

    h.coordinator.start();
    h.coordinator.set_ui_visible(true);
    wait_for("subscribed", || {
        h.adapter
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Subscribe { .. }))
    })
    .await;

    h.adapter.emit(ClientEvent::Message(inbound("alarms/smoke")));
    wait_for("alert delivered", || h.alerts.delivered().len() == 1)
    .await;
    let (label, record) = h.alerts.delivered().remove(0);
    assert_eq!(label, "home");
    assert_eq!(record.topic, "alarms/smoke");

    // Globally muted traffic is stored and counted but never alerts.
    h.store
        .set_global_mute_until(Some(h.clock.now_millis() + 60_000))
        .await
        .unwrap();
    h.adapter.emit(ClientEvent::Message(inbound("alarms/co2")));
    wait_for("second message ingested", || {
        h.coordinator.snapshot().message_count == 2
    })
    .await;
    assert_eq!(h.alerts.delivered().len(), 1);
    assert_eq!(h.store.unread_count_for_broker(broker_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_muted_specific_filter_does_not_suppress_broader_alert() {
    let h = harness();
    let broker_id = seed_broker(&h.store, "home").await;
    seed_topic(&h.store, broker_id, "alarms/#").await;
    // A more specific filter with notifications off. It still wins message
    // classification, but alerting falls to the notify-enabled match.
    h.store
        .upsert_topic(TopicConfig {
            id: 0,
            broker_id,
            filter: "alarms/kitchen/smoke".to_string(),
            qos: 1,
            enabled: true,
            notify_enabled: false,
            retained_as_new: false,
        })
        .await
        .unwrap();
    h.store.set_active_broker(Some(broker_id)).await.unwrap();

    h.coordinator.start();
    h.coordinator.set_ui_visible(true);
    wait_for("both filters subscribed", || {
        h.adapter
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Subscribe { .. }))
            .count()
            == 2
    })
    .await;

    h.adapter
        .emit(ClientEvent::Message(inbound("alarms/kitchen/smoke")));
    wait_for("alert delivered", || h.alerts.delivered().len() == 1).await;
    assert_eq!(h.alerts.delivered().remove(0).1.topic, "alarms/kitchen/smoke");
}

#[tokio::test]
async fn test_session_error_event_marks_snapshot() {
    let h = harness();
    let broker_id = seed_broker(&h.store, "home").await;
    h.store.set_active_broker(Some(broker_id)).await.unwrap();

    h.coordinator.start();
    h.coordinator.set_ui_visible(true);
    wait_for("connected", || {
        h.coordinator.snapshot().status == SnapshotStatus::Connected
    })
    .await;

    h.adapter.emit(ClientEvent::Error {
        message: "keepalive timeout".to_string(),
    });
    wait_for("error snapshot", || {
        h.coordinator.snapshot().status == SnapshotStatus::Error
    })
    .await;
    assert_eq!(
        h.coordinator.snapshot().last_error.as_deref(),
        Some("keepalive timeout")
    );
}

#[tokio::test]
async fn test_topic_changes_ignored_after_session_drops() {
    let h = harness();
    let broker_id = seed_broker(&h.store, "home").await;
    h.store.set_active_broker(Some(broker_id)).await.unwrap();

    h.coordinator.start();
    h.coordinator.set_ui_visible(true);
    wait_for("connected", || {
        h.coordinator.snapshot().status == SnapshotStatus::Connected
    })
    .await;

    // The broker drops the session; the topic watch must stop pushing
    // subscription changes until a reconnect.
    h.adapter
        .emit(ClientEvent::ConnectionChanged(ConnectionStatus::Disconnected));
    wait_for("disconnected snapshot", || {
        h.coordinator.snapshot().status == SnapshotStatus::Disconnected
    })
    .await;

    seed_topic(&h.store, broker_id, "sensors/#").await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!h
        .adapter
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Subscribe { .. })));
}

#[tokio::test]
async fn test_flags_set_before_start_converge_on_startup() {
    let h = harness();
    let broker_id = seed_broker(&h.store, "home").await;
    h.store.set_active_broker(Some(broker_id)).await.unwrap();

    // Desired state established before the background tasks exist; the
    // startup pass alone must bring the session up.
    h.coordinator.set_ui_visible(true);
    h.coordinator.start();
    wait_for("connected", || {
        h.coordinator.snapshot().status == SnapshotStatus::Connected
    })
    .await;
}

#[tokio::test]
async fn test_persistent_mode_ignores_ui_visibility() {
    let h = harness();
    let broker_id = seed_broker(&h.store, "home").await;
    h.store.set_active_broker(Some(broker_id)).await.unwrap();
    h.store
        .set_connection_mode(mqttwatch::store::ConnectionMode::Persistent)
        .await
        .unwrap();

    h.coordinator.start();
    h.coordinator.set_persistent_running(true);
    wait_for("connected", || {
        h.coordinator.snapshot().status == SnapshotStatus::Connected
    })
    .await;

    // UI visibility has no bearing on a persistent session.
    h.coordinator.set_ui_visible(false);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(h.coordinator.snapshot().status, SnapshotStatus::Connected);

    h.coordinator.set_persistent_running(false);
    wait_for("disconnected", || {
        h.coordinator.snapshot().status == SnapshotStatus::Disconnected
    })
    .await;
}
