//! End-to-end pipeline tests over the in-memory port doubles.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use waymark_core::mock::{
    MemoryStateStore, MockApi, MockChannel, MockPositionSource, MockPowerMonitor,
    MockRegionMonitor,
};
use waymark_core::traits::{ChannelEvent, MethodInvocation, RegionEvent, StateStore};
use waymark_core::{Ports, SdkEvent, Session, SessionConfig};
use waymark_store::Store;
use waymark_types::wire::{LastKnownLocation, PublisherRecord, SubscribeResponse};
use waymark_types::{AppMode, Position};

struct Harness {
    session: Session,
    api: Arc<MockApi>,
    channel: Arc<MockChannel>,
    positions: Arc<MockPositionSource>,
    regions: Arc<MockRegionMonitor>,
}

fn harness() -> Harness {
    let api = Arc::new(MockApi::default());
    let channel = Arc::new(MockChannel::default());
    let positions = Arc::new(MockPositionSource::default());
    let regions = Arc::new(MockRegionMonitor::default());

    let ports = Ports {
        api: Arc::clone(&api) as _,
        channel: Arc::clone(&channel) as _,
        positions: Arc::clone(&positions) as _,
        regions: Arc::clone(&regions) as _,
        power: Arc::new(MockPowerMonitor::default()),
        state: Arc::new(MemoryStateStore::default()),
    };
    let session = Session::new(
        ports,
        Store::open_in_memory().unwrap(),
        SessionConfig::new("pk_123", "com.example.app"),
    );

    Harness {
        session,
        api,
        channel,
        positions,
        regions,
    }
}

fn fix(accuracy: f64) -> Position {
    Position {
        latitude: 47.62,
        longitude: -122.35,
        horizontal_accuracy: accuracy,
        timestamp: OffsetDateTime::now_utc(),
        ..Position::invalid()
    }
}

async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for: {description}"));
}

#[tokio::test(flavor = "multi_thread")]
async fn login_starts_tracking_and_connects_channel() {
    let h = harness();
    h.channel.auto_connect();

    assert!(h.session.login("user-1").await);

    assert_eq!(h.session.session_id().as_deref(), Some("user-1"));
    assert_eq!(h.session.device_id().as_deref(), Some("mock-device"));
    assert!(h.api.auth_key().is_some());

    let connects = h.channel.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].0, "hub.mock.invalid");
    assert_eq!(connects[0].1.id, "mock-device");

    wait_until("position updates started", || h.positions.running()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn relogin_after_restart_reinstalls_auth_key() {
    // A relaunched process has persisted credentials but a bare HTTP
    // client
    let api = Arc::new(MockApi::default());
    let channel = Arc::new(MockChannel::default());
    let state = Arc::new(MemoryStateStore::default());
    state.set("waymark.device_id", "DVC-existing");
    state.set("waymark.session_id", "user-1");
    state.set("waymark.symmetric_key", "bW9jay1rZXk=");
    state.set("waymark.remote_config", r#"{"iotHubHost":"hub.mock.invalid"}"#);

    let ports = Ports {
        api: Arc::clone(&api) as _,
        channel: Arc::clone(&channel) as _,
        positions: Arc::new(MockPositionSource::default()),
        regions: Arc::new(MockRegionMonitor::default()),
        power: Arc::new(MockPowerMonitor::default()),
        state,
    };
    let session = Session::new(
        ports,
        Store::open_in_memory().unwrap(),
        SessionConfig::new("pk_123", "com.example.app"),
    );
    channel.auto_connect();

    assert!(session.login("user-1").await);

    // The stored credentials short-circuit the exchange
    assert!(api.logins().is_empty());
    assert!(api.auth_key().is_some());
    assert_eq!(channel.connects().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn login_rejects_blank_id_and_failed_exchange() {
    let h = harness();
    assert!(!h.session.login("   ").await);
    assert!(h.api.logins().is_empty());

    h.api.fail_login();
    assert!(!h.session.login("user-1").await);
    assert!(h.session.session_id().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn first_sample_is_force_sent_over_channel() {
    let h = harness();
    h.channel.auto_connect();
    assert!(h.session.login("user-1").await);
    wait_until("position updates started", || h.positions.running()).await;

    let mut events = h.session.events();
    h.positions.push(fix(8.0));

    wait_until("sample published over channel", || {
        !h.channel.sent().is_empty()
    })
    .await;

    let sent = h.channel.sent();
    assert_eq!(sent[0].user_id, "user-1");
    assert_eq!(sent[0].device_id, "mock-device");

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, SdkEvent::LocationUpdated { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn channel_failure_falls_back_to_http() {
    let h = harness();
    h.channel.auto_connect();
    h.channel.fail_sends("broker rejected");
    assert!(h.session.login("user-1").await);
    wait_until("position updates started", || h.positions.running()).await;

    h.positions.push(fix(8.0));

    wait_until("fallback reached the HTTP api", || {
        !h.api.sent_locations().is_empty()
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_sample_within_debounce_is_not_sent() {
    let h = harness();
    h.channel.auto_connect();
    assert!(h.session.login("user-1").await);
    wait_until("position updates started", || h.positions.running()).await;

    h.positions.push(fix(20.0));
    wait_until("first sample sent", || h.channel.sent().len() == 1).await;

    // Better accuracy passes the quality gate but lands inside the
    // 10 s debounce window
    h.positions.push(fix(5.0));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.channel.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_readings_are_discarded() {
    let h = harness();
    h.channel.auto_connect();
    assert!(h.session.login("user-1").await);
    wait_until("position updates started", || h.positions.running()).await;

    h.positions.push(Position::invalid());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.channel.sent().is_empty());
    assert!(h.session.current_position().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn backgrounding_registers_region_ring() {
    let h = harness();
    h.channel.auto_connect();
    assert!(h.session.login("user-1").await);
    wait_until("position updates started", || h.positions.running()).await;

    h.positions.push(fix(8.0));
    wait_until("sample captured", || h.session.current_position().is_some()).await;

    h.session.set_app_mode(AppMode::Background);
    // 2N satellites plus the exit region for the default N=5
    wait_until("region ring registered", || h.regions.registered().len() == 11).await;

    h.session.set_app_mode(AppMode::Foreground);
    wait_until("regions cleared", || h.regions.registered().is_empty()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn region_crossing_requests_fix_only_while_backgrounded() {
    let h = harness();
    h.channel.auto_connect();
    assert!(h.session.login("user-1").await);
    wait_until("position updates started", || h.positions.running()).await;

    h.positions.push(fix(8.0));
    wait_until("sample captured", || h.session.current_position().is_some()).await;

    // Foregrounded: boundary crossings do not wake sampling
    h.regions
        .emit(RegionEvent::Entered("waymark_region_0".to_string()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.positions.fix_requests(), 0);

    h.session.set_app_mode(AppMode::Background);
    wait_until("region ring registered", || h.regions.registered().len() == 11).await;

    h.regions
        .emit(RegionEvent::Exited("waymark_region_main".to_string()));
    wait_until("fresh fix requested", || h.positions.fix_requests() == 1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn logout_clears_session_but_keeps_device_id() {
    let h = harness();
    h.channel.auto_connect();
    assert!(h.session.login("user-1").await);

    assert!(h.session.logout().await);

    assert!(h.session.session_id().is_none());
    assert_eq!(h.session.device_id().as_deref(), Some("mock-device"));
    assert_eq!(h.api.logouts(), vec!["mock-device".to_string()]);
    assert!(h.channel.disconnect_count() >= 1);
    assert!(h.api.auth_key().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribe_seeds_observer_with_publisher_locations() {
    let h = harness();
    h.api.set_subscribe_response(SubscribeResponse {
        failed_subscriptions: vec!["user-9".to_string()],
        publishers: vec![PublisherRecord {
            id: "user-2".to_string(),
            last_known_location: Some(LastKnownLocation {
                user_id: "user-2".to_string(),
                coordinates: Some(waymark_types::wire::Coordinates {
                    latitude: 51.5,
                    longitude: -0.12,
                }),
                horizontal_accuracy: Some(10.0),
                recorded_at: None,
                is_simulated: false,
                app_mode: Some(AppMode::Foreground),
            }),
        }],
    });

    let mut events = h.session.events();
    let response = h
        .session
        .subscribe(&["user-2".to_string(), " user-2 ".to_string()])
        .await
        .unwrap();
    assert_eq!(response.failed_subscriptions, vec!["user-9".to_string()]);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        SdkEvent::UserLocationUpdated { location } => {
            assert_eq!(location.user_id, "user-2");
            assert!(location.position.is_valid());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn viewing_state_method_triggers_immediate_send() {
    let h = harness();
    h.channel.auto_connect();
    assert!(h.session.login("user-1").await);
    wait_until("position updates started", || h.positions.running()).await;

    h.positions.push(fix(8.0));
    wait_until("first sample sent", || h.channel.sent().len() == 1).await;

    let mut events = h.session.events();
    h.channel.emit(ChannelEvent::MethodInvoked(MethodInvocation {
        method: "setLocationBeingViewed".to_string(),
        payload: r#"{"isOn":true,"sendLocationImmediately":true}"#.to_string(),
    }));

    wait_until("forced send on viewing", || h.channel.sent().len() == 2).await;

    let saw_viewing_change = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(SdkEvent::ViewingStateChanged { state }) => break state.is_on,
                Ok(_) => continue,
                Err(_) => break false,
            }
        }
    })
    .await
    .unwrap();
    assert!(saw_viewing_change);
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_resends_sample_queued_while_offline() {
    let h = harness();
    // No auto-connect: the channel stays down after login
    assert!(h.session.login("user-1").await);
    wait_until("position updates started", || h.positions.running()).await;

    h.api.fail_sends("offline");
    h.positions.push(fix(8.0));
    wait_until("primary HTTP attempt failed", || {
        h.api.sent_locations().is_empty() && h.session.current_position().is_some()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Service reachable again, channel comes up
    h.api.allow_sends();
    h.channel.set_connected(true);
    h.channel.emit(ChannelEvent::Connected);

    wait_until("queued sample reconciled over channel", || {
        !h.channel.sent().is_empty()
    })
    .await;
}
