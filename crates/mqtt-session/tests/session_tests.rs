use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mqtt_session::{
    ConnectionState, ConnectionTracker, MqttSession, SessionConfig, SessionError, SessionState,
};
use tokio::sync::{mpsc, watch};

#[test]
fn tracker_follows_connection_lifecycle() {
    let mut tracker = ConnectionTracker::default();
    assert_eq!(tracker.state(), ConnectionState::Disconnected);

    assert_eq!(tracker.connecting(), ConnectionState::Connecting);
    assert_eq!(tracker.connected(), ConnectionState::Connected);
    assert_eq!(tracker.reconnects(), 0);

    assert_eq!(tracker.disconnected(), ConnectionState::Disconnected);
    tracker.connecting();
    tracker.disconnected();
    assert_eq!(tracker.failures(), 2);

    tracker.connecting();
    assert_eq!(tracker.connected(), ConnectionState::Connected);
    assert_eq!(tracker.failures(), 0);
    assert_eq!(tracker.reconnects(), 1);
}

#[test]
fn session_state_tracks_message_freshness() {
    let mut state = SessionState::default();
    let start = Instant::now();
    assert!(!state.is_connected());
    assert_eq!(state.idle_for(start), None);

    state.record_message(start);
    assert_eq!(
        state.idle_for(start + Duration::from_secs(61)),
        Some(Duration::from_secs(61))
    );

    state.connection = ConnectionState::Connected;
    assert!(state.is_connected());
}

#[test]
fn options_carry_credentials_and_keep_alive() {
    let config = SessionConfig {
        broker_address: "broker.local".to_string(),
        broker_port: 8883,
        username: Some("bms".to_string()),
        password: Some("secret".to_string()),
        keep_alive_secs: 30,
        ..SessionConfig::default()
    };
    let options = config.mqtt_options().expect("options");

    assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
    assert_eq!(options.keep_alive(), Duration::from_secs(30));
    assert_eq!(
        options.credentials(),
        Some(("bms".to_string(), "secret".to_string()))
    );
}

#[test]
fn missing_ca_bundle_is_reported() {
    let config = SessionConfig {
        tls_enabled: true,
        tls_ca_path: Some("/nonexistent/ca.pem".to_string()),
        ..SessionConfig::default()
    };
    let err = config.mqtt_options().unwrap_err();
    assert!(matches!(err, SessionError::TlsCa { .. }));
}

#[tokio::test]
async fn unreachable_broker_retries_until_shutdown() {
    let config = SessionConfig {
        broker_address: "127.0.0.1".to_string(),
        broker_port: 1,
        reconnect_delay_ms: 10,
        reconnect_max_delay_ms: 10,
        ..SessionConfig::default()
    };
    let (sender, _receiver) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);

    let session = MqttSession::new(config, sender, shutdown_rx);
    let handle = tokio::spawn(session.run(move |state| {
        recorder.lock().expect("states").push(state);
    }));

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let failures = seen
            .lock()
            .expect("states")
            .iter()
            .filter(|state| **state == ConnectionState::Disconnected)
            .count();
        if failures >= 2 || Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(true).expect("shutdown");
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("session stops")
        .expect("join");
    assert!(result.is_ok());

    let states = seen.lock().expect("states").clone();
    assert_eq!(states.first(), Some(&ConnectionState::Connecting));
    assert!(states.contains(&ConnectionState::Disconnected));
    assert!(!states.contains(&ConnectionState::Connected));
}
