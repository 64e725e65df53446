use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use bridge_app::{BridgeConfig, LogLevel};

static ENV_LOCK: Mutex<()> = Mutex::new(());

const OVERRIDES: &[&str] = &[
    "MQTT_BATTERY_CONFIG",
    "MQTT_BATTERY_BROKER_ADDRESS",
    "MQTT_BATTERY_TOPIC",
    "MQTT_BATTERY_IDLE_TIMEOUT_SECS",
    "MQTT_BATTERY_TLS_ENABLED",
    "MQTT_BATTERY_LOG_LEVEL",
];

fn clear_env() {
    for key in OVERRIDES {
        env::remove_var(key);
    }
}

#[test]
fn toml_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("MQTT_BATTERY_CONFIG", fixture_path("config-valid.toml"));

    let config = BridgeConfig::load().expect("load config");
    config.validate().expect("validate config");

    assert_eq!(config.mqtt.broker_address, "192.168.1.20");
    assert_eq!(config.mqtt.username.as_deref(), Some("bridge"));
    assert_eq!(config.mqtt.tls_ca_path, None);
    assert_eq!(config.mqtt.reconnect_max_delay_ms, 30_000);
    assert_eq!(config.device.instance, 101);
    assert_eq!(config.derivation.low_soc_threshold, 15.0);
    assert_eq!(config.derivation.time_to_go_interval, Duration::from_secs(30));
    assert_eq!(config.idle_timeout(), Some(Duration::from_secs(120)));
    assert_eq!(config.log_level, LogLevel::Info);
    assert_eq!(config.metrics_listen.as_deref(), Some("127.0.0.1:9187"));

    clear_env();
}

#[test]
fn json_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("MQTT_BATTERY_CONFIG", fixture_path("config-valid.json"));

    let config = BridgeConfig::load().expect("load config");
    config.validate().expect("validate config");

    assert!(config.mqtt.tls_enabled);
    assert_eq!(config.mqtt.reconnect_max_delay_ms, 5_000);
    assert!(!config.derivation.time_to_go_enabled);
    assert_eq!(config.idle_timeout(), None);
    assert_eq!(config.publisher().idle_timeout, None);
    assert_eq!(config.publisher().period, Duration::from_secs(1));
    assert_eq!(config.log_level, LogLevel::Debug);

    clear_env();
}

#[test]
fn invalid_config_fails_validation() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("MQTT_BATTERY_CONFIG", fixture_path("config-invalid.toml"));

    let config = BridgeConfig::load().expect("load config");
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("IP_ADDR_OR_FQDN"));

    clear_env();
}

#[test]
fn env_overrides_file_values() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("MQTT_BATTERY_CONFIG", fixture_path("config-invalid.toml"));
    env::set_var("MQTT_BATTERY_BROKER_ADDRESS", "10.0.0.5");
    env::set_var("MQTT_BATTERY_TOPIC", "bms/state");
    env::set_var("MQTT_BATTERY_IDLE_TIMEOUT_SECS", "0");
    env::set_var("MQTT_BATTERY_LOG_LEVEL", "error");

    let config = BridgeConfig::load().expect("load config");
    config.validate().expect("overrides fix the file");
    assert_eq!(config.mqtt.broker_address, "10.0.0.5");
    assert_eq!(config.idle_timeout(), None);
    assert_eq!(config.log_level, LogLevel::Error);

    clear_env();
}

#[test]
fn explicit_path_wins_over_env() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_env();
    env::set_var("MQTT_BATTERY_CONFIG", fixture_path("config-invalid.toml"));

    let config = BridgeConfig::load_with_path(Some(fixture_path("config-valid.toml")))
        .expect("load config");
    config.validate().expect("validate config");

    clear_env();
}

#[test]
fn insecure_tls_and_lone_credentials_are_rejected() {
    let mut config = BridgeConfig::default();
    config.validate().expect("defaults are valid");

    config.tls_insecure = true;
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.mqtt.username = Some("bridge".to_string());
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.derivation.thresholds.low_soc_critical = 30.0;
    assert!(config.validate().is_err());
}

#[test]
fn unknown_log_level_falls_back_to_warning() {
    assert_eq!(LogLevel::parse("WARNING"), LogLevel::Warning);
    assert_eq!(LogLevel::parse("verbose"), LogLevel::Warning);
    assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
}

fn fixture_path(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path.to_string_lossy().to_string()
}
