use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::Level;

use derivation::DerivationConfig;
use mqtt_session::SessionConfig;
use publisher::PublisherConfig;
use types::DeviceIdentity;

const PLACEHOLDER_BROKER: &str = "IP_ADDR_OR_FQDN";
const DEFAULT_DEVICE_INSTANCE: u32 = 100;
const DEFAULT_DEVICE_NAME: &str = "mqtt_battery";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_FIRST_MESSAGE_POLL_SECS: u64 = 5;
const PUBLISH_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// Unrecognised names fall back to `Warning`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ERROR" => LogLevel::Error,
            "INFO" => LogLevel::Info,
            "DEBUG" => LogLevel::Debug,
            _ => LogLevel::Warning,
        }
    }

    pub fn as_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warning => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub mqtt: SessionConfig,
    /// Disables hostname verification; accepted in files but refused by `validate`.
    pub tls_insecure: bool,
    pub device: DeviceIdentity,
    pub derivation: DerivationConfig,
    /// Seconds without a message before the process gives up; 0 disables.
    pub idle_timeout_secs: u64,
    pub first_message_poll_secs: u64,
    pub log_level: LogLevel,
    pub metrics_listen: Option<String>,
}

impl BridgeConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mqtt = &self.mqtt;
        if mqtt.broker_address.trim().is_empty() {
            anyhow::bail!("mqtt.broker_address must be non-empty");
        }
        if mqtt.broker_address == PLACEHOLDER_BROKER {
            anyhow::bail!("mqtt.broker_address still holds the sample value {PLACEHOLDER_BROKER}");
        }
        if mqtt.broker_port == 0 {
            anyhow::bail!("mqtt.broker_port must be between 1 and 65535");
        }
        if mqtt.client_id.trim().is_empty() {
            anyhow::bail!("mqtt.client_id must be non-empty");
        }
        validate_topic(&mqtt.topic)?;
        if mqtt.username.is_some() != mqtt.password.is_some() {
            anyhow::bail!("mqtt.username and mqtt.password must be set together");
        }
        if mqtt.tls_ca_path.is_some() && !mqtt.tls_enabled {
            anyhow::bail!("mqtt.tls_ca_path requires mqtt.tls_enabled");
        }
        if self.tls_insecure {
            anyhow::bail!("mqtt.tls_insecure is not supported, configure mqtt.tls_ca_path instead");
        }
        if mqtt.keep_alive_secs < 5 {
            anyhow::bail!("mqtt.keep_alive_secs must be >= 5");
        }
        if mqtt.reconnect_delay_ms == 0 {
            anyhow::bail!("mqtt.reconnect_delay_ms must be >= 1");
        }
        if mqtt.reconnect_max_delay_ms < mqtt.reconnect_delay_ms {
            anyhow::bail!("mqtt.reconnect_max_delay_ms must be >= mqtt.reconnect_delay_ms");
        }
        if mqtt.channel_capacity == 0 {
            anyhow::bail!("mqtt.channel_capacity must be >= 1");
        }
        if self.device.name.trim().is_empty()
            || self
                .device
                .name
                .chars()
                .any(|ch| !ch.is_ascii_alphanumeric() && ch != '_')
        {
            anyhow::bail!("device.name must be non-empty and contain only [A-Za-z0-9_]");
        }

        let battery = &self.derivation;
        if !(0.0..=100.0).contains(&battery.low_soc_threshold) {
            anyhow::bail!("battery.low_soc_threshold must be between 0 and 100");
        }
        if battery.time_to_go_interval.is_zero() {
            anyhow::bail!("battery.time_to_go_interval_secs must be >= 1");
        }
        let t = &battery.thresholds;
        if t.voltage_low_critical > t.voltage_low_warning {
            anyhow::bail!("battery.voltage_low_critical must be <= battery.voltage_low_warning");
        }
        if t.voltage_high_warning > t.voltage_high_critical {
            anyhow::bail!("battery.voltage_high_warning must be <= battery.voltage_high_critical");
        }
        if t.voltage_low_warning >= t.voltage_high_warning {
            anyhow::bail!("battery.voltage_low_warning must be below battery.voltage_high_warning");
        }
        if t.low_soc_critical > t.low_soc_warning {
            anyhow::bail!("battery.low_soc_critical must be <= battery.low_soc_warning");
        }

        if self.first_message_poll_secs == 0 {
            anyhow::bail!("watchdog.first_message_poll_secs must be >= 1");
        }
        if let Some(listen) = &self.metrics_listen {
            listen
                .parse::<std::net::SocketAddr>()
                .with_context(|| format!("metrics.listen {listen} is not a socket address"))?;
        }

        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn publisher(&self) -> PublisherConfig {
        PublisherConfig {
            period: PUBLISH_PERIOD,
            idle_timeout: self.idle_timeout(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: SessionConfig::default(),
            tls_insecure: false,
            device: DeviceIdentity {
                instance: DEFAULT_DEVICE_INSTANCE,
                name: DEFAULT_DEVICE_NAME.to_string(),
            },
            derivation: DerivationConfig::default(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            first_message_poll_secs: DEFAULT_FIRST_MESSAGE_POLL_SECS,
            log_level: LogLevel::Warning,
            metrics_listen: None,
        }
    }
}

fn apply_env_overrides(config: &mut BridgeConfig) {
    if let Ok(value) = env::var("MQTT_BATTERY_BROKER_ADDRESS") {
        config.mqtt.broker_address = value;
    }
    if let Some(port) = parse_env_u16("MQTT_BATTERY_BROKER_PORT") {
        config.mqtt.broker_port = port;
    }
    if let Ok(value) = env::var("MQTT_BATTERY_TOPIC") {
        config.mqtt.topic = value;
    }
    if let Ok(value) = env::var("MQTT_BATTERY_CLIENT_ID") {
        config.mqtt.client_id = value;
    }
    config.mqtt.username = non_empty(env::var("MQTT_BATTERY_USERNAME").ok()).or(config.mqtt.username.take());
    config.mqtt.password = non_empty(env::var("MQTT_BATTERY_PASSWORD").ok()).or(config.mqtt.password.take());
    if let Some(enabled) = parse_env_flag("MQTT_BATTERY_TLS_ENABLED") {
        config.mqtt.tls_enabled = enabled;
    }
    config.mqtt.tls_ca_path =
        non_empty(env::var("MQTT_BATTERY_TLS_CA_PATH").ok()).or(config.mqtt.tls_ca_path.take());
    if let Some(delay) = parse_env_u64("MQTT_BATTERY_RECONNECT_DELAY_MS") {
        config.mqtt.reconnect_delay_ms = delay;
        config.mqtt.reconnect_max_delay_ms = config.mqtt.reconnect_max_delay_ms.max(delay);
    }

    if let Some(instance) = parse_env_u32("MQTT_BATTERY_DEVICE_INSTANCE") {
        config.device.instance = instance;
    }
    if let Ok(value) = env::var("MQTT_BATTERY_DEVICE_NAME") {
        config.device.name = value;
    }

    config.idle_timeout_secs =
        parse_env_u64("MQTT_BATTERY_IDLE_TIMEOUT_SECS").unwrap_or(config.idle_timeout_secs);
    if let Some(enabled) = parse_env_flag("MQTT_BATTERY_TIME_TO_GO_ENABLED") {
        config.derivation.time_to_go_enabled = enabled;
    }
    if let Ok(value) = env::var("MQTT_BATTERY_LOG_LEVEL") {
        config.log_level = LogLevel::parse(&value);
    }
    config.metrics_listen =
        non_empty(env::var("MQTT_BATTERY_METRICS_LISTEN").ok()).or(config.metrics_listen.take());
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    mqtt: Option<FileMqttConfig>,
    device: Option<FileDeviceConfig>,
    battery: Option<FileBatteryConfig>,
    watchdog: Option<FileWatchdogConfig>,
    logging: Option<FileLoggingConfig>,
    metrics: Option<FileMetricsConfig>,
}

#[derive(Debug, Deserialize)]
struct FileMqttConfig {
    broker_address: Option<String>,
    broker_port: Option<u16>,
    client_id: Option<String>,
    topic: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tls_enabled: Option<bool>,
    tls_ca_path: Option<String>,
    tls_insecure: Option<bool>,
    keep_alive_secs: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FileDeviceConfig {
    instance: Option<u32>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileBatteryConfig {
    time_to_go_enabled: Option<bool>,
    low_soc_threshold: Option<f64>,
    time_to_go_interval_secs: Option<u64>,
    voltage_low_critical: Option<f64>,
    voltage_low_warning: Option<f64>,
    voltage_high_warning: Option<f64>,
    voltage_high_critical: Option<f64>,
    low_soc_critical: Option<f64>,
    low_soc_warning: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FileWatchdogConfig {
    idle_timeout_secs: Option<u64>,
    first_message_poll_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileLoggingConfig {
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileMetricsConfig {
    listen: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("MQTT_BATTERY_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut BridgeConfig, file: FileConfig) {
    if let Some(mqtt) = file.mqtt {
        let target = &mut config.mqtt;
        if let Some(address) = mqtt.broker_address {
            target.broker_address = address;
        }
        if let Some(port) = mqtt.broker_port {
            target.broker_port = port;
        }
        if let Some(client_id) = mqtt.client_id {
            target.client_id = client_id;
        }
        if let Some(topic) = mqtt.topic {
            target.topic = topic;
        }
        // empty strings in the sample file mean "no credentials"
        if let Some(username) = non_empty(mqtt.username) {
            target.username = Some(username);
        }
        if let Some(password) = non_empty(mqtt.password) {
            target.password = Some(password);
        }
        if let Some(enabled) = mqtt.tls_enabled {
            target.tls_enabled = enabled;
        }
        if let Some(path) = non_empty(mqtt.tls_ca_path) {
            target.tls_ca_path = Some(path);
        }
        if let Some(insecure) = mqtt.tls_insecure {
            config.tls_insecure = insecure;
        }
        if let Some(keep_alive) = mqtt.keep_alive_secs {
            target.keep_alive_secs = keep_alive;
        }
        if let Some(delay) = mqtt.reconnect_delay_ms {
            target.reconnect_delay_ms = delay;
            if mqtt.reconnect_max_delay_ms.is_none() {
                target.reconnect_max_delay_ms = delay;
            }
        }
        if let Some(max_delay) = mqtt.reconnect_max_delay_ms {
            target.reconnect_max_delay_ms = max_delay;
        }
        if let Some(capacity) = mqtt.channel_capacity {
            target.channel_capacity = capacity;
        }
    }

    if let Some(device) = file.device {
        if let Some(instance) = device.instance {
            config.device.instance = instance;
        }
        if let Some(name) = device.name {
            config.device.name = name;
        }
    }

    if let Some(battery) = file.battery {
        let target = &mut config.derivation;
        if let Some(enabled) = battery.time_to_go_enabled {
            target.time_to_go_enabled = enabled;
        }
        if let Some(threshold) = battery.low_soc_threshold {
            target.low_soc_threshold = threshold;
        }
        if let Some(secs) = battery.time_to_go_interval_secs {
            target.time_to_go_interval = Duration::from_secs(secs);
        }
        let thresholds = &mut target.thresholds;
        if let Some(value) = battery.voltage_low_critical {
            thresholds.voltage_low_critical = value;
        }
        if let Some(value) = battery.voltage_low_warning {
            thresholds.voltage_low_warning = value;
        }
        if let Some(value) = battery.voltage_high_warning {
            thresholds.voltage_high_warning = value;
        }
        if let Some(value) = battery.voltage_high_critical {
            thresholds.voltage_high_critical = value;
        }
        if let Some(value) = battery.low_soc_critical {
            thresholds.low_soc_critical = value;
        }
        if let Some(value) = battery.low_soc_warning {
            thresholds.low_soc_warning = value;
        }
    }

    if let Some(watchdog) = file.watchdog {
        if let Some(secs) = watchdog.idle_timeout_secs {
            config.idle_timeout_secs = secs;
        }
        if let Some(secs) = watchdog.first_message_poll_secs {
            config.first_message_poll_secs = secs;
        }
    }

    if let Some(level) = file.logging.and_then(|logging| logging.level) {
        config.log_level = LogLevel::parse(&level);
    }

    if let Some(listen) = file.metrics.and_then(|metrics| non_empty(metrics.listen)) {
        config.metrics_listen = Some(listen);
    }
}

fn parse_env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Accepts `true`/`false` as well as `1`/`0`.
fn parse_env_flag(key: &str) -> Option<bool> {
    let value = env::var(key).ok()?;
    match value.trim() {
        "1" => Some(true),
        "0" => Some(false),
        other => other.parse().ok(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn validate_topic(topic: &str) -> Result<()> {
    if topic.trim().is_empty() {
        anyhow::bail!("mqtt.topic must be non-empty");
    }
    if topic.contains(['+', '#']) {
        anyhow::bail!("mqtt.topic must be a concrete topic, wildcards are not supported");
    }
    if topic.contains('\0') {
        anyhow::bail!("mqtt.topic contains a NUL character");
    }
    Ok(())
}
