use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{info, warn};

use bridge_app::{ingest_task, BridgeConfig, Ingestor};
use derivation::DerivationEngine;
use mqtt_session::MqttSession;
use property_table::PropertyTable;
use publisher::{
    wait_for_first_message, BridgeState, InMemoryService, PropertySink, Publisher,
    ServiceRegistration,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_config_arg();
    let config = BridgeConfig::load_with_path(config_path).context("load config failed")?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level.as_level())
        .init();
    config.validate().context("config validation failed")?;

    if let Some(listen) = &config.metrics_listen {
        let addr: SocketAddr = listen.parse().context("metrics listen address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("prometheus exporter install failed")?;
        info!(%addr, "metrics exporter listening");
    }

    let table = PropertyTable::battery().context("build property table")?;
    let state = BridgeState::new(table).shared();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (tx, rx) = mpsc::channel(config.mqtt.channel_capacity);

    let session = MqttSession::new(config.mqtt.clone(), tx, shutdown_rx.clone());
    let session_state = state.clone();
    let mut session_handle = tokio::spawn(session.run(move |connection| {
        session_state.lock().session.connection = connection;
    }));

    let ingestor = Ingestor::new(state.clone(), DerivationEngine::new(config.derivation.clone()));
    let ingest_handle = tokio::spawn(ingest_task(ingestor, rx, shutdown_rx.clone()));

    let mut shutdown_signal = Box::pin(tokio::signal::ctrl_c());
    let poll = Duration::from_secs(config.first_message_poll_secs);
    tokio::select! {
        waited = wait_for_first_message(&state, config.idle_timeout(), poll) => {
            if let Err(err) = waited {
                let _ = shutdown_tx.send(true);
                return Err(err).context("startup wait failed");
            }
        }
        joined = &mut session_handle => {
            let _ = shutdown_tx.send(true);
            joined.context("mqtt session task failed")??;
            anyhow::bail!("mqtt session stopped before the first message");
        }
        _ = &mut shutdown_signal => {
            info!("shutdown signal received before first message");
            let _ = shutdown_tx.send(true);
            return Ok(());
        }
    }

    let mut sink = InMemoryService::new();
    let registration = ServiceRegistration::battery(&config.device)
        .with_process(env!("CARGO_BIN_NAME"), env!("CARGO_PKG_VERSION"));
    sink.register(&registration, &state.lock().table)
        .context("service registration failed")?;
    let publisher = Publisher::new(state.clone(), sink, config.publisher());

    notify_ready();
    let watchdog_handle = start_watchdog(shutdown_rx.clone());
    let mut publisher_handle = tokio::spawn(publisher.run(shutdown_rx.clone()));

    let outcome = tokio::select! {
        _ = &mut shutdown_signal => {
            info!("shutdown signal received");
            Ok(())
        }
        joined = &mut publisher_handle => {
            match joined.context("publisher task failed")? {
                Ok(()) => Ok(()),
                Err(err) => Err(anyhow::Error::new(err).context("publisher stopped")),
            }
        }
        joined = &mut session_handle => {
            match joined.context("mqtt session task failed")? {
                Ok(()) => Ok(()),
                Err(err) => Err(anyhow::Error::new(err).context("mqtt session stopped")),
            }
        }
    };

    let _ = shutdown_tx.send(true);
    if !publisher_handle.is_finished() {
        let _ = publisher_handle.await;
    }
    if !session_handle.is_finished() {
        let _ = session_handle.await;
    }
    if let Err(err) = ingest_handle.await {
        warn!(error = %err, "ingest task join failed");
    }
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    outcome
}

fn parse_config_arg() -> Option<String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(
    mut shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    Some(Duration::from_micros(watchdog_usec.saturating_div(2).max(100_000)))
}
