use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

mod state;

pub use state::{reconnect_delay, ConnectionState, ConnectionTracker, SessionState};

/// Broker connection and subscription settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub broker_address: String,
    pub broker_port: u16,
    pub client_id: String,
    /// Exact topic carrying the battery JSON; wildcards are not supported.
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls_enabled: bool,
    /// PEM bundle used instead of the platform roots when set.
    pub tls_ca_path: Option<String>,
    pub keep_alive_secs: u64,
    /// Delay before the first reconnect attempt in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Upper bound for the reconnect delay; equal to the base delay for a fixed interval.
    pub reconnect_max_delay_ms: u64,
    /// Capacity of the client request queue and the inbound message channel.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broker_address: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: "mqtt-battery-bridge".to_string(),
            topic: "mqtt/battery".to_string(),
            username: None,
            password: None,
            tls_enabled: false,
            tls_ca_path: None,
            keep_alive_secs: 60,
            reconnect_delay_ms: 5_000,
            reconnect_max_delay_ms: 5_000,
            channel_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn mqtt_options(&self) -> Result<MqttOptions, SessionError> {
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.broker_address.clone(),
            self.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        options.set_clean_session(true);

        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }

        if self.tls_enabled {
            let transport = match &self.tls_ca_path {
                Some(path) => {
                    let ca = std::fs::read(path).map_err(|source| SessionError::TlsCa {
                        path: path.clone(),
                        source,
                    })?;
                    Transport::tls_with_config(TlsConfiguration::Simple {
                        ca,
                        alpn: None,
                        client_auth: None,
                    })
                }
                None => Transport::tls_with_default_config(),
            };
            options.set_transport(transport);
        }

        Ok(options)
    }

    pub fn reconnect_delay(&self, failures: u32) -> Duration {
        reconnect_delay(self.reconnect_delay_ms, self.reconnect_max_delay_ms, failures)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read tls ca bundle {path}: {source}")]
    TlsCa {
        path: String,
        source: std::io::Error,
    },
    #[error("mqtt transport error: {0}")]
    Transport(#[from] rumqttc::ClientError),
}

/// One message received on the configured topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Owns the broker connection and forwards matching publishes to the ingest channel.
///
/// Reconnection is left to the rumqttc event loop, which re-dials on the next
/// poll; this task only paces the attempts and resubscribes on every ConnAck.
pub struct MqttSession {
    config: SessionConfig,
    sender: mpsc::Sender<InboundMessage>,
    shutdown: watch::Receiver<bool>,
    tracker: ConnectionTracker,
}

impl MqttSession {
    pub fn new(
        config: SessionConfig,
        sender: mpsc::Sender<InboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            sender,
            shutdown,
            tracker: ConnectionTracker::default(),
        }
    }

    /// Runs until shutdown or until the ingest side drops its receiver.
    ///
    /// `on_state` observes every connection state transition.
    pub async fn run<F>(mut self, mut on_state: F) -> Result<(), SessionError>
    where
        F: FnMut(ConnectionState) + Send,
    {
        let options = self.config.mqtt_options()?;
        let (client, mut eventloop) = AsyncClient::new(options, self.config.channel_capacity.max(1));
        on_state(self.tracker.connecting());
        info!(
            broker = %self.config.broker_address,
            port = self.config.broker_port,
            topic = %self.config.topic,
            "connecting to mqtt broker"
        );

        loop {
            let event = tokio::select! {
                event = eventloop.poll() => event,
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("mqtt session shutdown requested");
                        break;
                    }
                    continue;
                }
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        error!(code = ?ack.code, "mqtt broker refused connection");
                        continue;
                    }
                    let reconnected = self.tracker.failures() > 0;
                    on_state(self.tracker.connected());
                    if reconnected {
                        metrics::counter!("bridge_reconnects_total").increment(1);
                    }
                    info!(
                        broker = %self.config.broker_address,
                        reconnects = self.tracker.reconnects(),
                        "mqtt connected"
                    );
                    client.try_subscribe(self.config.topic.clone(), QoS::AtLeastOnce)?;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, topic = %self.config.topic, "subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic != self.config.topic {
                        debug!(topic = %publish.topic, "ignoring message on unexpected topic");
                        continue;
                    }
                    let message = InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    };
                    if self.sender.send(message).await.is_err() {
                        info!("ingest channel closed, stopping mqtt session");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    on_state(self.tracker.disconnected());
                    warn!("mqtt broker sent disconnect");
                }
                Ok(_) => {}
                Err(err) => {
                    on_state(self.tracker.disconnected());
                    let failures = self.tracker.failures();
                    let delay = self.config.reconnect_delay(failures);
                    warn!(
                        error = %err,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "mqtt connection lost, retrying"
                    );

                    tokio::select! {
                        _ = sleep(delay) => {},
                        changed = self.shutdown.changed() => {
                            if changed.is_err() || *self.shutdown.borrow() {
                                info!("mqtt session shutdown requested");
                                break;
                            }
                        }
                    }
                    on_state(self.tracker.connecting());
                }
            }
        }

        if let Err(err) = client.try_disconnect() {
            debug!(error = %err, "mqtt disconnect request not sent");
        }
        Ok(())
    }
}
