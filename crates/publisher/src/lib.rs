//! Periodic publication of the property table and the data-freshness watchdog.
//!
//! The [`Publisher`] is the only writer to the [`PropertySink`]. On every tick
//! it flushes the whole table when a new message has been ingested since the
//! last flush, advances the rolling `/UpdateIndex` and checks the idle timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use mqtt_session::SessionState;
use property_table::schema::paths;
use property_table::{PropertyTable, TableError};
use types::Scalar;

mod sink;

pub use sink::{
    InMemoryService, PropertySink, Published, ServiceRegistration, SinkError, PRODUCT_ID,
    SERVICE_PREFIX,
};

pub type Shared<T> = Arc<Mutex<T>>;

/// Everything the ingestion task writes and the publisher reads.
#[derive(Debug)]
pub struct BridgeState {
    pub table: PropertyTable,
    pub session: SessionState,
}

impl BridgeState {
    pub fn new(table: PropertyTable) -> Self {
        Self {
            table,
            session: SessionState::default(),
        }
    }

    pub fn shared(self) -> Shared<BridgeState> {
        Arc::new(Mutex::new(self))
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub period: Duration,
    /// `None` disables the watchdog.
    pub idle_timeout: Option<Duration>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            idle_timeout: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no message received for {idle:?}, idle timeout is {timeout:?}")]
    StaleData { idle: Duration, timeout: Duration },
    #[error("no message received within {waited:?} of startup")]
    NoFirstMessage { waited: Duration },
    #[error("invalid property write to {path}: {source}")]
    InvalidPropertyWrite { path: String, source: SinkError },
    #[error("property table rejected write: {0}")]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub flushed: bool,
    pub update_index: u8,
}

pub struct Publisher<S> {
    state: Shared<BridgeState>,
    sink: S,
    config: PublisherConfig,
    flushed_message_at: Option<Instant>,
    update_index: u8,
}

impl<S: PropertySink> Publisher<S> {
    /// Wraps an already registered sink.
    pub fn new(state: Shared<BridgeState>, sink: S, config: PublisherConfig) -> Self {
        let update_index = state
            .lock()
            .table
            .get(paths::UPDATE_INDEX)
            .and_then(Scalar::as_f64)
            .map(|index| index as u8)
            .unwrap_or(0);
        Self {
            state,
            sink,
            config,
            flushed_message_at: None,
            update_index,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn update_index(&self) -> u8 {
        self.update_index
    }

    pub fn tick(&mut self, now: Instant) -> Result<TickOutcome, PublishError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        metrics::counter!("bridge_ticks_total").increment(1);

        let last_message_at = state.session.last_message_at;
        let flushed = last_message_at.is_some() && last_message_at != self.flushed_message_at;
        if flushed {
            for entry in state.table.iter() {
                write_entry(&mut self.sink, entry.path(), entry.value(), &entry.text())?;
            }
            self.flushed_message_at = last_message_at;
            state.session.last_published_at = Some(now);
            metrics::counter!("bridge_flushes_total").increment(1);
            debug!(paths = state.table.len(), "property table flushed");
        }

        self.update_index = self.update_index.wrapping_add(1);
        let index = Scalar::Int(i64::from(self.update_index));
        state.table.set(paths::UPDATE_INDEX, Some(index))?;
        if let Some(entry) = state.table.entry(paths::UPDATE_INDEX) {
            write_entry(&mut self.sink, entry.path(), entry.value(), &entry.text())?;
        }

        if let (Some(timeout), Some(idle)) = (self.config.idle_timeout, state.session.idle_for(now)) {
            if idle > timeout {
                error!(
                    idle_secs = idle.as_secs(),
                    timeout_secs = timeout.as_secs(),
                    "no fresh battery data, stopping"
                );
                return Err(PublishError::StaleData { idle, timeout });
            }
        }

        Ok(TickOutcome {
            flushed,
            update_index: self.update_index,
        })
    }

    /// Ticks at the configured period until shutdown or a fatal error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PublishError> {
        let mut ticker = interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = self.config.period.as_millis() as u64, "publisher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(tokio::time::Instant::now().into_std())?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("publisher shutdown requested");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

fn write_entry<S: PropertySink>(
    sink: &mut S,
    path: &str,
    value: Option<&Scalar>,
    text: &str,
) -> Result<(), PublishError> {
    sink.write(path, value, text)
        .map_err(|source| PublishError::InvalidPropertyWrite {
            path: path.to_string(),
            source,
        })
}

/// Blocks until the first well-formed message has been ingested.
///
/// Logs every `poll`, escalating to a warning on every twelfth poll. With an
/// idle timeout the wait gives up once that much time has passed.
pub async fn wait_for_first_message(
    state: &Shared<BridgeState>,
    idle_timeout: Option<Duration>,
    poll: Duration,
) -> Result<(), PublishError> {
    let started = tokio::time::Instant::now();
    let mut polls = 0u64;

    loop {
        if state.lock().session.last_message_at.is_some() {
            info!(waited_ms = started.elapsed().as_millis() as u64, "first battery data received");
            return Ok(());
        }

        let waited = started.elapsed();
        if let Some(timeout) = idle_timeout {
            if waited > timeout {
                error!(waited_secs = waited.as_secs(), "no battery data received, stopping");
                return Err(PublishError::NoFirstMessage { waited });
            }
        }

        if polls > 0 && polls % 12 == 0 {
            warn!(waited_secs = waited.as_secs(), "still waiting for first battery data");
        } else {
            info!(poll_secs = poll.as_secs(), "waiting for first battery data");
        }
        polls += 1;
        sleep(poll).await;
    }
}
