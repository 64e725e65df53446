use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use derivation::DerivationEngine;
use mqtt_session::InboundMessage;
use payload_normalizer::{normalize, NormalizeError};
use property_table::schema::paths;
use publisher::{BridgeState, Shared};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Accepted; `changed` counts table values that differ from before.
    Applied { changed: usize, skipped: usize },
    Empty,
    Rejected,
}

impl IngestOutcome {
    fn label(self) -> &'static str {
        match self {
            IngestOutcome::Applied { .. } => "applied",
            IngestOutcome::Empty => "empty",
            IngestOutcome::Rejected => "rejected",
        }
    }
}

/// Single consumer of inbound messages. Each message is normalized, applied
/// and derived under one lock so the publisher never sees half an update.
pub struct Ingestor {
    state: Shared<BridgeState>,
    engine: DerivationEngine,
}

impl Ingestor {
    pub fn new(state: Shared<BridgeState>, engine: DerivationEngine) -> Self {
        Self { state, engine }
    }

    pub fn handle(&self, payload: &[u8], now: Instant) -> IngestOutcome {
        let outcome = self.process(payload, now);
        metrics::counter!("bridge_messages_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    fn process(&self, payload: &[u8], now: Instant) -> IngestOutcome {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let update = match normalize(payload, &state.table) {
            Ok(Some(update)) => update,
            Ok(None) => return IngestOutcome::Empty,
            Err(err @ NormalizeError::SchemaViolation { .. }) => {
                warn!(error = %err, "message dropped");
                return IngestOutcome::Rejected;
            }
            Err(err) => {
                error!(error = %err, "message dropped");
                return IngestOutcome::Rejected;
            }
        };

        let applied = match update.apply(&mut state.table) {
            Ok(changed) => changed,
            Err(err) => {
                error!(error = %err, "payload write rejected by property table");
                return IngestOutcome::Rejected;
            }
        };
        let derived = match self.engine.apply(
            &update,
            &mut state.table,
            &mut state.session.time_to_go_last_recalc_at,
            now,
        ) {
            Ok(derived) => derived,
            Err(err) => {
                error!(error = %err, "derived write rejected by property table");
                return IngestOutcome::Rejected;
            }
        };

        state.session.record_message(now);
        debug!(
            changed = applied + derived.changed,
            skipped = update.skipped(),
            time_to_go = derived.time_to_go_recalculated,
            soc = ?state.table.number(paths::SOC),
            voltage = ?state.table.number(paths::DC_VOLTAGE),
            "message applied"
        );
        IngestOutcome::Applied {
            changed: applied + derived.changed,
            skipped: update.skipped(),
        }
    }
}

/// Drains the inbound channel until it closes or shutdown is signalled.
pub async fn ingest_task(
    ingestor: Ingestor,
    mut receiver: mpsc::Receiver<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe_message = receiver.recv() => {
                let Some(message) = maybe_message else {
                    info!("inbound channel closed");
                    break;
                };
                ingestor.handle(&message.payload, tokio::time::Instant::now().into_std());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("ingest shutdown requested");
                    break;
                }
            }
        }
    }
}
