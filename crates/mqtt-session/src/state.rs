use std::cmp::min;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Connection lifecycle: `Disconnected → Connecting → Connected ⇄ Disconnected`.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    state: ConnectionState,
    failures: u32,
    reconnects: u64,
}

impl ConnectionTracker {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful handshake.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn connecting(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connecting;
        self.state
    }

    pub fn connected(&mut self) -> ConnectionState {
        if self.failures > 0 {
            self.reconnects = self.reconnects.saturating_add(1);
        }
        self.failures = 0;
        self.state = ConnectionState::Connected;
        self.state
    }

    pub fn disconnected(&mut self) -> ConnectionState {
        self.failures = self.failures.saturating_add(1);
        self.state = ConnectionState::Disconnected;
        self.state
    }
}

/// Delay before reconnect attempt number `failures` (1-based).
///
/// Fixed at `base_ms` unless `max_ms` is larger, in which case it doubles per
/// failure up to `max_ms`.
pub fn reconnect_delay(base_ms: u64, max_ms: u64, failures: u32) -> Duration {
    let base = base_ms.max(1);
    let shift = failures.saturating_sub(1);
    let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let delay = base.saturating_mul(factor);
    Duration::from_millis(min(delay, max_ms.max(base)))
}

/// Connection and freshness bookkeeping shared by ingestion and publishing.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub connection: ConnectionState,
    pub last_message_at: Option<Instant>,
    pub last_published_at: Option<Instant>,
    pub time_to_go_last_recalc_at: Option<Instant>,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Marks arrival of a well-formed message, regardless of connection state.
    pub fn record_message(&mut self, now: Instant) {
        self.last_message_at = Some(now);
    }

    /// Time since the last well-formed message, `None` before the first one.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last_message_at
            .map(|at| now.saturating_duration_since(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_when_max_not_above_base() {
        assert_eq!(reconnect_delay(5_000, 5_000, 1), Duration::from_secs(5));
        assert_eq!(reconnect_delay(5_000, 0, 7), Duration::from_secs(5));
    }

    #[test]
    fn capped_backoff_when_max_above_base() {
        assert_eq!(reconnect_delay(1_000, 8_000, 1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1_000, 8_000, 3), Duration::from_secs(4));
        assert_eq!(reconnect_delay(1_000, 8_000, 90), Duration::from_secs(8));
    }
}
