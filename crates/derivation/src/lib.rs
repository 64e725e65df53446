//! Fills in values a payload did not carry and evaluates the alarm levels.
//!
//! Runs after a [`PayloadUpdate`] has been applied, reading the mix of fresh
//! and retained values from the [`PropertyTable`] and writing the derived
//! paths back into it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use payload_normalizer::PayloadUpdate;
use property_table::schema::paths;
use property_table::{PropertyTable, TableError};
use types::{AlarmLevel, Scalar};

mod alarms;

pub use alarms::{high_alarm, low_alarm, AlarmThresholds};

/// Time-to-go reported while the current is exactly zero: 30 days.
pub const TIME_TO_GO_IDLE_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivationConfig {
    pub time_to_go_enabled: bool,
    /// SoC percentage treated as "empty" when discharging.
    pub low_soc_threshold: f64,
    pub time_to_go_interval: Duration,
    pub thresholds: AlarmThresholds,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            time_to_go_enabled: true,
            low_soc_threshold: 10.0,
            time_to_go_interval: Duration::from_secs(60),
            thresholds: AlarmThresholds::default(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Derivation {
    /// Number of table values that changed.
    pub changed: usize,
    pub time_to_go_recalculated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellExtremes {
    pub min_index: usize,
    pub min: f64,
    pub max_index: usize,
    pub max: f64,
    pub sum: f64,
}

pub struct DerivationEngine {
    config: DerivationConfig,
}

impl DerivationEngine {
    pub fn new(config: DerivationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DerivationConfig {
        &self.config
    }

    /// Derives every missing value for `update` and re-evaluates the alarms.
    ///
    /// `last_time_to_go` is only advanced when time-to-go is actually recalculated.
    pub fn apply(
        &self,
        update: &PayloadUpdate,
        table: &mut PropertyTable,
        last_time_to_go: &mut Option<Instant>,
        now: Instant,
    ) -> Result<Derivation, TableError> {
        let mut out = Derivation::default();
        let changed = &mut out.changed;
        let mut write = |table: &mut PropertyTable, path: &str, value: Scalar| -> Result<(), TableError> {
            if table.set(path, Some(value))? {
                *changed += 1;
            }
            Ok(())
        };

        if !update.supplies(paths::DC_CURRENT) {
            let current = current_from_power(
                table.number(paths::DC_POWER),
                table.number(paths::DC_VOLTAGE),
            );
            write(table, paths::DC_CURRENT, Scalar::Float(current))?;
        }

        for (path, value) in capacity_writes(update, table) {
            write(table, path, Scalar::Float(value))?;
        }

        if self.time_to_go_due(update, *last_time_to_go, now) {
            if let (Some(current), Some(installed), Some(capacity)) = (
                table.number(paths::DC_CURRENT),
                table.number(paths::INSTALLED_CAPACITY),
                table.number(paths::CAPACITY),
            ) {
                let seconds =
                    time_to_go(current, installed, capacity, self.config.low_soc_threshold);
                write(table, paths::TIME_TO_GO, Scalar::Int(seconds))?;
                *last_time_to_go = Some(now);
                out.time_to_go_recalculated = true;
                debug!(current, capacity, seconds, "time to go recalculated");
            }
        }

        if let Some(cells) = cell_extremes(update.cell_voltages()) {
            if !update.supplies(paths::MIN_CELL_VOLTAGE) {
                write(table, paths::MIN_CELL_VOLTAGE, Scalar::Float(cells.min))?;
                if !update.supplies(paths::MIN_VOLTAGE_CELL_ID) {
                    write(table, paths::MIN_VOLTAGE_CELL_ID, cell_id(cells.min_index))?;
                }
            }
            if !update.supplies(paths::MAX_CELL_VOLTAGE) {
                write(table, paths::MAX_CELL_VOLTAGE, Scalar::Float(cells.max))?;
                if !update.supplies(paths::MAX_VOLTAGE_CELL_ID) {
                    write(table, paths::MAX_VOLTAGE_CELL_ID, cell_id(cells.max_index))?;
                }
            }
            if !update.supplies(paths::VOLTAGES_SUM) {
                write(table, paths::VOLTAGES_SUM, Scalar::Float(round_to(cells.sum, 3)))?;
            }
            if !update.supplies(paths::VOLTAGES_DIFF) {
                if let (Some(min), Some(max)) = (
                    table.number(paths::MIN_CELL_VOLTAGE),
                    table.number(paths::MAX_CELL_VOLTAGE),
                ) {
                    write(table, paths::VOLTAGES_DIFF, Scalar::Float(round_to(max - min, 3)))?;
                }
            }
        }

        for (path, level) in self.alarm_levels(table) {
            write(table, path, level.into())?;
        }

        Ok(out)
    }

    /// Evaluates the voltage and SoC alarms against the current table values.
    pub fn alarm_levels(&self, table: &PropertyTable) -> [(&'static str, AlarmLevel); 3] {
        let t = &self.config.thresholds;
        let voltage = table.number(paths::DC_VOLTAGE);
        let soc = table.number(paths::SOC);
        [
            (
                paths::ALARM_LOW_VOLTAGE,
                low_alarm(voltage, t.voltage_low_critical, t.voltage_low_warning),
            ),
            (
                paths::ALARM_HIGH_VOLTAGE,
                high_alarm(voltage, t.voltage_high_critical, t.voltage_high_warning),
            ),
            (
                paths::ALARM_LOW_SOC,
                low_alarm(soc, t.low_soc_critical, t.low_soc_warning),
            ),
        ]
    }

    fn time_to_go_due(&self, update: &PayloadUpdate, last: Option<Instant>, now: Instant) -> bool {
        if !self.config.time_to_go_enabled || update.supplies(paths::TIME_TO_GO) {
            return false;
        }
        match last {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.config.time_to_go_interval,
        }
    }
}

/// `power / voltage` rounded to milliamps, or 0 without a usable voltage.
pub fn current_from_power(power: Option<f64>, voltage: Option<f64>) -> f64 {
    match voltage {
        Some(v) if v != 0.0 => round_to(power.unwrap_or(0.0) / v, 3),
        _ => 0.0,
    }
}

fn capacity_writes(update: &PayloadUpdate, table: &PropertyTable) -> Vec<(&'static str, f64)> {
    let has_consumed = update.supplies(paths::CONSUMED_AMPHOURS);
    let has_capacity = update.supplies(paths::CAPACITY);
    let consumed = table.number(paths::CONSUMED_AMPHOURS);
    let capacity = table.number(paths::CAPACITY);
    let mut installed = table.number(paths::INSTALLED_CAPACITY);
    let mut writes = Vec::new();

    if !update.supplies(paths::INSTALLED_CAPACITY) && has_consumed && has_capacity {
        if let (Some(consumed), Some(capacity)) = (consumed, capacity) {
            let value = round_to(capacity + consumed, 2);
            installed = Some(value);
            writes.push((paths::INSTALLED_CAPACITY, value));
        }
    }

    let Some(installed) = installed else {
        return writes;
    };

    match (has_consumed, has_capacity) {
        (true, false) => {
            if let Some(consumed) = consumed {
                writes.push((paths::CAPACITY, round_to(installed - consumed, 2)));
            }
        }
        (false, true) => {
            if let Some(capacity) = capacity {
                writes.push((paths::CONSUMED_AMPHOURS, round_to(installed - capacity, 2)));
            }
        }
        (false, false) => {
            if let Some(soc) = table.number(paths::SOC) {
                let capacity = round_to(installed * soc / 100.0, 2);
                writes.push((paths::CAPACITY, capacity));
                writes.push((paths::CONSUMED_AMPHOURS, round_to(installed - capacity, 2)));
            }
        }
        (true, true) => {}
    }

    writes
}

/// Seconds until full (charging) or until `low_soc_threshold` (discharging).
pub fn time_to_go(current: f64, installed: f64, capacity: f64, low_soc_threshold: f64) -> i64 {
    let hours = if current > 0.0 {
        (installed - capacity) / current
    } else if current < 0.0 {
        (capacity - installed * low_soc_threshold / 100.0) / current
    } else {
        return TIME_TO_GO_IDLE_SECS;
    };
    (hours * 3600.0).abs().round() as i64
}

/// Min/max (first occurrence wins on ties) and sum of the known cell voltages.
pub fn cell_extremes(cells: &[(usize, f64)]) -> Option<CellExtremes> {
    let (&(first_index, first), rest) = cells.split_first()?;
    let mut stats = CellExtremes {
        min_index: first_index,
        min: first,
        max_index: first_index,
        max: first,
        sum: first,
    };
    for &(index, voltage) in rest {
        if voltage < stats.min {
            stats.min = voltage;
            stats.min_index = index;
        }
        if voltage > stats.max {
            stats.max = voltage;
            stats.max_index = index;
        }
        stats.sum += voltage;
    }
    Some(stats)
}

fn cell_id(index: usize) -> Scalar {
    Scalar::Text(format!("C{index}"))
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
