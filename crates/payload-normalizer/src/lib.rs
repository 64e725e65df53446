//! Turns raw battery JSON into property table writes.
//!
//! A payload is decoded into a [`Node`] tree, checked against the minimal
//! battery schema and flattened into `(path, value)` writes. Nothing is
//! written to the table here; [`PayloadUpdate::apply`] does that in one step
//! so a rejected payload never leaves partial state behind.
//!
//! Known upstream ambiguity: numeric zero and the empty string are treated as
//! "unknown" and written as absent. Consumers cannot tell a real zero reading
//! from missing data.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, warn};

use property_table::{PropertyTable, TableError};
use types::Scalar;

mod mapping;
mod node;

pub use node::{decode, Node};

/// Smallest payload accepted by the schema gate.
pub const MINIMAL_EXAMPLE: &str = r#"{"Dc":{"Power":321.6,"Voltage":52.7},"Soc":63}"#;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("schema violation: {reason}; minimal example: {MINIMAL_EXAMPLE}")]
    SchemaViolation { reason: String },
}

impl NormalizeError {
    fn schema(reason: impl Into<String>) -> Self {
        NormalizeError::SchemaViolation {
            reason: reason.into(),
        }
    }
}

/// Writes extracted from one accepted payload.
#[derive(Debug, Default, Clone)]
pub struct PayloadUpdate {
    writes: Vec<(String, Option<Scalar>)>,
    supplied: HashSet<String>,
    cell_voltages: Vec<(usize, f64)>,
    cell_map_present: bool,
    skipped: usize,
}

impl PayloadUpdate {
    pub fn writes(&self) -> &[(String, Option<Scalar>)] {
        &self.writes
    }

    /// Whether the payload carried a non-absent value for `path`.
    pub fn supplies(&self, path: &str) -> bool {
        self.supplied.contains(path)
    }

    /// Known per-cell voltages in payload order.
    pub fn cell_voltages(&self) -> &[(usize, f64)] {
        &self.cell_voltages
    }

    pub fn has_cell_map(&self) -> bool {
        self.cell_map_present
    }

    /// Number of fields dropped with a warning.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Applies every write, returning how many values changed.
    pub fn apply(&self, table: &mut PropertyTable) -> Result<usize, TableError> {
        let mut changed = 0;
        for (path, value) in &self.writes {
            if table.set(path, value.clone())? {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// Normalizes one raw message against `table`.
///
/// Returns `Ok(None)` for an empty payload.
pub fn normalize(raw: &[u8], table: &PropertyTable) -> Result<Option<PayloadUpdate>, NormalizeError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        warn!("received empty payload, ignoring");
        return Ok(None);
    }

    let root = decode(raw)?;
    check_schema(&root)?;

    let entries = root.as_map().unwrap_or_default();
    let update = mapping::flatten(entries, table);
    debug!(
        writes = update.writes.len(),
        skipped = update.skipped,
        cells = update.cell_voltages.len(),
        "payload normalized"
    );
    Ok(Some(update))
}

/// Requires `Soc` plus `Dc.Power`/`Dc.Voltage`, directly or under channel `"0"`.
pub fn check_schema(root: &Node) -> Result<(), NormalizeError> {
    if root.as_map().is_none() {
        return Err(NormalizeError::schema("payload is not a JSON object"));
    }
    if !mapping::is_present(root.get("Soc")) {
        return Err(NormalizeError::schema("missing Soc"));
    }

    let dc = root
        .get("Dc")
        .filter(|node| node.as_map().is_some())
        .ok_or_else(|| NormalizeError::schema("missing Dc object"))?;
    let has_power_and_voltage =
        |node: &Node| mapping::is_present(node.get("Power")) && mapping::is_present(node.get("Voltage"));

    if has_power_and_voltage(dc) || dc.get("0").map(has_power_and_voltage).unwrap_or(false) {
        Ok(())
    } else {
        Err(NormalizeError::schema("Dc must expose Power and Voltage"))
    }
}
