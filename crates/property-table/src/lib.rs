//! Canonical path → value table mirrored onto the local bus.
//!
//! The path set is closed: it is fixed when the table is built and only the
//! values change afterwards. Each path carries the [`Format`] used to render
//! it and to type-check writes.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use types::Scalar;

mod format;
pub mod schema;

pub use format::Format;
pub use schema::{PathSpec, CELL_COUNT};

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("duplicate path {0} in schema")]
    DuplicatePath(String),
    #[error("path {0} is not part of the schema")]
    UnknownPath(String),
    #[error("invalid property write: {value} is not accepted by {path}")]
    InvalidPropertyWrite { path: String, value: Scalar },
}

#[derive(Debug, Clone)]
pub struct PropertyEntry {
    path: String,
    value: Option<Scalar>,
    format: Format,
}

impl PropertyEntry {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> Option<&Scalar> {
        self.value.as_ref()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn text(&self) -> String {
        self.format.render(self.value.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct PropertyTable {
    entries: Vec<PropertyEntry>,
    index: HashMap<String, usize>,
}

impl PropertyTable {
    pub fn new(specs: impl IntoIterator<Item = PathSpec>) -> Result<Self, TableError> {
        let mut entries = Vec::new();
        let mut index = HashMap::new();

        for spec in specs {
            if index.contains_key(&spec.path) {
                return Err(TableError::DuplicatePath(spec.path));
            }
            if let Some(initial) = &spec.initial {
                if !spec.format.accepts(initial) {
                    return Err(TableError::InvalidPropertyWrite {
                        path: spec.path,
                        value: initial.clone(),
                    });
                }
            }
            index.insert(spec.path.clone(), entries.len());
            entries.push(PropertyEntry {
                path: spec.path,
                value: spec.initial,
                format: spec.format,
            });
        }

        Ok(Self { entries, index })
    }

    /// Table holding every battery path.
    pub fn battery() -> Result<Self, TableError> {
        Self::new(schema::battery_schema())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn entry(&self, path: &str) -> Option<&PropertyEntry> {
        self.index.get(path).map(|idx| &self.entries[*idx])
    }

    pub fn get(&self, path: &str) -> Option<&Scalar> {
        self.entry(path).and_then(PropertyEntry::value)
    }

    /// Numeric view of a path; absent and text values yield `None`.
    pub fn number(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Scalar::as_f64)
    }

    pub fn format(&self, path: &str) -> Option<Format> {
        self.entry(path).map(PropertyEntry::format)
    }

    /// Checks a prospective write against the path's formatter without applying it.
    pub fn check(&self, path: &str, value: Option<&Scalar>) -> Result<(), TableError> {
        let entry = self
            .entry(path)
            .ok_or_else(|| TableError::UnknownPath(path.to_string()))?;
        match value {
            Some(value) if !entry.format.accepts(value) => Err(TableError::InvalidPropertyWrite {
                path: path.to_string(),
                value: value.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Replaces the value at `path`, returning whether it changed.
    pub fn set(&mut self, path: &str, value: Option<Scalar>) -> Result<bool, TableError> {
        self.check(path, value.as_ref())?;
        let idx = self.index[path];
        let entry = &mut self.entries[idx];
        if entry.value == value {
            return Ok(false);
        }
        debug!(path, ?value, "property updated");
        entry.value = value;
        Ok(true)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyEntry> {
        self.entries.iter()
    }
}
