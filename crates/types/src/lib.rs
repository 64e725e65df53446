use std::fmt;

use serde::{Deserialize, Serialize};

/// A single published property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Text(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Scalar::Text(_))
    }

    /// Zero and the empty string are indistinguishable from "unknown" in the
    /// upstream payload format.
    pub fn is_falsy(&self) -> bool {
        match self {
            Scalar::Int(v) => *v == 0,
            Scalar::Float(v) => *v == 0.0,
            Scalar::Text(v) => v.is_empty(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

/// Three-level alarm state as exposed on the bus: 0 = OK, 1 = Warning, 2 = Alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlarmLevel {
    Ok = 0,
    Warning = 1,
    Alarm = 2,
}

impl AlarmLevel {
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl From<AlarmLevel> for Scalar {
    fn from(level: AlarmLevel) -> Self {
        Scalar::Int(level.code())
    }
}

/// Identity of the battery device registered on the local bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub instance: u32,
    pub name: String,
}
