use serde::{Deserialize, Serialize};

use types::AlarmLevel;

/// Critical/warning bounds for the voltage and SoC alarms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmThresholds {
    pub voltage_low_critical: f64,
    pub voltage_low_warning: f64,
    pub voltage_high_warning: f64,
    pub voltage_high_critical: f64,
    pub low_soc_critical: f64,
    pub low_soc_warning: f64,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            voltage_low_critical: 46.0,
            voltage_low_warning: 47.5,
            voltage_high_warning: 56.5,
            voltage_high_critical: 57.5,
            low_soc_critical: 10.0,
            low_soc_warning: 20.0,
        }
    }
}

/// Level for a lower bound. A missing or zero reading means "no data yet" and is OK.
pub fn low_alarm(value: Option<f64>, critical: f64, warning: f64) -> AlarmLevel {
    match value {
        None => AlarmLevel::Ok,
        Some(v) if v == 0.0 => AlarmLevel::Ok,
        Some(v) if v < critical => AlarmLevel::Alarm,
        Some(v) if v < warning => AlarmLevel::Warning,
        Some(_) => AlarmLevel::Ok,
    }
}

/// Level for an upper bound, same zero rule as [`low_alarm`].
pub fn high_alarm(value: Option<f64>, critical: f64, warning: f64) -> AlarmLevel {
    match value {
        None => AlarmLevel::Ok,
        Some(v) if v == 0.0 => AlarmLevel::Ok,
        Some(v) if v > critical => AlarmLevel::Alarm,
        Some(v) if v > warning => AlarmLevel::Warning,
        Some(_) => AlarmLevel::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_alarm_levels() {
        assert_eq!(low_alarm(Some(45.0), 46.0, 47.5), AlarmLevel::Alarm);
        assert_eq!(low_alarm(Some(47.0), 46.0, 47.5), AlarmLevel::Warning);
        assert_eq!(low_alarm(Some(46.0), 46.0, 47.5), AlarmLevel::Warning);
        assert_eq!(low_alarm(Some(47.5), 46.0, 47.5), AlarmLevel::Ok);
        assert_eq!(low_alarm(Some(0.0), 46.0, 47.5), AlarmLevel::Ok);
        assert_eq!(low_alarm(None, 46.0, 47.5), AlarmLevel::Ok);
    }

    #[test]
    fn high_alarm_levels() {
        assert_eq!(high_alarm(Some(58.0), 57.5, 56.5), AlarmLevel::Alarm);
        assert_eq!(high_alarm(Some(57.0), 57.5, 56.5), AlarmLevel::Warning);
        assert_eq!(high_alarm(Some(56.5), 57.5, 56.5), AlarmLevel::Ok);
        assert_eq!(high_alarm(Some(0.0), 57.5, 56.5), AlarmLevel::Ok);
    }
}
