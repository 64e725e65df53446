use types::Scalar;

/// Text rendering attached to every published path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Watt,
    Volt,
    Amp,
    AmpHour,
    KiloWattHour,
    Percent,
    Celsius,
    /// Whole number without a unit (alarm levels, counters, time-to-go seconds).
    Number,
    /// Value rendered verbatim, any scalar accepted.
    Text,
}

impl Format {
    pub fn unit(self) -> &'static str {
        match self {
            Format::Watt => "W",
            Format::Volt => "V",
            Format::Amp => "A",
            Format::AmpHour => "Ah",
            Format::KiloWattHour => "kWh",
            Format::Percent => "%",
            Format::Celsius => "°C",
            Format::Number | Format::Text => "",
        }
    }

    /// Numeric formats reject text; the text format takes anything.
    pub fn accepts(self, value: &Scalar) -> bool {
        match self {
            Format::Text => true,
            _ => value.is_numeric(),
        }
    }

    pub fn render(self, value: Option<&Scalar>) -> String {
        let Some(value) = value else {
            return String::new();
        };

        match (self, value.as_f64()) {
            (Format::Text, _) | (_, None) => value.to_string(),
            (Format::Number, Some(number)) => round_to(number, 0),
            (_, Some(number)) => format!("{}{}", round_to(number, 2), self.unit()),
        }
    }
}

fn round_to(value: f64, places: i32) -> String {
    let factor = 10f64.powi(places);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        // avoid "-0"
        return "0".to_string();
    }
    format!("{rounded}")
}
