use types::Scalar;

use crate::Format;

/// Number of per-cell voltage and balance paths exposed.
pub const CELL_COUNT: usize = 24;

/// Top-level payload keys that belong to bus metadata registered elsewhere.
pub const IGNORED_KEYS: &[&str] = &[
    "DeviceInstance",
    "ProductId",
    "ProductName",
    "CustomName",
    "FirmwareVersion",
    "HardwareVersion",
    "Serial",
    "Connected",
    "Mgmt",
    "Latency",
    "UpdateIndex",
];

pub fn is_ignored(key: &str) -> bool {
    IGNORED_KEYS.contains(&key)
}

pub mod paths {
    pub const DC_POWER: &str = "/Dc/0/Power";
    pub const DC_VOLTAGE: &str = "/Dc/0/Voltage";
    pub const DC_CURRENT: &str = "/Dc/0/Current";

    pub const INSTALLED_CAPACITY: &str = "/InstalledCapacity";
    pub const CONSUMED_AMPHOURS: &str = "/ConsumedAmphours";
    pub const CAPACITY: &str = "/Capacity";
    pub const SOC: &str = "/Soc";
    pub const TIME_TO_GO: &str = "/TimeToGo";

    pub const ALARM_LOW_VOLTAGE: &str = "/Alarms/LowVoltage";
    pub const ALARM_HIGH_VOLTAGE: &str = "/Alarms/HighVoltage";
    pub const ALARM_LOW_SOC: &str = "/Alarms/LowSoc";

    pub const MIN_CELL_VOLTAGE: &str = "/System/MinCellVoltage";
    pub const MIN_VOLTAGE_CELL_ID: &str = "/System/MinVoltageCellId";
    pub const MAX_CELL_VOLTAGE: &str = "/System/MaxCellVoltage";
    pub const MAX_VOLTAGE_CELL_ID: &str = "/System/MaxVoltageCellId";

    pub const VOLTAGES_SUM: &str = "/Voltages/Sum";
    pub const VOLTAGES_DIFF: &str = "/Voltages/Diff";

    pub const UPDATE_INDEX: &str = "/UpdateIndex";
}

pub fn cell_voltage_path(index: usize) -> String {
    format!("/Voltages/Cell{index}")
}

pub fn cell_balance_path(index: usize) -> String {
    format!("/Balances/Cell{index}")
}

/// Declaration of one path of the closed schema.
#[derive(Debug, Clone)]
pub struct PathSpec {
    pub path: String,
    pub format: Format,
    pub initial: Option<Scalar>,
}

impl PathSpec {
    pub fn new(path: impl Into<String>, format: Format) -> Self {
        Self {
            path: path.into(),
            format,
            initial: None,
        }
    }

    pub fn with_initial(mut self, value: impl Into<Scalar>) -> Self {
        self.initial = Some(value.into());
        self
    }
}

const DC: &[(&str, Format)] = &[
    ("Power", Format::Watt),
    ("Voltage", Format::Volt),
    ("Current", Format::Amp),
    ("Temperature", Format::Celsius),
    ("MidVoltage", Format::Volt),
    ("MidVoltageDeviation", Format::Percent),
];

const TOP_LEVEL: &[(&str, Format)] = &[
    ("InstalledCapacity", Format::AmpHour),
    ("ConsumedAmphours", Format::AmpHour),
    ("Capacity", Format::AmpHour),
    ("Soc", Format::Percent),
    ("Soh", Format::Percent),
    ("TimeToGo", Format::Number),
];

const INFO: &[(&str, Format)] = &[
    ("MaxChargeVoltage", Format::Volt),
    ("MaxChargeCurrent", Format::Amp),
    ("MaxDischargeCurrent", Format::Amp),
    ("BatteryLowVoltage", Format::Volt),
    ("ChargeRequest", Format::Number),
];

const ALARMS: &[&str] = &[
    "LowVoltage",
    "HighVoltage",
    "LowSoc",
    "HighChargeCurrent",
    "HighDischargeCurrent",
    "HighCurrent",
    "CellImbalance",
    "HighChargeTemperature",
    "LowChargeTemperature",
    "LowCellVoltage",
    "LowTemperature",
    "HighTemperature",
    "FuseBlown",
    "InternalFailure",
];

const HISTORY: &[(&str, Format)] = &[
    ("DeepestDischarge", Format::AmpHour),
    ("LastDischarge", Format::AmpHour),
    ("AverageDischarge", Format::AmpHour),
    ("ChargeCycles", Format::Number),
    ("FullDischarges", Format::Number),
    ("TotalAhDrawn", Format::AmpHour),
    ("MinimumVoltage", Format::Volt),
    ("MaximumVoltage", Format::Volt),
    ("MinimumCellVoltage", Format::Volt),
    ("MaximumCellVoltage", Format::Volt),
    ("TimeSinceLastFullCharge", Format::Number),
    ("AutomaticSyncs", Format::Number),
    ("LowVoltageAlarms", Format::Number),
    ("HighVoltageAlarms", Format::Number),
    ("DischargedEnergy", Format::KiloWattHour),
    ("ChargedEnergy", Format::KiloWattHour),
];

const SYSTEM: &[(&str, Format)] = &[
    ("MinVoltageCellId", Format::Text),
    ("MinCellVoltage", Format::Volt),
    ("MaxVoltageCellId", Format::Text),
    ("MaxCellVoltage", Format::Volt),
    ("MinTemperatureCellId", Format::Text),
    ("MinCellTemperature", Format::Celsius),
    ("MaxTemperatureCellId", Format::Text),
    ("MaxCellTemperature", Format::Celsius),
    ("MOSTemperature", Format::Celsius),
    ("NrOfCellsPerBattery", Format::Number),
    ("NrOfModulesOnline", Format::Number),
    ("NrOfModulesOffline", Format::Number),
    ("NrOfModulesBlockingCharge", Format::Number),
    ("NrOfModulesBlockingDischarge", Format::Number),
];

const IO: &[&str] = &["AllowToCharge", "AllowToDischarge", "AllowToBalance", "ExternalRelay"];

/// The full battery path list in publication order.
pub fn battery_schema() -> Vec<PathSpec> {
    let mut specs = Vec::with_capacity(128);

    for (key, format) in DC {
        specs.push(PathSpec::new(format!("/Dc/0/{key}"), *format));
    }
    for (key, format) in TOP_LEVEL {
        specs.push(PathSpec::new(format!("/{key}"), *format));
    }
    for (key, format) in INFO {
        specs.push(PathSpec::new(format!("/Info/{key}"), *format));
    }
    for key in ALARMS {
        specs.push(PathSpec::new(format!("/Alarms/{key}"), Format::Number).with_initial(0i64));
    }
    for (key, format) in HISTORY {
        specs.push(PathSpec::new(format!("/History/{key}"), *format));
    }
    for (key, format) in SYSTEM {
        let spec = PathSpec::new(format!("/System/{key}"), *format);
        let spec = match *key {
            "NrOfModulesOnline" => spec.with_initial(1i64),
            "NrOfModulesOffline" => spec.with_initial(0i64),
            _ => spec,
        };
        specs.push(spec);
    }
    for key in IO {
        specs.push(PathSpec::new(format!("/Io/{key}"), Format::Number));
    }
    for index in 1..=CELL_COUNT {
        specs.push(PathSpec::new(cell_voltage_path(index), Format::Volt));
    }
    specs.push(PathSpec::new(paths::VOLTAGES_SUM, Format::Volt));
    specs.push(PathSpec::new(paths::VOLTAGES_DIFF, Format::Volt));
    for index in 1..=CELL_COUNT {
        specs.push(PathSpec::new(cell_balance_path(index), Format::Number));
    }
    specs.push(PathSpec::new(paths::UPDATE_INDEX, Format::Number).with_initial(0i64));

    specs
}
