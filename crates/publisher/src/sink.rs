use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};

use property_table::Format;
use property_table::PropertyTable;
use types::{DeviceIdentity, Scalar};

pub const SERVICE_PREFIX: &str = "com.victronenergy.battery";
pub const PRODUCT_ID: i64 = 0xFFFF;

#[derive(Debug, Error, PartialEq)]
pub enum SinkError {
    #[error("service is not registered")]
    NotRegistered,
    #[error("service {0} is already registered")]
    AlreadyRegistered(String),
    #[error("path {0} is not exported by the service")]
    UnknownPath(String),
    #[error("value {value} does not match the type of {path}")]
    TypeMismatch { path: String, value: String },
}

/// Write-once management metadata exported next to the battery paths.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRegistration {
    pub service_name: String,
    pub process_name: String,
    pub process_version: String,
    pub connection: String,
    pub device_instance: u32,
    pub product_name: String,
    pub custom_name: String,
    pub firmware_version: String,
}

impl ServiceRegistration {
    pub fn battery(device: &DeviceIdentity) -> Self {
        Self {
            service_name: format!("{SERVICE_PREFIX}.{}", device.name),
            process_name: "mqtt-battery-bridge".to_string(),
            process_version: "0.1.0".to_string(),
            connection: "MQTT Battery service".to_string(),
            device_instance: device.instance,
            product_name: "MQTT Battery".to_string(),
            custom_name: "MQTT Battery".to_string(),
            firmware_version: "0.1.0".to_string(),
        }
    }

    pub fn with_process(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.process_name = name.into();
        self.process_version = version.into();
        self
    }

    pub fn metadata(&self) -> Vec<(&'static str, Scalar)> {
        vec![
            ("/Mgmt/ProcessName", Scalar::Text(self.process_name.clone())),
            ("/Mgmt/ProcessVersion", Scalar::Text(self.process_version.clone())),
            ("/Mgmt/Connection", Scalar::Text(self.connection.clone())),
            ("/DeviceInstance", Scalar::Int(i64::from(self.device_instance))),
            ("/ProductId", Scalar::Int(PRODUCT_ID)),
            ("/ProductName", Scalar::Text(self.product_name.clone())),
            ("/CustomName", Scalar::Text(self.custom_name.clone())),
            ("/FirmwareVersion", Scalar::Text(self.firmware_version.clone())),
            ("/Connected", Scalar::Int(1)),
        ]
    }
}

/// The IPC side of the bridge: a registered object tree accepting path writes.
pub trait PropertySink: Send {
    /// Exports the metadata and every table path with its initial value.
    fn register(
        &mut self,
        registration: &ServiceRegistration,
        table: &PropertyTable,
    ) -> Result<(), SinkError>;

    fn write(&mut self, path: &str, value: Option<&Scalar>, text: &str) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub value: Option<Scalar>,
    pub text: String,
}

/// Process-local service object, used when no system bus is attached and in tests.
#[derive(Debug, Default)]
pub struct InMemoryService {
    name: Option<String>,
    formats: HashMap<String, Format>,
    values: HashMap<String, Published>,
    writes: u64,
}

impl InMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn value(&self, path: &str) -> Option<&Scalar> {
        self.values.get(path).and_then(|published| published.value.as_ref())
    }

    pub fn text(&self, path: &str) -> Option<&str> {
        self.values.get(path).map(|published| published.text.as_str())
    }

    pub fn snapshot(&self) -> HashMap<String, Published> {
        self.values.clone()
    }

    /// Total writes since registration, including the registration itself.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// A change initiated by another process on the bus. Always accepted.
    pub fn external_write(&mut self, path: &str, value: Option<Scalar>) -> bool {
        debug!(path, value = ?value, "external update accepted");
        let text = match self.formats.get(path) {
            Some(format) => format.render(value.as_ref()),
            None => value.as_ref().map(ToString::to_string).unwrap_or_default(),
        };
        self.values.insert(path.to_string(), Published { value, text });
        true
    }

    fn store(&mut self, path: &str, value: Option<Scalar>, text: String) {
        self.values.insert(path.to_string(), Published { value, text });
        self.writes += 1;
    }
}

impl PropertySink for InMemoryService {
    fn register(
        &mut self,
        registration: &ServiceRegistration,
        table: &PropertyTable,
    ) -> Result<(), SinkError> {
        if let Some(name) = &self.name {
            return Err(SinkError::AlreadyRegistered(name.clone()));
        }

        for (path, value) in registration.metadata() {
            let text = value.to_string();
            self.store(path, Some(value), text);
        }
        for entry in table.iter() {
            self.formats.insert(entry.path().to_string(), entry.format());
            self.store(entry.path(), entry.value().cloned(), entry.text());
        }

        self.name = Some(registration.service_name.clone());
        info!(
            service = %registration.service_name,
            device_instance = registration.device_instance,
            paths = self.values.len(),
            "service registered"
        );
        Ok(())
    }

    fn write(&mut self, path: &str, value: Option<&Scalar>, text: &str) -> Result<(), SinkError> {
        if self.name.is_none() {
            return Err(SinkError::NotRegistered);
        }
        let format = *self
            .formats
            .get(path)
            .ok_or_else(|| SinkError::UnknownPath(path.to_string()))?;
        if let Some(value) = value {
            if !format.accepts(value) {
                return Err(SinkError::TypeMismatch {
                    path: path.to_string(),
                    value: value.to_string(),
                });
            }
        }
        self.store(path, value.cloned(), text.to_string());
        Ok(())
    }
}
