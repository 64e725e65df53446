mod config;
mod ingest;

pub use config::{BridgeConfig, LogLevel};
pub use ingest::{ingest_task, IngestOutcome, Ingestor};
