use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod hub;
pub mod serial;
pub mod simulator;
pub mod source;

pub use hub::{HubSubscription, TelemetryHub, SUBSCRIBER_QUEUE};
pub use serial::{SerialCommand, SerialReader, SerialState, SerialStatus};
pub use source::SourceSupervisor;

/// Channel values for one sample instant, keyed by sensor id.
pub type ChannelMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Simulated,
    Serial,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Simulated => "simulated",
            SourceKind::Serial => "serial",
        }
    }
}

/// One telemetry sample across all enabled channels, as serialized to
/// WebSocket subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    /// Seconds since the UNIX epoch, UTC.
    pub timestamp: f64,
    pub source: SourceKind,
    pub channels: ChannelMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Csv,
    MotecBinary,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePreference {
    Auto,
    Serial,
    Simulated,
}

impl SourcePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePreference::Auto => "auto",
            SourcePreference::Serial => "serial",
            SourcePreference::Simulated => "simulated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(SourcePreference::Auto),
            "serial" => Some(SourcePreference::Serial),
            "simulated" => Some(SourcePreference::Simulated),
            _ => None,
        }
    }
}

/// Persisted serial-port configuration (singleton).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_format: DataFormat,
    /// Positional sensor ids for CSV columns and binary frame ids.
    #[serde(default)]
    pub csv_channel_order: Vec<String>,
    #[serde(default = "default_separator")]
    pub csv_separator: String,
    /// Read timeout in seconds before the reader enters `error`.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Seconds to wait in `error` before reconnecting.
    #[serde(default = "default_reconnect")]
    pub reconnect_interval: f64,
}

fn default_separator() -> String {
    ",".to_string()
}

fn default_timeout() -> f64 {
    2.0
}

fn default_reconnect() -> f64 {
    5.0
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            data_format: DataFormat::Auto,
            csv_channel_order: Vec::new(),
            csv_separator: default_separator(),
            timeout: default_timeout(),
            reconnect_interval: default_reconnect(),
        }
    }
}
