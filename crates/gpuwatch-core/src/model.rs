use crate::error::DecodeError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub index: u32,
    pub name: String,
    #[serde(rename = "temp")]
    pub temperature: f64,
    #[serde(rename = "util")]
    pub utilization_percent: f64,
    #[serde(rename = "memory_used")]
    pub memory_used_mib: f64,
    #[serde(rename = "memory_total")]
    pub memory_total_mib: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceType {
    Llm,
    Stt,
    Tts,
    #[default]
    Unknown,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Llm => "llm",
            ServiceType::Stt => "stt",
            ServiceType::Tts => "tts",
            ServiceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = std::convert::Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(match input.trim().to_ascii_lowercase().as_str() {
            "llm" => ServiceType::Llm,
            "stt" => ServiceType::Stt,
            "tts" => ServiceType::Tts,
            _ => ServiceType::Unknown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = std::convert::Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(match input.trim().to_ascii_lowercase().as_str() {
            "healthy" => ServiceStatus::Healthy,
            "unhealthy" => ServiceStatus::Unhealthy,
            _ => ServiceStatus::Unknown,
        })
    }
}

macro_rules! lenient_enum_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = Option::<String>::deserialize(deserializer)?;
                Ok(raw
                    .map(|value| value.parse().unwrap_or_default())
                    .unwrap_or_default())
            }
        }
    };
}

lenient_enum_serde!(ServiceType);
lenient_enum_serde!(ServiceStatus);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub port: u16,
    #[serde(default)]
    pub model: String,
    #[serde(rename = "type", default)]
    pub kind: ServiceType,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(rename = "gpus", default)]
    pub device_indices: Vec<u32>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Service {
    pub fn claims(&self, device_index: u32) -> bool {
        self.device_indices.contains(&device_index)
    }
}

/// One complete report from the backend. Replaced wholesale on every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "gpus", default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Snapshot {
    pub fn validate(&self) -> Result<(), DecodeError> {
        let mut seen = HashSet::with_capacity(self.devices.len());
        for device in &self.devices {
            if !seen.insert(device.index) {
                return Err(DecodeError::DuplicateIndex(device.index));
            }
            let used = device.memory_used_mib;
            let total = device.memory_total_mib;
            if !(0.0..=total).contains(&used) {
                return Err(DecodeError::MemoryOutOfRange {
                    index: device.index,
                    used,
                    total,
                });
            }
        }
        Ok(())
    }

    pub fn device(&self, index: u32) -> Option<&Device> {
        self.devices.iter().find(|device| device.index == index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Live",
            ConnectionStatus::Connecting => "...",
            ConnectionStatus::Disconnected => "Offline",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Backends emit both offset-qualified and naive timestamps; naive ones are UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
