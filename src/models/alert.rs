//! Classified alert records.

use crate::models::sensor::{SensorReading, SensorValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const UNKNOWN_PLACEHOLDER: &str = "Unknown";
pub const FALLBACK_TITLE: &str = "Power Failure Alert";

/// Internal alert category. This is what gets stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    Domestic,
    Public,
    Transformer,
}

/// Category shown to end users. Transformer alerts are listed under Public.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayType {
    Domestic,
    Public,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Domestic => "Domestic",
            AlertKind::Public => "Public",
            AlertKind::Transformer => "Transformer",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            AlertKind::Domestic => "Domestic Power Failure",
            AlertKind::Public => "Public Power Failure",
            AlertKind::Transformer => "Transformer Failure Alert",
        }
    }

    pub fn display_type(self) -> DisplayType {
        match self {
            AlertKind::Domestic => DisplayType::Domestic,
            AlertKind::Public | AlertKind::Transformer => DisplayType::Public,
        }
    }

    /// Kind of a stored alert. Documents without a recognisable type are
    /// attributed from their source id: `h22` is the known domestic node,
    /// everything else is public.
    pub fn resolve(stored: Option<&str>, source_id: &str) -> AlertKind {
        match stored.map(str::parse::<AlertKind>) {
            Some(Ok(kind)) => kind,
            _ if source_id.eq_ignore_ascii_case("h22") => AlertKind::Domestic,
            _ => AlertKind::Public,
        }
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Domestic" => Ok(AlertKind::Domestic),
            "Public" => Ok(AlertKind::Public),
            "Transformer" => Ok(AlertKind::Transformer),
            other => Err(format!("unknown alert type: {}", other)),
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DisplayType {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayType::Domestic => "Domestic",
            DisplayType::Public => "Public",
        }
    }
}

impl fmt::Display for DisplayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the failing unit sits: a free-text location for domestic/public
/// nodes, an electrical phase for transformers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Location(String),
    Phase(String),
}

impl Placement {
    pub fn location(&self) -> Option<&str> {
        match self {
            Placement::Location(s) => Some(s),
            Placement::Phase(_) => None,
        }
    }

    pub fn phase(&self) -> Option<&str> {
        match self {
            Placement::Phase(s) => Some(s),
            Placement::Location(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub temperature: SensorValue,
    pub humidity: SensorValue,
    pub rain: SensorValue,
}

/// Output of the classification engine for one off-transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: AlertKind,
    pub reason: String,
}

/// Durable alert document. Never updated after it has been written.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub title: String,
    pub kind: AlertKind,
    pub source_id: String,
    pub placement: Placement,
    pub sensor_snapshot: SensorSnapshot,
    pub categorization_reason: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl AlertRecord {
    pub fn new(reading: &SensorReading, classification: Classification, created_at: DateTime<Utc>) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_else(|| UNKNOWN_PLACEHOLDER.to_string());
        let site = text(&reading.site);
        let placement = match classification.kind {
            AlertKind::Transformer => Placement::Phase(site),
            AlertKind::Domestic | AlertKind::Public => Placement::Location(site),
        };
        AlertRecord {
            title: classification.kind.title().to_string(),
            kind: classification.kind,
            source_id: text(&reading.id),
            placement,
            sensor_snapshot: SensorSnapshot {
                temperature: reading.temperature.clone(),
                humidity: reading.humidity.clone(),
                rain: reading.rain.clone(),
            },
            categorization_reason: classification.reason,
            created_at,
            is_read: false,
        }
    }

    pub fn display_type(&self) -> DisplayType {
        self.kind.display_type()
    }
}
