//! Types for the realtime sensor channels.
//!
//! A channel is one physical monitored unit. Its state lives under a single
//! root node of the realtime key-value store, e.g.
//!
//! ```text
//! sensorData/Status       Transformer/Status
//! sensorData/ID           Transformer/Id
//! sensorData/Location     Transformer/Phase
//! sensorData/Temperature  Transformer/Tem
//! sensorData/Humidity     Transformer/Hum
//! sensorData/Rain         Transformer/Rain
//! ```

use crate::client::{FeedError, decode_value};
use crate::models::alert::UNKNOWN_PLACEHOLDER;
use crate::utils::json_text;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    DomesticOrPublic,
    Transformer,
}

/// Field names below a channel root.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChannelFields {
    pub status: &'static str,
    pub id: &'static str,
    /// `Location` for domestic/public nodes, `Phase` for transformers.
    pub site: &'static str,
    pub temperature: &'static str,
    pub humidity: &'static str,
    pub rain: &'static str,
}

const DOMESTIC_FIELDS: ChannelFields = ChannelFields {
    status: "Status",
    id: "ID",
    site: "Location",
    temperature: "Temperature",
    humidity: "Humidity",
    rain: "Rain",
};

const TRANSFORMER_FIELDS: ChannelFields = ChannelFields {
    status: "Status",
    id: "Id",
    site: "Phase",
    temperature: "Tem",
    humidity: "Hum",
    rain: "Rain",
};

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::DomesticOrPublic, ChannelKind::Transformer];

    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::DomesticOrPublic => "domestic",
            ChannelKind::Transformer => "transformer",
        }
    }

    pub fn fields(self) -> &'static ChannelFields {
        match self {
            ChannelKind::DomesticOrPublic => &DOMESTIC_FIELDS,
            ChannelKind::Transformer => &TRANSFORMER_FIELDS,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Power status reported by a channel. Anything other than 0 or 1 is treated
/// as unknown and represented by `None` at the call sites.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Off,
    On,
}

impl Status {
    pub fn from_value(value: Option<&Value>) -> Option<Status> {
        match value.and_then(Value::as_f64) {
            Some(v) if v == 0.0 => Some(Status::Off),
            Some(v) if v == 1.0 => Some(Status::On),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Off => "Off",
            Status::On => "On",
        }
    }
}

/// A channel-agnostic environmental value (temperature, humidity, rain).
///
/// Malformed inputs (NaN, objects, arrays, empty strings) collapse to
/// `Unknown` instead of failing the reading. `Unknown` is stored as the
/// `"Unknown"` placeholder and read back from it.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Number(f64),
    Flag(bool),
    Text(String),
    Unknown,
}

impl SensorValue {
    pub fn from_json(value: Option<&Value>) -> SensorValue {
        match value {
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => SensorValue::Number(v),
                _ => SensorValue::Unknown,
            },
            Some(Value::Bool(b)) => SensorValue::Flag(*b),
            Some(Value::String(s)) => {
                let s = s.trim();
                match s.parse::<f64>() {
                    Ok(v) if v.is_finite() => SensorValue::Number(v),
                    Ok(_) => SensorValue::Unknown,
                    Err(_) if s.is_empty() || s == UNKNOWN_PLACEHOLDER => SensorValue::Unknown,
                    Err(_) => SensorValue::Text(s.to_string()),
                }
            }
            _ => SensorValue::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SensorValue::Unknown)
    }

    /// Rain rendered the way the resident history shows it.
    pub fn rain_label(&self) -> &'static str {
        match self {
            SensorValue::Number(v) if *v == 1.0 => "Yes",
            SensorValue::Flag(true) => "Yes",
            SensorValue::Unknown => "-",
            _ => "No",
        }
    }
}

impl Serialize for SensorValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SensorValue::Number(v) => serializer.serialize_f64(*v),
            SensorValue::Flag(b) => serializer.serialize_bool(*b),
            SensorValue::Text(s) => serializer.serialize_str(s),
            SensorValue::Unknown => serializer.serialize_str(UNKNOWN_PLACEHOLDER),
        }
    }
}

impl<'de> Deserialize<'de> for SensorValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(SensorValue::from_json(value.as_ref()))
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(v) => write!(f, "{}", v),
            SensorValue::Flag(b) => write!(f, "{}", b),
            SensorValue::Text(s) => f.write_str(s),
            SensorValue::Unknown => f.write_str(UNKNOWN_PLACEHOLDER),
        }
    }
}

/// One snapshot of a channel, as delivered by the sensor feed.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub channel: ChannelKind,
    pub status: Option<Status>,
    pub id: Option<String>,
    /// Location (domestic/public) or phase (transformer).
    pub site: Option<String>,
    pub temperature: SensorValue,
    pub humidity: SensorValue,
    pub rain: SensorValue,
}

/// Wire layout of the `sensorData` node. Fields are kept loose here and
/// normalised by [`SensorReading`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DomesticNode {
    #[serde(rename = "Status")]
    status: Option<Value>,
    #[serde(rename = "ID")]
    id: Option<Value>,
    #[serde(rename = "Location")]
    location: Option<Value>,
    #[serde(rename = "Temperature")]
    temperature: Option<Value>,
    #[serde(rename = "Humidity")]
    humidity: Option<Value>,
    #[serde(rename = "Rain")]
    rain: Option<Value>,
}

/// Wire layout of the `Transformer` node.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TransformerNode {
    #[serde(rename = "Status")]
    status: Option<Value>,
    #[serde(rename = "Id")]
    id: Option<Value>,
    #[serde(rename = "Phase")]
    phase: Option<Value>,
    #[serde(rename = "Tem")]
    tem: Option<Value>,
    #[serde(rename = "Hum")]
    hum: Option<Value>,
    #[serde(rename = "Rain")]
    rain: Option<Value>,
}

impl SensorReading {
    /// Build a reading from a channel root snapshot, e.g. the JSON object
    /// stored under `sensorData`. An absent root gives a reading with every
    /// field unknown; a root that is not a node is a decode error.
    pub fn decode(channel: ChannelKind, snapshot: Option<&Value>) -> Result<SensorReading, FeedError> {
        let Some(snapshot) = snapshot else {
            return Ok(SensorReading::status_only(channel, None));
        };
        let reading = match channel {
            ChannelKind::DomesticOrPublic => {
                let node: DomesticNode = decode_value(snapshot.clone())?;
                SensorReading::from_values(
                    channel,
                    node.status,
                    node.id,
                    node.location,
                    [node.temperature, node.humidity, node.rain],
                )
            }
            ChannelKind::Transformer => {
                let node: TransformerNode = decode_value(snapshot.clone())?;
                SensorReading::from_values(channel, node.status, node.id, node.phase, [node.tem, node.hum, node.rain])
            }
        };
        Ok(reading)
    }

    /// `env` holds temperature, humidity and rain in that order.
    pub fn from_values(
        channel: ChannelKind,
        status: Option<Value>,
        id: Option<Value>,
        site: Option<Value>,
        env: [Option<Value>; 3],
    ) -> SensorReading {
        let [temperature, humidity, rain] = env;
        SensorReading {
            channel,
            status: Status::from_value(status.as_ref()),
            id: json_text(id.as_ref()),
            site: json_text(site.as_ref()),
            temperature: SensorValue::from_json(temperature.as_ref()),
            humidity: SensorValue::from_json(humidity.as_ref()),
            rain: SensorValue::from_json(rain.as_ref()),
        }
    }

    pub fn status_only(channel: ChannelKind, status: Option<Status>) -> SensorReading {
        SensorReading {
            channel,
            status,
            id: None,
            site: None,
            temperature: SensorValue::Unknown,
            humidity: SensorValue::Unknown,
            rain: SensorValue::Unknown,
        }
    }
}
