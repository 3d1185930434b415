//! Diesel model structs for the alert and outage history tables.
//!
//! Both tables are append-only; the service never issues updates.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::alert::{AlertRecord, SensorSnapshot};
use crate::models::sensor::{SensorReading, SensorValue, Status};
use crate::schema;
use crate::utils::serde_enum_name;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::alerts)]
pub struct Alert {
    pub id: i64,
    pub title: Option<String>,
    pub alert_type: Option<String>,
    pub source_id: String,
    pub location: Option<String>,
    pub phase: Option<String>,
    pub sensor_data: serde_json::Value,
    pub categorization_reason: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::alerts)]
pub struct NewAlert {
    pub title: Option<String>,
    pub alert_type: Option<String>,
    pub source_id: String,
    pub location: Option<String>,
    pub phase: Option<String>,
    pub sensor_data: serde_json::Value,
    pub categorization_reason: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl NewAlert {
    pub fn from_record(record: &AlertRecord) -> Self {
        NewAlert {
            title: Some(record.title.clone()),
            alert_type: serde_enum_name(&record.kind),
            source_id: record.source_id.clone(),
            location: record.placement.location().map(str::to_string),
            phase: record.placement.phase().map(str::to_string),
            sensor_data: snapshot_json(&record.sensor_snapshot),
            categorization_reason: record.categorization_reason.clone(),
            created_at: record.created_at,
            is_read: record.is_read,
        }
    }
}

fn snapshot_json(snapshot: &SensorSnapshot) -> serde_json::Value {
    serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null)
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::outage_history)]
pub struct OutageHistoryEntry {
    pub id: i64,
    pub status: String,
    pub temperature: String,
    pub humidity: String,
    pub rain: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::outage_history)]
pub struct NewOutageHistoryEntry {
    pub status: String,
    pub temperature: String,
    pub humidity: String,
    pub rain: String,
    pub recorded_at: DateTime<Utc>,
}

impl NewOutageHistoryEntry {
    /// History row for an accepted outage. Missing values render as `-`.
    pub fn outage(reading: &SensorReading, recorded_at: DateTime<Utc>) -> Self {
        let show = |v: &SensorValue| {
            if v.is_known() { v.to_string() } else { "-".to_string() }
        };
        NewOutageHistoryEntry {
            status: Status::Off.label().to_string(),
            temperature: show(&reading.temperature),
            humidity: show(&reading.humidity),
            rain: reading.rain.rain_label().to_string(),
            recorded_at,
        }
    }
}
