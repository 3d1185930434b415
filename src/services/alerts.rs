//! Read side for alert consumers (admin listing, filters, icons).

use crate::db::models::{Alert, OutageHistoryEntry};
use crate::models::alert::{AlertKind, DisplayType, FALLBACK_TITLE, UNKNOWN_PLACEHOLDER};
use crate::services::store::{load_alerts, load_history};
use crate::utils::display_time;
use chrono::{DateTime, Utc};
use diesel::PgConnection;
use std::str::FromStr;

/// A stored alert with its display category resolved. The original kind is
/// kept so transformer alerts can still be told apart under Public.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertView {
    pub id: i64,
    pub title: String,
    pub kind: AlertKind,
    pub source_id: String,
    pub location: Option<String>,
    pub phase: Option<String>,
    pub sensor_data: serde_json::Value,
    pub categorization_reason: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl AlertView {
    pub fn from_row(row: Alert) -> Self {
        AlertView {
            id: row.id,
            title: row.title.unwrap_or_else(|| FALLBACK_TITLE.to_string()),
            kind: AlertKind::resolve(row.alert_type.as_deref(), &row.source_id),
            source_id: row.source_id,
            location: row.location,
            phase: row.phase,
            sensor_data: row.sensor_data,
            categorization_reason: row.categorization_reason,
            created_at: row.created_at,
            is_read: row.is_read,
        }
    }

    pub fn display_type(&self) -> DisplayType {
        self.kind.display_type()
    }

    pub fn icon(&self) -> &'static str {
        match self.kind {
            AlertKind::Transformer => "zap",
            AlertKind::Domestic => "home",
            AlertKind::Public => "users",
        }
    }

    pub fn color(&self) -> &'static str {
        match self.kind {
            AlertKind::Transformer => "#ef4444",
            AlertKind::Domestic => "#f59e0b",
            AlertKind::Public => "#3b82f6",
        }
    }

    /// Label shown on the card: transformer alerts keep their own name.
    pub fn label(&self) -> &'static str {
        match self.kind {
            AlertKind::Transformer => AlertKind::Transformer.as_str(),
            kind => kind.display_type().as_str(),
        }
    }

    fn sensor_field(&self, name: &str) -> String {
        match self.sensor_data.get(name) {
            Some(serde_json::Value::String(s)) if s == UNKNOWN_PLACEHOLDER => "-".to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(v) if !v.is_null() => v.to_string(),
            _ => "-".to_string(),
        }
    }

    pub fn summary_line(&self) -> String {
        let place = match (&self.location, &self.phase) {
            (_, Some(phase)) => format!("phase {}", phase),
            (Some(location), None) => location.clone(),
            (None, None) => "-".to_string(),
        };
        format!(
            "{} [{}] {} | {} @ {} | temp={} hum={} rain={} | {}",
            display_time(self.created_at),
            self.label(),
            self.title,
            self.source_id,
            place,
            self.sensor_field("temperature"),
            self.sensor_field("humidity"),
            self.sensor_field("rain"),
            self.categorization_reason,
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AlertFilter {
    #[default]
    All,
    Domestic,
    Public,
}

impl AlertFilter {
    pub fn matches(self, alert: &AlertView) -> bool {
        match self {
            AlertFilter::All => true,
            AlertFilter::Domestic => alert.display_type() == DisplayType::Domestic,
            AlertFilter::Public => alert.display_type() == DisplayType::Public,
        }
    }
}

impl FromStr for AlertFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(AlertFilter::All),
            "domestic" => Ok(AlertFilter::Domestic),
            "public" => Ok(AlertFilter::Public),
            other => Err(format!("unknown alert filter: {} (expected all, domestic or public)", other)),
        }
    }
}

const PAGE_SIZE: i64 = 200;

/// Up to `limit` alerts matching `filter`, newest first. Pages are pulled from
/// `fetch(offset, page_size)` until enough matches are found or rows run out,
/// so the limit applies after filtering.
pub fn collect_filtered<F>(mut fetch: F, filter: AlertFilter, limit: i64, page_size: i64) -> Result<Vec<AlertView>, String>
where
    F: FnMut(i64, i64) -> Result<Vec<Alert>, String>,
{
    let wanted = usize::try_from(limit).unwrap_or(0);
    let mut found = Vec::new();
    let mut offset = 0;
    while found.len() < wanted {
        let page = fetch(offset, page_size)?;
        let fetched = page.len() as i64;
        found.extend(page.into_iter().map(AlertView::from_row).filter(|a| filter.matches(a)));
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }
    found.truncate(wanted);
    Ok(found)
}

/// Persisted alerts of the given display type, newest first.
pub fn list_alerts(conn: &mut PgConnection, filter: AlertFilter, limit: i64) -> Result<Vec<AlertView>, String> {
    collect_filtered(|offset, size| load_alerts(conn, offset, size), filter, limit, PAGE_SIZE)
}

/// Resident outage history, newest first.
pub fn list_history(conn: &mut PgConnection, limit: i64) -> Result<Vec<OutageHistoryEntry>, String> {
    load_history(conn, limit)
}

pub fn history_line(entry: &OutageHistoryEntry) -> String {
    format!(
        "{} {} | Temp: {}°C | Humidity: {}% | Rain: {}",
        display_time(entry.recorded_at),
        entry.status,
        entry.temperature,
        entry.humidity,
        entry.rain
    )
}
