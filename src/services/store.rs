use crate::db::models::{Alert, NewAlert, NewOutageHistoryEntry, OutageHistoryEntry};
use crate::models::alert::AlertRecord;
use crate::schema;
use diesel::PgConnection;
use diesel::prelude::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AlertId(pub i64);

#[derive(Debug)]
pub enum WriteError {
    Database(diesel::result::Error),
}

impl core::fmt::Display for WriteError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WriteError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Database(e) => Some(e),
        }
    }
}

impl From<diesel::result::Error> for WriteError {
    fn from(value: diesel::result::Error) -> Self {
        WriteError::Database(value)
    }
}

/// Append-only destination for classified alerts.
///
/// No deduplication happens here: every call appends a new document, even
/// for identical content. Failures are returned, never retried.
pub trait AlertStore {
    fn persist(&mut self, record: &AlertRecord) -> Result<AlertId, WriteError>;

    fn record_history(&mut self, entry: &NewOutageHistoryEntry) -> Result<i64, WriteError>;
}

pub struct PgAlertStore {
    conn: PgConnection,
}

impl PgAlertStore {
    pub fn new(conn: PgConnection) -> Self {
        PgAlertStore { conn }
    }
}

impl AlertStore for PgAlertStore {
    fn persist(&mut self, record: &AlertRecord) -> Result<AlertId, WriteError> {
        insert_alert(&mut self.conn, &NewAlert::from_record(record))
    }

    fn record_history(&mut self, entry: &NewOutageHistoryEntry) -> Result<i64, WriteError> {
        insert_history_entry(&mut self.conn, entry)
    }
}

pub fn insert_alert(conn: &mut PgConnection, row: &NewAlert) -> Result<AlertId, WriteError> {
    use schema::alerts::dsl as A;

    diesel::insert_into(A::alerts)
        .values(row)
        .returning(A::id)
        .get_result::<i64>(conn)
        .map(AlertId)
        .map_err(WriteError::from)
}

pub fn insert_history_entry(conn: &mut PgConnection, row: &NewOutageHistoryEntry) -> Result<i64, WriteError> {
    use schema::outage_history::dsl as O;

    diesel::insert_into(O::outage_history)
        .values(row)
        .returning(O::id)
        .get_result::<i64>(conn)
        .map_err(WriteError::from)
}

/// One page of alerts, most recent first.
pub fn load_alerts(conn: &mut PgConnection, offset: i64, limit: i64) -> Result<Vec<Alert>, String> {
    use schema::alerts::dsl as A;

    A::alerts
        .order((A::created_at.desc(), A::id.desc()))
        .offset(offset)
        .limit(limit)
        .select(Alert::as_select())
        .load(conn)
        .map_err(|e| format!("load alerts failed: {}", e))
}

/// Most recent outage history entries first.
pub fn load_history(conn: &mut PgConnection, limit: i64) -> Result<Vec<OutageHistoryEntry>, String> {
    use schema::outage_history::dsl as O;

    O::outage_history
        .order((O::recorded_at.desc(), O::id.desc()))
        .limit(limit)
        .select(OutageHistoryEntry::as_select())
        .load(conn)
        .map_err(|e| format!("load outage history failed: {}", e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::alert::{AlertKind, Classification};
    use crate::models::sensor::{ChannelKind, SensorReading, Status};
    use chrono::{TimeZone, Utc};

    /// In-memory store with switchable write failures.
    #[derive(Default)]
    pub(crate) struct MemoryAlertStore {
        pub(crate) alerts: Vec<(AlertId, AlertRecord)>,
        pub(crate) history: Vec<NewOutageHistoryEntry>,
        pub(crate) fail_writes: bool,
        pub(crate) fail_history: bool,
        next_id: i64,
    }

    impl AlertStore for MemoryAlertStore {
        fn persist(&mut self, record: &AlertRecord) -> Result<AlertId, WriteError> {
            if self.fail_writes {
                return Err(WriteError::Database(diesel::result::Error::BrokenTransactionManager));
            }
            self.next_id += 1;
            let id = AlertId(self.next_id);
            self.alerts.push((id, record.clone()));
            Ok(id)
        }

        fn record_history(&mut self, entry: &NewOutageHistoryEntry) -> Result<i64, WriteError> {
            if self.fail_history {
                return Err(WriteError::Database(diesel::result::Error::NotFound));
            }
            self.history.push(entry.clone());
            Ok(self.history.len() as i64)
        }
    }

    #[test]
    fn identical_records_become_distinct_documents() {
        let reading = SensorReading::status_only(ChannelKind::DomesticOrPublic, Some(Status::Off));
        let record = AlertRecord::new(
            &reading,
            Classification {
                kind: AlertKind::Public,
                reason: "x".into(),
            },
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        );
        let mut store = MemoryAlertStore::default();
        let first = store.persist(&record).unwrap();
        let second = store.persist(&record).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.alerts.len(), 2);
        assert_eq!(store.alerts[0].1, store.alerts[1].1);
    }

    #[test]
    fn write_error_wraps_diesel_error() {
        let err = WriteError::from(diesel::result::Error::NotFound);
        assert_eq!(err.to_string(), "database error: Record not found");
    }
}
