//! Live sensor feed for one channel.
//!
//! The feed watches a channel root in the realtime store and yields a
//! [`SensorReading`] every time the root's value changes. The first
//! observation is always delivered. When a change carries an off status, the
//! auxiliary fields are point-read so the alert reflects the latest values; if
//! any of those reads fail the change is surfaced as an error instead of a
//! partial reading.
//!
//! The sequence never ends on its own. It stops once its [`Subscription`] is
//! cancelled.

use crate::client::{FeedError, RealtimeStore};
use crate::models::sensor::{ChannelKind, SensorReading, Status};
use log::debug;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Cancellation handle shared between a feed and its owner.
#[derive(Debug, Clone)]
pub struct Subscription {
    active: Arc<AtomicBool>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription {
    pub fn new() -> Self {
        Subscription {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct SensorFeed<'a, S: RealtimeStore + ?Sized> {
    store: &'a S,
    channel: ChannelKind,
    root: String,
    poll_interval: Duration,
    subscription: Subscription,
    last_snapshot: Option<Option<Value>>,
    next_poll_at: Option<Instant>,
}

/// Start watching `root` for `channel`.
pub fn subscribe<'a, S: RealtimeStore + ?Sized>(
    store: &'a S,
    channel: ChannelKind,
    root: &str,
    poll_interval: Duration,
    subscription: &Subscription,
) -> SensorFeed<'a, S> {
    SensorFeed {
        store,
        channel,
        root: root.trim_matches('/').to_string(),
        poll_interval,
        subscription: subscription.clone(),
        last_snapshot: None,
        next_poll_at: None,
    }
}

impl<S: RealtimeStore + ?Sized> SensorFeed<'_, S> {
    fn field_path(&self, field: &str) -> String {
        format!("{}/{}", self.root, field)
    }

    fn wait_for_tick(&mut self) {
        if let Some(at) = self.next_poll_at {
            let now = Instant::now();
            if at > now {
                thread::sleep(at - now);
            }
        }
        self.next_poll_at = Some(Instant::now() + self.poll_interval);
    }

    fn read_field(&self, field: &str) -> Result<Option<Value>, FeedError> {
        let path = self.field_path(field);
        self.store
            .get_once(&path)
            .map_err(|e| FeedError::FieldRead { path, source: Box::new(e) })
    }

    fn reading_from(&self, snapshot: &Option<Value>) -> Result<SensorReading, FeedError> {
        let decoded = SensorReading::decode(self.channel, snapshot.as_ref())?;
        if decoded.status != Some(Status::Off) {
            return Ok(decoded);
        }

        let fields = self.channel.fields();
        let id = self.read_field(fields.id)?;
        let site = self.read_field(fields.site)?;
        let temperature = self.read_field(fields.temperature)?;
        let humidity = self.read_field(fields.humidity)?;
        let rain = self.read_field(fields.rain)?;

        let mut reading = SensorReading::from_values(self.channel, None, id, site, [temperature, humidity, rain]);
        reading.status = decoded.status;
        Ok(reading)
    }
}

impl<S: RealtimeStore + ?Sized> Iterator for SensorFeed<'_, S> {
    type Item = Result<SensorReading, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.subscription.is_active() {
                return None;
            }
            self.wait_for_tick();
            if !self.subscription.is_active() {
                return None;
            }

            let snapshot = match self.store.get_once(&self.root) {
                Ok(s) => s,
                Err(e) => return Some(Err(e)),
            };
            if self.last_snapshot.as_ref() == Some(&snapshot) {
                continue;
            }
            debug!("{}: {} changed", self.channel, self.root);
            let item = self.reading_from(&snapshot);
            self.last_snapshot = Some(snapshot);
            return Some(item);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::sensor::SensorValue;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};

    /// Realtime store that plays back a scripted sequence of root snapshots.
    /// Field reads see the snapshot most recently served. Once the script is
    /// exhausted the given subscription is cancelled.
    pub(crate) struct ScriptedStore {
        root: String,
        script: RefCell<VecDeque<Value>>,
        current: RefCell<Value>,
        failing_paths: Vec<String>,
        subscription: Subscription,
        pub(crate) reads: RefCell<HashMap<String, usize>>,
    }

    impl ScriptedStore {
        pub(crate) fn new(root: &str, script: Vec<Value>, subscription: &Subscription) -> Self {
            ScriptedStore {
                root: root.to_string(),
                script: RefCell::new(script.into()),
                current: RefCell::new(Value::Null),
                failing_paths: Vec::new(),
                subscription: subscription.clone(),
                reads: RefCell::new(HashMap::new()),
            }
        }

        pub(crate) fn failing(mut self, path: &str) -> Self {
            self.failing_paths.push(path.to_string());
            self
        }
    }

    impl RealtimeStore for ScriptedStore {
        fn get_once(&self, path: &str) -> Result<Option<Value>, FeedError> {
            *self.reads.borrow_mut().entry(path.to_string()).or_default() += 1;
            if self.failing_paths.iter().any(|p| p == path) {
                return Err(FeedError::Http {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            if path == self.root {
                match self.script.borrow_mut().pop_front() {
                    Some(next) => *self.current.borrow_mut() = next,
                    None => self.subscription.unsubscribe(),
                }
                let current = self.current.borrow().clone();
                return Ok(if current.is_null() { None } else { Some(current) });
            }
            let field = path.strip_prefix(&format!("{}/", self.root)).unwrap_or(path);
            Ok(self.current.borrow().get(field).cloned())
        }
    }

    fn collect(store: &ScriptedStore, channel: ChannelKind, root: &str, sub: &Subscription) -> Vec<Result<SensorReading, FeedError>> {
        subscribe(store, channel, root, Duration::ZERO, sub).collect()
    }

    #[test]
    fn yields_only_on_change() {
        let sub = Subscription::new();
        let on = json!({"Status": 1, "ID": "H22", "Location": "Main St"});
        let off = json!({"Status": 0, "ID": "H22", "Location": "Main St", "Temperature": 30});
        let store = ScriptedStore::new("sensorData", vec![on.clone(), on.clone(), off.clone(), off, on], &sub);

        let readings: Vec<_> = collect(&store, ChannelKind::DomesticOrPublic, "sensorData", &sub)
            .into_iter()
            .map(|r| r.unwrap().status)
            .collect();
        assert_eq!(readings, vec![Some(Status::On), Some(Status::Off), Some(Status::On)]);
    }

    #[test]
    fn off_reading_point_reads_auxiliary_fields() {
        let sub = Subscription::new();
        let store = ScriptedStore::new(
            "Transformer",
            vec![json!({"Status": 1}), json!({"Status": 0, "Id": "T-1", "Phase": "A", "Tem": 40.5})],
            &sub,
        );
        let readings = collect(&store, ChannelKind::Transformer, "/Transformer/", &sub);
        assert_eq!(readings.len(), 2);
        let off = readings[1].as_ref().unwrap();
        assert_eq!(off.id.as_deref(), Some("T-1"));
        assert_eq!(off.site.as_deref(), Some("A"));
        assert_eq!(off.temperature, SensorValue::Number(40.5));
        assert_eq!(off.rain, SensorValue::Unknown);
        assert_eq!(store.reads.borrow().get("Transformer/Phase"), Some(&1));
        assert_eq!(store.reads.borrow().get("Transformer/Id"), Some(&1));
    }

    #[test]
    fn failed_field_read_surfaces_typed_error() {
        let sub = Subscription::new();
        let store = ScriptedStore::new(
            "sensorData",
            vec![json!({"Status": 1}), json!({"Status": 0, "ID": "H22"})],
            &sub,
        )
        .failing("sensorData/Location");
        let readings = collect(&store, ChannelKind::DomesticOrPublic, "sensorData", &sub);
        assert_eq!(readings.len(), 2);
        match &readings[1] {
            Err(FeedError::FieldRead { path, .. }) => assert_eq!(path, "sensorData/Location"),
            other => panic!("expected field read error, got {:?}", other),
        }
    }

    #[test]
    fn empty_root_is_delivered_as_unknown_status() {
        let sub = Subscription::new();
        let store = ScriptedStore::new("sensorData", vec![Value::Null], &sub);
        let readings = collect(&store, ChannelKind::DomesticOrPublic, "sensorData", &sub);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].as_ref().unwrap().status, None);
    }

    #[test]
    fn malformed_root_is_a_path_error() {
        let sub = Subscription::new();
        let store = ScriptedStore::new("sensorData", vec![json!({"Status": 1}), json!("offline")], &sub);
        let readings = collect(&store, ChannelKind::DomesticOrPublic, "sensorData", &sub);
        assert_eq!(readings.len(), 2);
        assert!(matches!(readings[1], Err(FeedError::Json { .. })));
        assert_eq!(store.reads.borrow().get("sensorData/ID"), None);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let sub = Subscription::new();
        let store = ScriptedStore::new("sensorData", vec![json!({"Status": 1}), json!({"Status": 0})], &sub);
        let mut feed = subscribe(&store, ChannelKind::DomesticOrPublic, "sensorData", Duration::ZERO, &sub);
        assert!(feed.next().is_some());
        sub.unsubscribe();
        assert!(feed.next().is_none());
        assert_eq!(store.reads.borrow().get("sensorData"), Some(&1));
    }
}
