//! Seeded synthetic realtime store for running without a live feed.
//!
//! Every read of the channel root advances the simulation by one tick: the
//! environment drifts, the line occasionally drops out and flaps back on. Field
//! reads return the values of the current tick.

use crate::client::{FeedError, RealtimeStore};
use crate::models::sensor::ChannelKind;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value, json};
use std::cell::RefCell;

const LINE_SITES: [(&str, &str); 5] = [
    ("H22", "Main St"),
    ("X9", "City Hospital Annex"),
    ("N-17", "Rosewood Apartment 4B"),
    ("X1", "123 Main Street, Public Market"),
    ("Q5", "Sector 9"),
];
const TRANSFORMER_IDS: [&str; 2] = ["T-1", "T-2"];
const PHASES: [&str; 3] = ["A", "B", "C"];

const P_OUTAGE: f64 = 0.05;
const P_RESTORE: f64 = 0.15;
const P_RAIN_TOGGLE: f64 = 0.03;

#[derive(Debug)]
struct SimState {
    rng: SmallRng,
    on: bool,
    id: String,
    site: String,
    temperature: f64,
    humidity: f64,
    raining: bool,
}

pub struct SimulatedStore {
    channel: ChannelKind,
    root: String,
    state: RefCell<SimState>,
}

impl SimulatedStore {
    pub fn new(channel: ChannelKind, root: &str, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed ^ channel_salt(channel));
        let (id, site) = pick_site(channel, &mut rng);
        SimulatedStore {
            channel,
            root: root.trim_matches('/').to_string(),
            state: RefCell::new(SimState {
                rng,
                on: true,
                id,
                site,
                temperature: 27.0,
                humidity: 60.0,
                raining: false,
            }),
        }
    }

    fn tick(&self) {
        let mut s = self.state.borrow_mut();
        let channel = self.channel;
        if s.on {
            if s.rng.random_bool(P_OUTAGE) {
                s.on = false;
                let (id, site) = pick_site(channel, &mut s.rng);
                s.id = id;
                s.site = site;
            }
        } else if s.rng.random_bool(P_RESTORE) {
            s.on = true;
        }
        let dt = s.rng.random_range(-0.4..=0.4);
        s.temperature = round1((s.temperature + dt).clamp(15.0, 45.0));
        let dh = s.rng.random_range(-1.5..=1.5);
        s.humidity = round1((s.humidity + dh).clamp(20.0, 98.0));
        if s.rng.random_bool(P_RAIN_TOGGLE) {
            s.raining = !s.raining;
        }
    }

    fn node(&self) -> Value {
        let s = self.state.borrow();
        let fields = self.channel.fields();
        let mut node = Map::new();
        node.insert(fields.status.into(), json!(if s.on { 1 } else { 0 }));
        node.insert(fields.id.into(), json!(s.id));
        node.insert(fields.site.into(), json!(s.site));
        node.insert(fields.temperature.into(), json!(s.temperature));
        node.insert(fields.humidity.into(), json!(s.humidity));
        node.insert(fields.rain.into(), json!(if s.raining { 1 } else { 0 }));
        Value::Object(node)
    }
}

impl RealtimeStore for SimulatedStore {
    fn get_once(&self, path: &str) -> Result<Option<Value>, FeedError> {
        let path = path.trim_matches('/');
        if path == self.root {
            self.tick();
            return Ok(Some(self.node()));
        }
        let field = path.strip_prefix(self.root.as_str()).and_then(|p| p.strip_prefix('/'));
        Ok(field.and_then(|f| self.node().get(f).cloned()))
    }
}

fn pick_site(channel: ChannelKind, rng: &mut SmallRng) -> (String, String) {
    match channel {
        ChannelKind::DomesticOrPublic => {
            let (id, location) = LINE_SITES[rng.random_range(0..LINE_SITES.len())];
            (id.to_string(), location.to_string())
        }
        ChannelKind::Transformer => {
            let id = TRANSFORMER_IDS[rng.random_range(0..TRANSFORMER_IDS.len())];
            let phase = PHASES[rng.random_range(0..PHASES.len())];
            (id.to_string(), phase.to_string())
        }
    }
}

fn channel_salt(channel: ChannelKind) -> u64 {
    match channel {
        ChannelKind::DomesticOrPublic => 0x5EA5_0001,
        ChannelKind::Transformer => 0x5EA5_0002,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sensor::{SensorReading, Status};

    fn statuses(store: &SimulatedStore, ticks: usize) -> Vec<Option<Status>> {
        (0..ticks)
            .map(|_| {
                let node = store.get_once("sensorData").unwrap();
                SensorReading::decode(ChannelKind::DomesticOrPublic, node.as_ref()).unwrap().status
            })
            .collect()
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = SimulatedStore::new(ChannelKind::DomesticOrPublic, "sensorData", 7);
        let b = SimulatedStore::new(ChannelKind::DomesticOrPublic, "sensorData", 7);
        assert_eq!(statuses(&a, 200), statuses(&b, 200));
    }

    #[test]
    fn produces_outages_and_restores() {
        let store = SimulatedStore::new(ChannelKind::DomesticOrPublic, "sensorData", 42);
        let seen = statuses(&store, 1_000);
        assert!(seen.contains(&Some(Status::Off)));
        assert!(seen.contains(&Some(Status::On)));
    }

    #[test]
    fn field_reads_match_current_node_without_advancing() {
        let store = SimulatedStore::new(ChannelKind::Transformer, "/Transformer", 1);
        let node = store.get_once("Transformer").unwrap().unwrap();
        assert_eq!(store.get_once("Transformer/Phase").unwrap(), node.get("Phase").cloned());
        assert_eq!(store.get_once("Transformer/Tem").unwrap(), node.get("Tem").cloned());
        assert_eq!(store.get_once("Transformer/Missing").unwrap(), None);
        assert_eq!(store.get_once("Elsewhere").unwrap(), None);
    }
}
