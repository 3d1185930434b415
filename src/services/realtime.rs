use crate::client::{FeedClient, FeedError, RealtimeStore};
use crate::config::Config;
use crate::db::models::NewOutageHistoryEntry;
use crate::models::alert::AlertRecord;
use crate::models::sensor::{ChannelKind, SensorReading, Status};
use crate::services::classify::classify;
use crate::services::feed::{self, Subscription};
use crate::services::guard::{GuardPolicy, GuardState};
use crate::services::simulated::SimulatedStore;
use crate::services::store::{AlertId, AlertStore, PgAlertStore};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use log::{debug, error, info, warn};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What happened to a single reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not an off reading.
    Ignored,
    /// Off reading rejected by the guard (no edge, already handled, cooldown).
    Suppressed,
    Persisted(AlertId),
    WriteFailed,
}

/// Classification, guard and writer for one channel. Owns the channel's
/// guard state; dropping the pipeline discards it.
pub struct ChannelPipeline<W: AlertStore> {
    channel: ChannelKind,
    policy: GuardPolicy,
    guard: GuardState,
    writer: W,
}

impl<W: AlertStore> ChannelPipeline<W> {
    pub fn new(channel: ChannelKind, policy: GuardPolicy, writer: W) -> Self {
        ChannelPipeline {
            channel,
            policy,
            guard: GuardState::new(),
            writer,
        }
    }

    pub fn guard(&self) -> &GuardState {
        &self.guard
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn handle(&mut self, reading: &SensorReading, now: DateTime<Utc>) -> Outcome {
        let now_ms = now.timestamp_millis();
        let outcome = if self.guard.should_fire(&self.policy, reading.status, now_ms) {
            match classify(reading) {
                Some(classification) => {
                    let record = AlertRecord::new(reading, classification, now);
                    self.store(reading, &record, now)
                }
                None => Outcome::Ignored,
            }
        } else if reading.status == Some(Status::Off) {
            debug!(
                "{}: off reading suppressed (last={:?}, handled={}, last_fired_at={})",
                self.channel, self.guard.last_status, self.guard.event_handled, self.guard.last_fired_at_ms
            );
            Outcome::Suppressed
        } else {
            Outcome::Ignored
        };
        self.guard.observe(reading.status);
        outcome
    }

    fn store(&mut self, reading: &SensorReading, record: &AlertRecord, now: DateTime<Utc>) -> Outcome {
        match self.writer.persist(record) {
            Ok(id) => {
                self.guard.mark_fired(now.timestamp_millis());
                info!(
                    "{}: {} stored as alert {} (source={}, reason={})",
                    self.channel, record.title, id.0, record.source_id, record.categorization_reason
                );
                if self.channel == ChannelKind::DomesticOrPublic {
                    let entry = NewOutageHistoryEntry::outage(reading, now);
                    if let Err(e) = self.writer.record_history(&entry) {
                        warn!("{}: outage history write failed: {}", self.channel, e);
                    }
                }
                Outcome::Persisted(id)
            }
            Err(e) => {
                self.guard.mark_write_failed();
                error!("{}: storing {} failed: {}", self.channel, record.title, e);
                Outcome::WriteFailed
            }
        }
    }

    /// Drain a feed until it ends. Readings that could not be assembled are
    /// logged and dropped.
    pub fn run<I>(&mut self, feed: I)
    where
        I: Iterator<Item = Result<SensorReading, FeedError>>,
    {
        for item in feed {
            match item {
                Ok(reading) => {
                    self.handle(&reading, Utc::now());
                }
                Err(e) => warn!("{}: dropping event: {}", self.channel, e),
            }
        }
    }
}

/// A channel subscriber running on its own thread.
pub struct ChannelWorker {
    channel: ChannelKind,
    subscription: Subscription,
    handle: JoinHandle<Result<(), String>>,
}

impl ChannelWorker {
    pub fn spawn(cfg: &Config, channel: ChannelKind) -> Result<Self, String> {
        let cfg = cfg.clone();
        let subscription = Subscription::new();
        let thread_subscription = subscription.clone();
        let handle = thread::Builder::new()
            .name(format!("feed-{}", channel.name()))
            .spawn(move || run_channel(&cfg, channel, &thread_subscription))
            .map_err(|e| format!("spawning {} worker failed: {}", channel, e))?;
        Ok(Self::from_parts(channel, subscription, handle))
    }

    /// Wrap a running thread that stops once `subscription` is cancelled.
    pub fn from_parts(
        channel: ChannelKind,
        subscription: Subscription,
        handle: JoinHandle<Result<(), String>>,
    ) -> Self {
        ChannelWorker {
            channel,
            subscription,
            handle,
        }
    }

    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }

    fn join(self) -> Result<(), String> {
        let channel = self.channel;
        self.handle
            .join()
            .map_err(|_| format!("{} worker panicked", channel))?
    }
}

/// Block until every worker has stopped. The first worker to fail cancels
/// the others; its error is returned.
pub fn supervise(mut workers: Vec<ChannelWorker>) -> Result<(), String> {
    let mut first_error = None;
    while !workers.is_empty() {
        let finished = workers.iter().position(|w| w.handle.is_finished());
        let Some(index) = finished else {
            thread::sleep(Duration::from_millis(200));
            continue;
        };
        let worker = workers.swap_remove(index);
        let channel = worker.channel;
        match worker.join() {
            Ok(()) => info!("{} worker stopped", channel),
            Err(e) => {
                error!("{} worker failed: {}", channel, e);
                if first_error.is_none() {
                    for other in &workers {
                        other.unsubscribe();
                    }
                    first_error = Some(e);
                }
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn run_channel(cfg: &Config, channel: ChannelKind, subscription: &Subscription) -> Result<(), String> {
    let conn = PgConnection::establish(&cfg.database_url)
        .map_err(|e| format!("{}: DB connection failed: {}", channel, e))?;

    let store: Box<dyn RealtimeStore> = if cfg.feed_simulated {
        Box::new(SimulatedStore::new(channel, cfg.feed_root(channel), cfg.simulation_seed))
    } else {
        let url = cfg
            .feed_url
            .clone()
            .ok_or_else(|| "FEED_URL is required unless FEED_SIMULATED is set".to_string())?;
        Box::new(FeedClient::new(url, cfg.feed_auth_token.clone()))
    };

    let root = cfg.feed_root(channel);
    info!(
        "{}: subscribing to {} (poll={}ms)",
        channel,
        root,
        cfg.feed_poll_interval.as_millis()
    );
    let feed = feed::subscribe(store.as_ref(), channel, root, cfg.feed_poll_interval, subscription);
    let mut pipeline = ChannelPipeline::new(
        channel,
        GuardPolicy::for_channel(channel, cfg.alert_cooldown),
        PgAlertStore::new(conn),
    );
    pipeline.run(feed);
    info!("{}: unsubscribed", channel);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::{AlertKind, DisplayType};
    use crate::models::sensor::SensorValue;
    use crate::services::feed::tests::ScriptedStore;
    use crate::services::guard::COOLDOWN_MS;
    use crate::services::store::tests::MemoryAlertStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn domestic() -> ChannelPipeline<MemoryAlertStore> {
        ChannelPipeline::new(
            ChannelKind::DomesticOrPublic,
            GuardPolicy::for_channel(ChannelKind::DomesticOrPublic, Duration::from_millis(COOLDOWN_MS as u64)),
            MemoryAlertStore::default(),
        )
    }

    fn transformer() -> ChannelPipeline<MemoryAlertStore> {
        ChannelPipeline::new(
            ChannelKind::Transformer,
            GuardPolicy::for_channel(ChannelKind::Transformer, Duration::from_millis(COOLDOWN_MS as u64)),
            MemoryAlertStore::default(),
        )
    }

    fn line(status: u8, id: &str, location: &str) -> SensorReading {
        SensorReading {
            channel: ChannelKind::DomesticOrPublic,
            status: Status::from_value(Some(&json!(status))),
            id: Some(id.into()),
            site: Some(location.into()),
            temperature: SensorValue::Number(28.0),
            humidity: SensorValue::Number(70.0),
            rain: SensorValue::Number(1.0),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn h22_outage_becomes_one_domestic_alert() {
        let mut p = domestic();
        assert_eq!(p.handle(&line(1, "H22", "Main St"), at(0)), Outcome::Ignored);
        assert!(matches!(p.handle(&line(0, "H22", "Main St"), at(1)), Outcome::Persisted(_)));

        let alerts = &p.writer().alerts;
        assert_eq!(alerts.len(), 1);
        let record = &alerts[0].1;
        assert_eq!(record.display_type(), DisplayType::Domestic);
        assert_eq!(record.categorization_reason, "ID is H22");
        assert_eq!(record.placement.location(), Some("Main St"));
        assert_eq!(record.created_at, at(1));
        assert_eq!(p.writer().history.len(), 1);
        assert_eq!(p.writer().history[0].rain, "Yes");
    }

    #[test]
    fn hospital_outage_is_public() {
        let mut p = domestic();
        p.handle(&line(1, "X9", "City Hospital Annex"), at(0));
        p.handle(&line(0, "X9", "City Hospital Annex"), at(1));
        let alerts = &p.writer().alerts;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].1.display_type(), DisplayType::Public);
        assert!(alerts[0].1.categorization_reason.contains("hospital"));
    }

    #[test]
    fn repeated_offs_are_suppressed() {
        let mut p = domestic();
        let outcomes: Vec<Outcome> = [(1, 0), (0, 1), (0, 2), (0, 3), (1, 60), (0, 61)]
            .iter()
            .map(|(s, t)| p.handle(&line(*s, "H22", "Main St"), at(*t)))
            .collect();
        assert_eq!(outcomes[2], Outcome::Suppressed);
        assert_eq!(outcomes[3], Outcome::Suppressed);
        assert_eq!(p.writer().alerts.len(), 2);
    }

    #[test]
    fn flapping_inside_cooldown_fires_once() {
        let mut p = domestic();
        for (s, t) in [(1, 0), (0, 1), (1, 5), (0, 10)] {
            p.handle(&line(s, "H22", "Main St"), at(t));
        }
        assert_eq!(p.writer().alerts.len(), 1);
        assert!(!p.guard().event_handled);
    }

    #[test]
    fn transformer_edge_fires_immediately_without_cooldown() {
        let mut p = transformer();
        let mut reading = SensorReading::status_only(ChannelKind::Transformer, Some(Status::On));
        p.handle(&reading, at(0));
        reading.status = Some(Status::Off);
        reading.id = Some("T-1".into());
        reading.site = Some("A".into());
        assert!(matches!(p.handle(&reading, at(0)), Outcome::Persisted(_)));

        reading.status = Some(Status::On);
        p.handle(&reading, at(0));
        reading.status = Some(Status::Off);
        assert!(matches!(p.handle(&reading, at(0)), Outcome::Persisted(_)));

        let alerts = &p.writer().alerts;
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].1.kind, AlertKind::Transformer);
        assert_eq!(alerts[0].1.placement.phase(), Some("A"));
        assert_eq!(alerts[0].1.title, "Transformer Failure Alert");
        assert!(p.writer().history.is_empty());
    }

    #[test]
    fn failed_write_is_retried_on_next_off_reading() {
        let mut p = domestic();
        p.handle(&line(1, "H22", "Main St"), at(0));
        p.writer.fail_writes = true;
        assert_eq!(p.handle(&line(0, "H22", "Main St"), at(1)), Outcome::WriteFailed);
        assert!(!p.guard().event_handled);
        assert_eq!(p.guard().last_fired_at_ms, 0);

        p.writer.fail_writes = false;
        assert!(matches!(p.handle(&line(0, "H22", "Main St"), at(2)), Outcome::Persisted(_)));
        assert_eq!(p.handle(&line(0, "H22", "Main St"), at(3)), Outcome::Suppressed);
        assert_eq!(p.writer().alerts.len(), 1);
    }

    #[test]
    fn history_failure_does_not_undo_alert() {
        let mut p = domestic();
        p.writer.fail_history = true;
        p.handle(&line(1, "H22", "Main St"), at(0));
        assert!(matches!(p.handle(&line(0, "H22", "Main St"), at(1)), Outcome::Persisted(_)));
        assert!(p.guard().event_handled);
    }

    /// Worker that idles until cancelled, then returns `on_stop`.
    fn idle_worker(channel: ChannelKind, on_stop: Result<(), String>) -> (ChannelWorker, Subscription) {
        let subscription = Subscription::new();
        let watched = subscription.clone();
        let handle = thread::spawn(move || {
            while watched.is_active() {
                thread::sleep(Duration::from_millis(5));
            }
            on_stop
        });
        let worker = ChannelWorker::from_parts(channel, subscription.clone(), handle);
        (worker, subscription)
    }

    #[test]
    fn failed_worker_cancels_sibling_and_its_error_wins() {
        let (sibling, sibling_sub) = idle_worker(ChannelKind::DomesticOrPublic, Err("stopped late".into()));
        let failing = ChannelWorker::from_parts(
            ChannelKind::Transformer,
            Subscription::new(),
            thread::spawn(|| Err("transformer: DB connection failed".to_string())),
        );

        let result = supervise(vec![sibling, failing]);
        assert_eq!(result, Err("transformer: DB connection failed".to_string()));
        assert!(!sibling_sub.is_active());
    }

    #[test]
    fn clean_shutdown_of_all_workers_is_ok() {
        let (a, a_sub) = idle_worker(ChannelKind::DomesticOrPublic, Ok(()));
        let (b, b_sub) = idle_worker(ChannelKind::Transformer, Ok(()));
        a_sub.unsubscribe();
        b_sub.unsubscribe();
        assert_eq!(supervise(vec![a, b]), Ok(()));
    }

    #[test]
    fn panicked_worker_is_reported() {
        let (sibling, sibling_sub) = idle_worker(ChannelKind::Transformer, Ok(()));
        let panicking = ChannelWorker::from_parts(
            ChannelKind::DomesticOrPublic,
            Subscription::new(),
            thread::spawn(|| -> Result<(), String> { panic!("boom") }),
        );
        assert_eq!(supervise(vec![panicking, sibling]), Err("domestic worker panicked".to_string()));
        assert!(!sibling_sub.is_active());
    }

    #[test]
    fn runs_end_to_end_over_a_feed() {
        let sub = Subscription::new();
        let store = ScriptedStore::new(
            "sensorData",
            vec![
                json!({"Status": 1, "ID": "H22", "Location": "Main St"}),
                json!({"Status": 0, "ID": "H22", "Location": "Main St", "Temperature": 31}),
                json!({"Status": 0, "ID": "H22", "Location": "Main St", "Temperature": 32}),
            ],
            &sub,
        );
        let feed = feed::subscribe(&store, ChannelKind::DomesticOrPublic, "sensorData", Duration::ZERO, &sub);
        let mut p = domestic();
        p.run(feed);

        let alerts = &p.writer().alerts;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].1.kind, AlertKind::Domestic);
        assert_eq!(alerts[0].1.sensor_snapshot.temperature, SensorValue::Number(31.0));
    }

    #[test]
    fn feed_errors_are_dropped_without_alerting() {
        let sub = Subscription::new();
        let store = ScriptedStore::new(
            "sensorData",
            vec![json!({"Status": 1}), json!({"Status": 0, "ID": "H22"})],
            &sub,
        )
        .failing("sensorData/Rain");
        let feed = feed::subscribe(&store, ChannelKind::DomesticOrPublic, "sensorData", Duration::ZERO, &sub);
        let mut p = domestic();
        p.run(feed);
        assert!(p.writer().alerts.is_empty());
        assert_eq!(p.guard().last_status, Some(Status::On));
    }
}
