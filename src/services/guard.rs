//! Per-channel debounce and cooldown for outage alerts.
//!
//! ```text
//!            status 1                 edge + accepted write
//!  Unknown ───────────► On ──────────────────────────────► Off-Handled
//!                        ▲          │                          │
//!                        │          │ status 0, not accepted   │
//!                        │          ▼                          │
//!                        ├──── Off-Unhandled                   │
//!                        └────────── status 1 ─────────────────┘
//! ```
//!
//! An alert fires at most once per falling edge. A write failure leaves the
//! edge pending so the next off reading of the same outage retries it.

use crate::models::sensor::{ChannelKind, Status};
use std::time::Duration;

pub const COOLDOWN_MS: i64 = 30_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GuardPolicy {
    /// Minimum time between accepted alerts. `None` disables the check.
    pub cooldown_ms: Option<i64>,
}

impl GuardPolicy {
    /// Domestic/public nodes flap, so they get a cooldown. Transformers only
    /// get edge detection.
    pub fn for_channel(channel: ChannelKind, cooldown: Duration) -> Self {
        match channel {
            ChannelKind::DomesticOrPublic => GuardPolicy {
                cooldown_ms: Some(i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX)),
            },
            ChannelKind::Transformer => GuardPolicy { cooldown_ms: None },
        }
    }
}

/// In-memory guard state, owned by one channel subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardState {
    pub last_status: Option<Status>,
    pub event_handled: bool,
    pub last_fired_at_ms: i64,
    /// Falling edge seen but its alert was never stored.
    pub edge_pending: bool,
}

impl Default for GuardState {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardState {
    pub fn new() -> Self {
        GuardState {
            last_status: None,
            event_handled: false,
            last_fired_at_ms: 0,
            edge_pending: false,
        }
    }

    pub fn should_fire(&self, policy: &GuardPolicy, new_status: Option<Status>, now_ms: i64) -> bool {
        let falling_edge = self.last_status == Some(Status::On) || self.edge_pending;
        let cooled_down = match policy.cooldown_ms {
            Some(cooldown) => now_ms.saturating_sub(self.last_fired_at_ms) > cooldown,
            None => true,
        };
        falling_edge && new_status == Some(Status::Off) && !self.event_handled && cooled_down
    }

    /// Record that the alert for the current off period was stored.
    pub fn mark_fired(&mut self, now_ms: i64) {
        self.event_handled = true;
        self.edge_pending = false;
        self.last_fired_at_ms = now_ms;
    }

    /// Record that the alert for the current edge could not be stored.
    pub fn mark_write_failed(&mut self) {
        self.edge_pending = true;
    }

    /// Apply a reading's status. Runs after evaluation, for every reading.
    pub fn observe(&mut self, new_status: Option<Status>) {
        if new_status == Some(Status::On) {
            self.event_handled = false;
            self.edge_pending = false;
        }
        self.last_status = new_status;
    }
}
