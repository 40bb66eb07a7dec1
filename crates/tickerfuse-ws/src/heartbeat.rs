//! Feed liveness tracking.
//!
//! A connection is stale when nothing parseable has arrived for two
//! heartbeat intervals. Idle-but-alive connections get an application ping
//! after one interval on exchanges that support it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Heartbeat monitor for one exchange connection.
pub struct HeartbeatMonitor {
    interval: Duration,
    /// Monotonic time of the last inbound message, used for idle math.
    last_message: RwLock<Instant>,
    /// Wall-clock time of the last inbound message, reported in status.
    last_message_at: RwLock<Option<DateTime<Utc>>>,
    last_ping: RwLock<Option<Instant>>,
}

impl HeartbeatMonitor {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
            last_message: RwLock::new(Instant::now()),
            last_message_at: RwLock::new(None),
            last_ping: RwLock::new(None),
        }
    }

    /// Restart the idle clock (called on every successful connection).
    pub fn reset(&self) {
        *self.last_message.write() = Instant::now();
        *self.last_ping.write() = None;
    }

    /// Record an inbound message.
    pub fn record_message(&self) {
        *self.last_message.write() = Instant::now();
        *self.last_message_at.write() = Some(Utc::now());
    }

    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Instant::now());
        debug!("Recorded application ping");
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        *self.last_message_at.read()
    }

    pub fn idle(&self) -> Duration {
        self.last_message.read().elapsed()
    }

    /// True once the feed has been silent for more than two intervals.
    pub fn is_stale(&self) -> bool {
        self.idle() > self.interval * 2
    }

    /// True when idle for at least one interval and no ping went out during
    /// the last interval.
    pub fn should_ping(&self) -> bool {
        if self.idle() < self.interval {
            return false;
        }
        match *self.last_ping.read() {
            Some(sent) => sent.elapsed() >= self.interval,
            None => true,
        }
    }

    /// How often the connection loop should evaluate the heartbeat.
    pub fn check_period(&self) -> Duration {
        (self.interval / 2).max(Duration::from_millis(10))
    }
}
