//! Heartbeat-based liveness detection
//!
//! Each session is seeded with a heartbeat record when it is established.
//! Nodes are expected to send a heartbeat every `interval` seconds (50 ms
//! nominal). Liveness is declared lost once the node has been silent for more
//! than [`LOSS_MULTIPLIER`] intervals, so a single late or dropped heartbeat
//! does not revoke an active beam.
//!
//! Times are receipt times on the coordinator clock. The timestamp a node
//! puts in its heartbeat is never trusted for liveness.
//!
//! The boundary is inclusive on the alive side: a node silent for exactly
//! `3 × interval` is still alive.

/// Nominal heartbeat interval (seconds)
pub const DEFAULT_HEARTBEAT_INTERVAL: f64 = 0.05;

/// Number of intervals of silence tolerated before liveness is lost
pub const LOSS_MULTIPLIER: f64 = 3.0;

/// Result of a liveness check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Liveness {
    /// Heartbeat seen within the timeout
    Alive,
    /// No heartbeat for longer than the timeout
    Lost { silent_for: f64 },
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive)
    }
}

/// Last heartbeat seen from one node
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatRecord {
    node_id: String,
    last_seen: f64,
    interval: f64,
}

impl HeartbeatRecord {
    /// Seed a record at session establishment
    pub fn seed(node_id: impl Into<String>, at: f64, interval: f64) -> Self {
        Self {
            node_id: node_id.into(),
            last_seen: at,
            interval,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn last_seen(&self) -> f64 {
        self.last_seen
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Record a heartbeat received at `at` on the coordinator clock
    ///
    /// Returns `false` if `at` is earlier than the last heartbeat seen; the
    /// record is left untouched so `last_seen` never moves backwards.
    pub fn record(&mut self, at: f64) -> bool {
        if at < self.last_seen {
            return false;
        }
        self.last_seen = at;
        true
    }

    /// Check liveness at `now`
    pub fn check(&self, now: f64) -> Liveness {
        let silent_for = now - self.last_seen;
        if silent_for > LOSS_MULTIPLIER * self.interval {
            Liveness::Lost { silent_for }
        } else {
            Liveness::Alive
        }
    }
}

/// Check an optional record; a missing record is `Lost`
pub fn check(record: Option<&HeartbeatRecord>, now: f64) -> Liveness {
    match record {
        Some(record) => record.check(now),
        None => Liveness::Lost {
            silent_for: f64::INFINITY,
        },
    }
}
