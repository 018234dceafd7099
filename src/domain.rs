//! Domain types for idle/active heartbeats.

use std::fmt;
use std::time::Duration;

use crate::idle::IDLE_THRESHOLD;

/// Whether the user is at the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityStatus {
    Idle,
    Active,
}

impl ActivityStatus {
    /// Classify an idle duration against the fixed threshold.
    ///
    /// The boundary is inclusive: exactly [`IDLE_THRESHOLD`] counts as idle.
    pub fn from_idle(idle: Duration) -> Self {
        if idle >= IDLE_THRESHOLD {
            Self::Idle
        } else {
            Self::Active
        }
    }

    /// Payload published for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reading of the host idle clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleSample {
    /// Time since the last keyboard or mouse input.
    pub idle: Duration,
}

impl IdleSample {
    pub fn new(idle: Duration) -> Self {
        Self { idle }
    }

    /// Milliseconds since the last input, saturating at `u64::MAX`.
    pub fn idle_millis(&self) -> u64 {
        u64::try_from(self.idle.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn status(&self) -> ActivityStatus {
        ActivityStatus::from_idle(self.idle)
    }

    pub fn is_idle(&self) -> bool {
        self.status() == ActivityStatus::Idle
    }
}

/// Message ready to hand to a broker.
///
/// Topic and payload are lower-cased on construction, so a value of this type
/// can never carry mixed-case text onto the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatMessage {
    topic: String,
    payload: String,
    retain: bool,
}

impl HeartbeatMessage {
    pub fn new(topic: &str, payload: &str, retain: bool) -> Self {
        Self {
            topic: topic.to_lowercase(),
            payload: payload.to_lowercase(),
            retain,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn retain(&self) -> bool {
        self.retain
    }
}
