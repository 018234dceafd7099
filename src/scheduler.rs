//! Periodic heartbeat loop.
//!
//! Each tick: make sure a broker connection exists, sample the idle clock,
//! publish `idle` or `active` with the retain flag set. Failures are logged
//! and the tick is skipped; the next tick is the retry.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::domain::ActivityStatus;
use crate::idle::{IdleDetector, IdleSource};
use crate::publisher::{ConnectionError, HeartbeatPublisher};

/// Time between ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// How long shutdown waits for the broker connection to close.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Connection failures logged before rate limiting kicks in.
const CONNECT_ERROR_BURST: u32 = 5;
/// After the burst, log every Nth connection failure.
const CONNECT_ERROR_RATE_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Disconnected,
    Connected,
    Publishing,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published(ActivityStatus),
    ConnectFailed,
    IdleQueryFailed,
    PublishFailed,
}

/// Drives idle detection and publishing on a fixed interval.
pub struct HeartbeatScheduler<S, B: Broker> {
    detector: IdleDetector<S>,
    publisher: HeartbeatPublisher<B>,
    topic: String,
    state: SchedulerState,
    consecutive_connect_failures: u32,
}

impl<S: IdleSource, B: Broker> HeartbeatScheduler<S, B> {
    pub fn new(
        detector: IdleDetector<S>,
        publisher: HeartbeatPublisher<B>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            detector,
            publisher,
            topic: topic.into(),
            state: SchedulerState::Disconnected,
            consecutive_connect_failures: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Run a single tick.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.state == SchedulerState::Disconnected {
            match self.publisher.connect().await {
                Ok(()) => {
                    if self.consecutive_connect_failures > 0 {
                        info!(
                            "Connected to broker after {} failed attempts",
                            self.consecutive_connect_failures
                        );
                    }
                    self.consecutive_connect_failures = 0;
                    self.state = SchedulerState::Connected;
                }
                Err(e) => {
                    self.report_connect_failure(&e);
                    return TickOutcome::ConnectFailed;
                }
            }
        }

        let status = match self.detector.status() {
            Ok(status) => status,
            Err(e) => {
                warn!("Skipping heartbeat, cannot read idle time: {}", e);
                return TickOutcome::IdleQueryFailed;
            }
        };

        self.state = SchedulerState::Publishing;
        match self
            .publisher
            .publish(&self.topic, status.as_str(), true)
            .await
        {
            Ok(()) => {
                debug!("Heartbeat: {}", status);
                self.state = SchedulerState::Connected;
                TickOutcome::Published(status)
            }
            Err(e) => {
                error!("{}", e);
                self.state = SchedulerState::Disconnected;
                TickOutcome::PublishFailed
            }
        }
    }

    /// Tick every `interval` until `shutdown` is cancelled, then release the
    /// broker connection.
    ///
    /// A tick in flight when shutdown arrives is abandoned.
    pub async fn run(&mut self, interval: Duration, shutdown: CancellationToken) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Publishing heartbeats to '{}' every {:?}",
            self.topic, interval
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    tokio::select! {
                        () = shutdown.cancelled() => {
                            info!("Shutdown requested during tick, abandoning it");
                            break;
                        }
                        _ = self.tick() => {}
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Close the broker connection, waiting at most [`SHUTDOWN_GRACE`].
    pub async fn shutdown(&mut self) {
        if timeout(SHUTDOWN_GRACE, self.publisher.disconnect())
            .await
            .is_err()
        {
            warn!(
                "Broker connection did not close within {:?}",
                SHUTDOWN_GRACE
            );
        }
        self.state = SchedulerState::Disconnected;
    }

    fn report_connect_failure(&mut self, e: &ConnectionError) {
        let count = self.consecutive_connect_failures;
        self.consecutive_connect_failures = count.saturating_add(1);

        match failure_log_level(count) {
            FailureLog::Error => error!("{}", e),
            FailureLog::LastBeforeRateLimit => {
                error!("{}", e);
                warn!(
                    "Rate-limiting connection errors (showing every {}th)",
                    CONNECT_ERROR_RATE_LIMIT
                );
            }
            FailureLog::Suppressed => debug!("{}", e),
        }
    }
}

/// How to log a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureLog {
    Error,
    /// Logged, and rate limiting starts with the next failure.
    LastBeforeRateLimit,
    Suppressed,
}

/// Decide how to log the failure that follows `previous` consecutive ones.
fn failure_log_level(previous: u32) -> FailureLog {
    if previous == CONNECT_ERROR_BURST - 1 {
        FailureLog::LastBeforeRateLimit
    } else if previous < CONNECT_ERROR_BURST || previous % CONNECT_ERROR_RATE_LIMIT == 0 {
        FailureLog::Error
    } else {
        FailureLog::Suppressed
    }
}
