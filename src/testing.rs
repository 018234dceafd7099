//! In-memory stand-ins for the host idle clock and the broker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{Broker, BrokerSession, TransportError};
use crate::config::ConnectionConfig;
use crate::domain::HeartbeatMessage;
use crate::idle::{IdleSource, PlatformQueryError};

#[derive(Debug, Default)]
struct ScriptedIdle {
    idle: Duration,
    fail_next: Option<String>,
}

/// Idle source whose reading is set by the test. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedIdleSource {
    inner: Arc<Mutex<ScriptedIdle>>,
}

impl ScriptedIdleSource {
    pub fn new(idle: Duration) -> Self {
        let source = Self::default();
        source.set_idle(idle);
        source
    }

    pub fn set_idle(&self, idle: Duration) {
        self.inner.lock().unwrap().idle = idle;
    }

    /// Simulate a keyboard or mouse event.
    pub fn input_event(&self) {
        self.set_idle(Duration::ZERO);
    }

    /// Make the next query fail with `reason`.
    pub fn fail_next(&self, reason: &str) {
        self.inner.lock().unwrap().fail_next = Some(reason.to_string());
    }
}

impl IdleSource for ScriptedIdleSource {
    fn idle_time(&mut self) -> Result<Duration, PlatformQueryError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.fail_next.take() {
            Some(reason) => Err(PlatformQueryError::QueryFailed(reason)),
            None => Ok(inner.idle),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    published: Vec<HeartbeatMessage>,
    refuse: bool,
    connect_attempts: u32,
    closed: u32,
    next_id: u64,
    live: Option<u64>,
}

/// Broker that records messages in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse = refuse;
    }

    /// Kill the live connection from the broker side.
    pub fn drop_connection(&self) {
        self.state.lock().unwrap().live = None;
    }

    pub fn published(&self) -> Vec<HeartbeatMessage> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn closed_sessions(&self) -> u32 {
        self.state.lock().unwrap().closed
    }

    pub fn is_live(&self) -> bool {
        self.state.lock().unwrap().live.is_some()
    }
}

pub struct MemorySession {
    id: u64,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Broker for MemoryBroker {
    type Session = MemorySession;

    async fn connect(&self, _config: &ConnectionConfig) -> Result<MemorySession, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.refuse {
            return Err(TransportError::Unreachable("connection refused".to_string()));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.live = Some(id);

        Ok(MemorySession {
            id,
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn publish(&mut self, message: &HeartbeatMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.live != Some(self.id) {
            return Err(TransportError::Closed("connection reset by peer".to_string()));
        }
        state.published.push(message.clone());
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.live == Some(self.id) {
            state.live = None;
        }
        state.closed += 1;
    }
}
