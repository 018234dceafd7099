//! Message broker backends.
//!
//! A [`Broker`] opens sessions; a [`BrokerSession`] is one live connection
//! that can publish until it fails or is closed.

pub mod dry_run;
pub mod mqtt;

use std::time::Duration;

use async_trait::async_trait;
pub use dry_run::DryRunBroker;
pub use mqtt::MqttBroker;
use thiserror::Error;

use crate::config::ConnectionConfig;
use crate::domain::HeartbeatMessage;

/// Low-level failure reported by a broker backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Broker refused the connection: {0}")]
    Rejected(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection lost: {0}")]
    Closed(String),

    #[error("Request rejected before sending: {0}")]
    Request(String),
}

/// Something that can open connections to a broker.
#[async_trait]
pub trait Broker: Send + Sync {
    type Session: BrokerSession;

    /// Open a new connection. Must not outlive the backend's connect timeout.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Session, TransportError>;
}

/// A single live broker connection.
#[async_trait]
pub trait BrokerSession: Send {
    /// Send one message. Must not outlive the backend's publish timeout.
    async fn publish(&mut self, message: &HeartbeatMessage) -> Result<(), TransportError>;

    /// Close the connection. Errors are logged, not returned.
    async fn close(&mut self);
}
