//! Heartbeat publishing over a single broker connection.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerSession, TransportError};
use crate::config::ConnectionConfig;
use crate::domain::HeartbeatMessage;

/// Could not establish a broker connection.
///
/// Carries enough of the configuration to debug a misconfiguration. Never
/// includes the password.
#[derive(Error, Debug, Clone)]
#[error(
    "Client could not connect to broker {endpoint} (username: '{username}', client id: '{client_id}'): {cause}"
)]
pub struct ConnectionError {
    pub endpoint: String,
    pub username: String,
    pub client_id: String,
    #[source]
    pub cause: TransportError,
}

impl ConnectionError {
    fn new(config: &ConnectionConfig, cause: TransportError) -> Self {
        Self {
            endpoint: config.endpoint(),
            username: config.username_or_empty().to_string(),
            client_id: config.client_id.clone(),
            cause,
        }
    }
}

/// Why a publish did not go out.
#[derive(Error, Debug, Clone)]
pub enum PublishFailure {
    #[error("Not connected to a broker")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A message could not be delivered.
#[derive(Error, Debug, Clone)]
#[error("Failed to publish (topic: '{topic}', payload: '{payload}', retain: {retain}): {cause}")]
pub struct PublishError {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    #[source]
    pub cause: PublishFailure,
}

impl PublishError {
    fn new(message: &HeartbeatMessage, cause: PublishFailure) -> Self {
        Self {
            topic: message.topic().to_string(),
            payload: message.payload().to_string(),
            retain: message.retain(),
            cause,
        }
    }
}

/// Owns at most one broker connection and publishes over it.
///
/// A failed connect or a failed publish leaves the publisher without a
/// connection, so a broken handle is never reused.
pub struct HeartbeatPublisher<B: Broker> {
    broker: B,
    config: ConnectionConfig,
    session: Option<B::Session>,
}

impl<B: Broker> HeartbeatPublisher<B> {
    pub fn new(broker: B, config: ConnectionConfig) -> Self {
        Self {
            broker,
            config,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Open a fresh connection, replacing any existing one.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.disconnect().await;

        match self.broker.connect(&self.config).await {
            Ok(session) => {
                self.session = Some(session);
                Ok(())
            }
            Err(cause) => Err(ConnectionError::new(&self.config, cause)),
        }
    }

    /// Publish `payload` on `topic`. Both are lower-cased before sending.
    ///
    /// Does not retry. On failure the connection is dropped and the error
    /// returned; the caller decides when to reconnect.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), PublishError> {
        let message = HeartbeatMessage::new(topic, payload, retain);

        let Some(session) = self.session.as_mut() else {
            return Err(PublishError::new(&message, PublishFailure::NotConnected));
        };

        match session.publish(&message).await {
            Ok(()) => {
                debug!(
                    "Published '{}' to '{}' (retain={})",
                    message.payload(),
                    message.topic(),
                    message.retain()
                );
                Ok(())
            }
            Err(cause) => {
                warn!("Dropping broker connection after failed publish");
                if let Some(mut broken) = self.session.take() {
                    broken.close().await;
                }
                Err(PublishError::new(&message, cause.into()))
            }
        }
    }

    /// Close the connection if one is open.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from broker {}", self.config.endpoint());
            session.close().await;
        }
    }
}
