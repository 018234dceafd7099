//! Broker that logs instead of sending.

use async_trait::async_trait;
use tracing::info;

use super::{Broker, BrokerSession, TransportError};
use crate::config::ConnectionConfig;
use crate::domain::HeartbeatMessage;

/// Never touches the network. Every connect succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunBroker;

#[derive(Debug)]
pub struct DryRunSession {
    endpoint: String,
}

#[async_trait]
impl Broker for DryRunBroker {
    type Session = DryRunSession;

    async fn connect(&self, config: &ConnectionConfig) -> Result<DryRunSession, TransportError> {
        info!(
            "[DRY RUN] Would connect to {} (tls={}, client id={})",
            config.endpoint(),
            config.use_tls,
            config.client_id
        );
        Ok(DryRunSession {
            endpoint: config.endpoint(),
        })
    }
}

#[async_trait]
impl BrokerSession for DryRunSession {
    async fn publish(&mut self, message: &HeartbeatMessage) -> Result<(), TransportError> {
        info!(
            "[DRY RUN] Would publish '{}' to '{}' on {} (retain={})",
            message.payload(),
            message.topic(),
            self.endpoint,
            message.retain()
        );
        Ok(())
    }

    async fn close(&mut self) {
        info!("[DRY RUN] Would disconnect from {}", self.endpoint);
    }
}
