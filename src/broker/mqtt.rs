//! MQTT 3.1.1 broker backend built on rumqttc.
//!
//! rumqttc splits a connection into an `AsyncClient` (request handle) and an
//! `EventLoop` that must be polled to make progress. After the CONNACK the
//! event loop is driven by a background task that forwards PUBACKs and the
//! first connection error back to the session. It never reconnects on its
//! own: reconnecting is the scheduler's job.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::{Broker, BrokerSession, TransportError};
use crate::config::ConnectionConfig;
use crate::domain::HeartbeatMessage;

/// Upper bound on connect, including TCP/TLS setup and CONNACK.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single publish, until PUBACK.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 10;

/// Build rumqttc options from the connection config.
pub fn mqtt_options(config: &ConnectionConfig) -> MqttOptions {
    let mut options = MqttOptions::new(
        config.client_id.clone(),
        config.broker_host.clone(),
        config.broker_port,
    );
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);

    if let Some((username, password)) = config.credentials() {
        options.set_credentials(username, password);
    }

    if config.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    options
}

/// rumqttc-backed [`Broker`].
#[derive(Debug, Clone)]
pub struct MqttBroker {
    connect_timeout: Duration,
    publish_timeout: Duration,
}

impl Default for MqttBroker {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            publish_timeout: PUBLISH_TIMEOUT,
        }
    }
}

impl MqttBroker {
    pub fn with_timeouts(connect_timeout: Duration, publish_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            publish_timeout,
        }
    }
}

#[async_trait]
impl Broker for MqttBroker {
    type Session = MqttSession;

    async fn connect(&self, config: &ConnectionConfig) -> Result<MqttSession, TransportError> {
        debug!(
            "Connecting to MQTT broker {} (tls={}, client id={})",
            config.endpoint(),
            config.use_tls,
            config.client_id
        );

        let (client, mut eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY);

        match timeout(self.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransportError::Timeout(self.connect_timeout)),
        }

        info!("Connected to MQTT broker {}", config.endpoint());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive_event_loop(eventloop, events_tx));

        Ok(MqttSession {
            client,
            events: events_rx,
            driver,
            publish_timeout: self.publish_timeout,
        })
    }
}

/// What the event loop task reports back to its session.
#[derive(Debug)]
enum LoopEvent {
    PubAck(u16),
    Failed(String),
}

/// One live MQTT connection.
pub struct MqttSession {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<LoopEvent>,
    driver: JoinHandle<()>,
    publish_timeout: Duration,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn publish(&mut self, message: &HeartbeatMessage) -> Result<(), TransportError> {
        // A failed publish discards the session, so the only thing queued
        // here is a connection failure reported since the last publish.
        while let Ok(event) = self.events.try_recv() {
            if let LoopEvent::Failed(reason) = event {
                return Err(TransportError::Closed(reason));
            }
        }

        self.client
            .publish(
                message.topic(),
                QoS::AtLeastOnce,
                message.retain(),
                message.payload().as_bytes().to_vec(),
            )
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        match timeout(self.publish_timeout, self.events.recv()).await {
            Ok(Some(LoopEvent::PubAck(pkid))) => {
                trace!("PUBACK {} for {}", pkid, message.topic());
                Ok(())
            }
            Ok(Some(LoopEvent::Failed(reason))) => Err(TransportError::Closed(reason)),
            Ok(None) => Err(TransportError::Closed("event loop stopped".to_string())),
            Err(_) => Err(TransportError::Timeout(self.publish_timeout)),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect request not delivered: {}", e);
        }

        if timeout(CLOSE_GRACE, &mut self.driver).await.is_err() {
            warn!("MQTT event loop did not stop within {:?}, aborting", CLOSE_GRACE);
            self.driver.abort();
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Poll until the broker answers the CONNECT.
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::Rejected(format!("{:?}", ack.code)))
                };
            }
            Ok(event) => trace!("MQTT event before CONNACK: {:?}", event),
            Err(e) => return Err(classify(e)),
        }
    }
}

/// Drive the event loop until it fails or the client disconnects.
async fn drive_event_loop(mut eventloop: EventLoop, events: mpsc::UnboundedSender<LoopEvent>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                if events.send(LoopEvent::PubAck(ack.pkid)).is_err() {
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(event) => trace!("MQTT event: {:?}", event),
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                let _ = events.send(LoopEvent::Failed(e.to_string()));
                break;
            }
        }
    }

    debug!("MQTT event loop task exiting");
}

fn classify(err: ConnectionError) -> TransportError {
    match err {
        ConnectionError::ConnectionRefused(code) => TransportError::Rejected(format!("{code:?}")),
        ConnectionError::Tls(e) => TransportError::Tls(e.to_string()),
        other => TransportError::Unreachable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    const CONNACK_NOT_AUTHORIZED: [u8; 4] = [0x20, 0x02, 0x00, 0x05];

    /// Read one MQTT packet (fixed header + body). Small packets only.
    async fn read_packet(stream: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.unwrap();
        assert!(header[1] < 0x80, "test broker only handles short packets");
        let mut body = vec![0u8; header[1] as usize];
        stream.read_exact(&mut body).await.unwrap();
        let mut packet = header.to_vec();
        packet.extend(body);
        packet
    }

    async fn listener() -> (TcpListener, ConnectionConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ConnectionConfig::new("127.0.0.1", port, "pc1"))
    }

    fn broker() -> MqttBroker {
        MqttBroker::with_timeouts(Duration::from_secs(2), Duration::from_secs(2))
    }

    #[test]
    fn test_options_plain() {
        let config = ConnectionConfig::new("broker.local", 1883, "pc1");
        let options = mqtt_options(&config);

        assert_eq!(options.client_id(), "pc1");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1883));
        assert!(options.clean_session());
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
        assert!(options.credentials().is_none());
        assert!(matches!(options.transport(), Transport::Tcp));
    }

    #[test]
    fn test_options_credentials_and_tls() {
        let mut config = ConnectionConfig::new("broker.local", 8883, "pc1");
        config.use_tls = true;
        config.username = Some("alice".to_string());
        config.password = Some("pw".to_string());

        let options = mqtt_options(&config);
        assert_eq!(
            options.credentials(),
            Some(("alice".to_string(), "pw".to_string()))
        );
        assert!(matches!(options.transport(), Transport::Tls(_)));
    }

    #[test]
    fn test_options_skip_half_credentials() {
        let mut config = ConnectionConfig::new("broker.local", 1883, "pc1");
        config.username = Some("alice".to_string());
        assert!(mqtt_options(&config).credentials().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_port() {
        let (listener, config) = listener().await;
        drop(listener);

        let err = broker().connect(&config).await.err().unwrap();
        assert!(matches!(err, TransportError::Unreachable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_connect_times_out_on_silent_broker() {
        let (listener, config) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let broker = MqttBroker::with_timeouts(Duration::from_millis(200), PUBLISH_TIMEOUT);
        let err = broker.connect(&config).await.err().unwrap();
        assert_eq!(err, TransportError::Timeout(Duration::from_millis(200)));
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_rejected_by_broker() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let connect = read_packet(&mut stream).await;
            assert_eq!(connect[0] >> 4, 1);
            stream.write_all(&CONNACK_NOT_AUTHORIZED).await.unwrap();
        });

        let err = broker().connect(&config).await.err().unwrap();
        assert!(matches!(err, TransportError::Rejected(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_publish_waits_for_puback() {
        let (listener, config) = listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_packet(&mut stream).await;
            stream.write_all(&CONNACK_ACCEPTED).await.unwrap();

            let publish = read_packet(&mut stream).await;
            // PUBLISH, QoS 1, retain
            assert_eq!(publish[0], 0x33);
            let topic_len = u16::from_be_bytes([publish[2], publish[3]]) as usize;
            let topic = String::from_utf8(publish[4..4 + topic_len].to_vec()).unwrap();
            let pkid = [publish[4 + topic_len], publish[5 + topic_len]];
            let payload = String::from_utf8(publish[6 + topic_len..].to_vec()).unwrap();
            stream
                .write_all(&[0x40, 0x02, pkid[0], pkid[1]])
                .await
                .unwrap();
            (topic, payload)
        });

        let mut session = broker().connect(&config).await.unwrap();
        let msg = HeartbeatMessage::new("Heartbeat/PC1", "IDLE", true);
        session.publish(&msg).await.unwrap();

        let (topic, payload) = server.await.unwrap();
        assert_eq!(topic, "heartbeat/pc1");
        assert_eq!(payload, "idle");
    }

    #[tokio::test]
    async fn test_publish_to_wildcard_topic_is_rejected_locally() {
        let (listener, config) = listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_packet(&mut stream).await;
            stream.write_all(&CONNACK_ACCEPTED).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let mut session = broker().connect(&config).await.unwrap();
        let msg = HeartbeatMessage::new("heartbeat/desk#1", "idle", true);
        let err = session.publish(&msg).await.unwrap_err();

        assert!(matches!(err, TransportError::Request(_)), "{err:?}");
        server.abort();
    }

    #[tokio::test]
    async fn test_publish_fails_after_broker_drops_connection() {
        let (listener, config) = listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_packet(&mut stream).await;
            stream.write_all(&CONNACK_ACCEPTED).await.unwrap();
            stream
        });

        let mut session = broker().connect(&config).await.unwrap();
        drop(server.await.unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let msg = HeartbeatMessage::new("heartbeat/pc1", "active", true);
        assert!(session.publish(&msg).await.is_err());
    }
}
