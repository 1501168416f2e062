//! Broker transports
//!
//! [`BrokerTransport`] is the seam between the connection manager and the
//! wire. [`MqttTransport`] speaks MQTT through `rumqttc`: a driver task
//! polls the event loop, reports the CONNACK for `connect()` and flips the
//! link flag when the connection drops.

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill as MqttLastWill, MqttOptions,
    Packet, QoS,
};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::BrokerError;

use super::config::BrokerConfig;

/// One outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: u8, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }
}

/// Message the broker publishes on our behalf if the connection dies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

/// A connection to a message broker
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open the connection with `will` registered
    async fn connect(&self, will: &LastWill) -> Result<(), BrokerError>;

    /// Publish one message
    async fn publish(&self, message: Message) -> Result<(), BrokerError>;

    /// Close the connection. Safe to call when closed.
    async fn disconnect(&self);

    /// Link flag: `true` while the connection is up
    fn link(&self) -> watch::Receiver<bool>;
}

fn mqtt_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

struct Session {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

/// Aborts the event loop driver and drops the link unless disarmed
struct DriverGuard {
    driver: Option<AbortHandle>,
    link: Arc<watch::Sender<bool>>,
}

impl DriverGuard {
    fn disarm(mut self) {
        self.driver = None;
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
            self.link.send_replace(false);
        }
    }
}

/// MQTT 3.1.1 transport
pub struct MqttTransport {
    config: BrokerConfig,
    session: Mutex<Option<Session>>,
    link: Arc<watch::Sender<bool>>,
}

impl MqttTransport {
    pub fn new(config: BrokerConfig) -> Self {
        let (link, _) = watch::channel(false);
        Self {
            config,
            session: Mutex::new(None),
            link: Arc::new(link),
        }
    }

    fn options(&self, will: &LastWill) -> MqttOptions {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        options.set_last_will(MqttLastWill::new(
            &will.topic,
            will.payload.as_bytes().to_vec(),
            mqtt_qos(will.qos),
            will.retain,
        ));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }
        options
    }

    async fn drive(
        mut eventloop: EventLoop,
        link: Arc<watch::Sender<bool>>,
        mut connack: Option<oneshot::Sender<Result<(), BrokerError>>>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        link.send_replace(true);
                        if let Some(tx) = connack.take() {
                            let _ = tx.send(Ok(()));
                        }
                    } else {
                        let err = BrokerError::Connect(format!("connection refused: {:?}", ack.code));
                        if let Some(tx) = connack.take() {
                            let _ = tx.send(Err(err));
                        }
                        break;
                    }
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                    tracing::debug!("MQTT disconnect sent");
                }
                Ok(_) => {}
                Err(e) => {
                    match connack.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(BrokerError::Connect(e.to_string())));
                        }
                        None => tracing::warn!(error = %e, "MQTT connection lost"),
                    }
                    break;
                }
            }
        }
        link.send_replace(false);
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(&self, will: &LastWill) -> Result<(), BrokerError> {
        self.disconnect().await;

        let (client, eventloop) = AsyncClient::new(self.options(will), 64);
        let (tx, rx) = oneshot::channel();
        let driver = tokio::spawn(Self::drive(eventloop, Arc::clone(&self.link), Some(tx)));

        // the driver must not outlive this future unless the CONNACK arrives
        let guard = DriverGuard {
            driver: Some(driver.abort_handle()),
            link: Arc::clone(&self.link),
        };
        *self.session.lock().await = Some(Session { client, driver });

        let acked = match tokio::time::timeout(self.config.connect_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrokerError::Connect("event loop exited".into())),
            Err(_) => Err(BrokerError::ConnectTimeout(self.config.connect_timeout)),
        };

        match acked {
            Ok(()) => {
                tracing::debug!(host = %self.config.host, port = self.config.port, "MQTT connected");
                guard.disarm();
                Ok(())
            }
            Err(e) => {
                self.session.lock().await.take();
                Err(e)
            }
        }
    }

    async fn publish(&self, message: Message) -> Result<(), BrokerError> {
        let client = match self.session.lock().await.as_ref() {
            Some(session) if *self.link.borrow() => session.client.clone(),
            _ => return Err(BrokerError::NotConnected),
        };

        client
            .publish(
                message.topic,
                mqtt_qos(message.qos),
                message.retain,
                message.payload.into_bytes(),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    async fn disconnect(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };

        if let Err(e) = session.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
        }

        let mut driver = session.driver;
        if tokio::time::timeout(std::time::Duration::from_secs(1), &mut driver)
            .await
            .is_err()
        {
            driver.abort();
            let _ = driver.await;
        }
        self.link.send_replace(false);
    }

    fn link(&self) -> watch::Receiver<bool> {
        self.link.subscribe()
    }
}
