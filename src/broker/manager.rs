//! Broker connection manager
//!
//! Keeps one broker connection alive for the process. On every (re)connect
//! it publishes the retained "online" availability flag, re-advertises the
//! discovery configs and runs the on-connect hooks in order. A supervisor
//! task watches the link and reconnects with backoff after unexpected drops.
//! A deliberate [`BrokerManager::disconnect`] publishes "offline" first and
//! cancels the supervisor so no reconnect follows.

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::{BrokerError, ConfigError};
use crate::orchestrator::AnalysisResult;
use crate::retry::{sleep_or_shutdown, Backoff, ReconnectState};

use super::config::BrokerConfig;
use super::discovery::{self, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use super::transport::{BrokerTransport, LastWill, Message, MqttTransport};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Error returned by a connection hook
pub type HookError = Box<dyn StdError + Send + Sync>;

/// Runs after a connect or a deliberate disconnect
#[async_trait]
pub trait ConnectionHook: Send + Sync {
    async fn call(&self) -> Result<(), HookError>;
}

/// Hook wrapping a synchronous closure
pub struct FnHook<F> {
    f: F,
}

/// Adapt a synchronous closure into a [`ConnectionHook`]
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: Fn() -> Result<(), HookError> + Send + Sync,
{
    FnHook { f }
}

#[async_trait]
impl<F> ConnectionHook for FnHook<F>
where
    F: Fn() -> Result<(), HookError> + Send + Sync,
{
    async fn call(&self) -> Result<(), HookError> {
        (self.f)()
    }
}

struct Shared {
    config: BrokerConfig,
    transport: Arc<dyn BrokerTransport>,
    state: watch::Sender<ConnectionState>,
    on_connect: RwLock<Vec<Arc<dyn ConnectionHook>>>,
    on_disconnect: RwLock<Vec<Arc<dyn ConnectionHook>>>,
}

struct Supervisor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Broker connection with availability, discovery and reconnect
pub struct BrokerManager {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl BrokerManager {
    /// Manager over any transport
    pub fn new(config: BrokerConfig, transport: Arc<dyn BrokerTransport>) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport,
                state,
                on_connect: RwLock::new(Vec::new()),
                on_disconnect: RwLock::new(Vec::new()),
            }),
            supervisor: Mutex::new(None),
        })
    }

    /// Manager over MQTT
    pub fn mqtt(config: BrokerConfig) -> Result<Self, ConfigError> {
        let transport = Arc::new(MqttTransport::new(config.clone()));
        Self::new(config, transport)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver notified on state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Run `hook` after every successful connect
    pub async fn on_connect(&self, hook: impl ConnectionHook + 'static) {
        self.shared.on_connect.write().await.push(Arc::new(hook));
    }

    /// Run `hook` after every deliberate disconnect
    pub async fn on_disconnect(&self, hook: impl ConnectionHook + 'static) {
        self.shared.on_disconnect.write().await.push(Arc::new(hook));
    }

    /// Connect once, then keep the connection alive
    ///
    /// Returns the error of the first attempt; nothing keeps retrying in that
    /// case. Use [`start`](Self::start) to retry from the beginning.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_some() {
            return Ok(());
        }

        self.shared.establish().await?;
        *supervisor = Some(self.spawn_supervisor(true));
        Ok(())
    }

    /// Connect in the background, retrying with backoff until it succeeds
    pub async fn start(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_none() {
            *supervisor = Some(self.spawn_supervisor(false));
        }
    }

    fn spawn_supervisor(&self, connected: bool) -> Supervisor {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(shared.supervise(connected, shutdown_rx));
        Supervisor { shutdown, task }
    }

    /// Publish "offline", stop reconnecting, close, run disconnect hooks
    pub async fn disconnect(&self) {
        let supervisor = self.supervisor.lock().await.take();
        let was_connected = self.is_connected();

        if supervisor.is_none() && !was_connected {
            return;
        }

        if was_connected {
            let offline = self.shared.availability(PAYLOAD_OFFLINE);
            if let Err(e) = self.shared.transport.publish(offline).await {
                tracing::warn!(error = %e, "Failed to publish offline availability");
            }
        }

        if let Some(supervisor) = supervisor {
            let _ = supervisor.shutdown.send(true);
            if let Err(e) = supervisor.task.await {
                tracing::warn!(error = %e, "Broker supervisor failed");
            }
        }

        self.shared.transport.disconnect().await;
        self.shared.state.send_replace(ConnectionState::Disconnected);
        tracing::info!(host = %self.shared.config.host, "Broker disconnected");

        let hooks = self.shared.on_disconnect.read().await.clone();
        run_hooks("disconnect", &hooks).await;
    }

    /// Publish one retained discovery config per capability
    ///
    /// Returns the number of configs published.
    pub async fn publish_discovery(&self) -> Result<usize, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.shared.publish_discovery().await
    }

    /// Publish motion state and, with an analysis, the derived sensors
    pub async fn publish_state(
        &self,
        detected: bool,
        analysis: Option<&AnalysisResult>,
    ) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        for message in discovery::state_messages(&self.shared.config, detected, analysis) {
            self.shared.transport.publish(message).await?;
        }
        tracing::debug!(detected, with_analysis = analysis.is_some(), "State published");
        Ok(())
    }
}

impl Shared {
    fn availability(&self, payload: &str) -> Message {
        Message::new(self.config.availability_topic(), payload, self.config.qos, true)
    }

    fn last_will(&self) -> LastWill {
        LastWill {
            topic: self.config.availability_topic(),
            payload: PAYLOAD_OFFLINE.into(),
            qos: self.config.qos,
            retain: true,
        }
    }

    async fn publish_discovery(&self) -> Result<usize, BrokerError> {
        let mut published = 0;
        for capability in discovery::CAPABILITIES.iter() {
            let message = discovery::discovery_message(&self.config, capability)?;
            self.transport.publish(message).await?;
            published += 1;
        }
        tracing::debug!(count = published, "Discovery published");
        Ok(published)
    }

    /// One connection attempt plus the on-connect sequence
    async fn establish(&self) -> Result<(), BrokerError> {
        self.state.send_replace(ConnectionState::Connecting);

        let result = async {
            self.transport.connect(&self.last_will()).await?;
            self.transport.publish(self.availability(PAYLOAD_ONLINE)).await
        }
        .await;

        if let Err(e) = result {
            self.state.send_replace(ConnectionState::Disconnected);
            return Err(e);
        }

        self.state.send_replace(ConnectionState::Connected);
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            "Broker connected"
        );

        if let Err(e) = self.publish_discovery().await {
            tracing::warn!(error = %e, "Failed to publish discovery");
        }

        let hooks = self.on_connect.read().await.clone();
        run_hooks("connect", &hooks).await;
        Ok(())
    }

    async fn supervise(self: Arc<Self>, mut connected: bool, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = ReconnectState::new(self.config.retry.clone());

        loop {
            if connected {
                let mut link = self.transport.link();
                tokio::select! {
                    _ = link_lost(&mut link) => {}
                    _ = shutdown.changed() => return,
                }
                if *shutdown.borrow() {
                    return;
                }
                self.state.send_replace(ConnectionState::Disconnected);
                tracing::warn!(host = %self.config.host, "Broker connection lost");
                connected = false;
                backoff.reset();
                continue;
            }

            let result = tokio::select! {
                res = self.establish() => res,
                _ = shutdown.changed() => return,
            };

            match result {
                Ok(()) => {
                    connected = true;
                    backoff.reset();
                }
                Err(e) => {
                    tracing::warn!(host = %self.config.host, error = %e, "Broker connect failed");

                    let delay = match backoff.next_backoff() {
                        Backoff::Retry(delay) => {
                            tracing::info!(
                                attempt = backoff.attempt(),
                                delay_ms = delay.as_millis() as u64,
                                "Reconnecting to broker"
                            );
                            delay
                        }
                        Backoff::Exhausted(pause) => {
                            tracing::error!(
                                host = %self.config.host,
                                pause_secs = pause.as_secs(),
                                "Broker reconnect attempts exhausted, pausing before next cycle"
                            );
                            pause
                        }
                    };

                    if !sleep_or_shutdown(delay, &mut shutdown).await {
                        return;
                    }
                }
            }
        }
    }
}

/// Resolves once the link flag goes down (or its sender is gone)
async fn link_lost(link: &mut watch::Receiver<bool>) {
    while *link.borrow_and_update() {
        if link.changed().await.is_err() {
            break;
        }
    }
}

async fn run_hooks(phase: &str, hooks: &[Arc<dyn ConnectionHook>]) {
    for (index, hook) in hooks.iter().enumerate() {
        if let Err(e) = hook.call().await {
            tracing::warn!(phase, hook = index, error = %e, "Broker hook failed");
        }
    }
}
