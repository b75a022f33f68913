//! Session aggregate
//!
//! [`Session`] wires one signaling gateway to the capability negotiator, the
//! local source acquirer and both session managers. Its convenience methods
//! follow the usual publish/subscribe order:
//!
//! ```text
//! get_local_stream ─► get_rtp_capabilities ─► create_device
//!     ├─► create_send_transport ─► connect_send_transport   (publish)
//!     └─► create_recv_transport ─► connect_recv_transport   (subscribe)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capabilities::CapabilityNegotiator;
use crate::config::SessionConfig;
use crate::consumer::Consumer;
use crate::device::Device;
use crate::engine::MediaEngine;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::media::{LocalSourceAcquirer, MediaParameters, MediaSource};
use crate::producer::Producer;
use crate::recv::RecvSessionManager;
use crate::send::SendSessionManager;
use crate::signaling::messages::{ConnectionSuccess, CONNECTION_SUCCESS};
use crate::signaling::{SignalingChannel, SignalingGateway, SignalingMessage};
use crate::transport::Transport;
use crate::types::RtpCapabilities;

/// One negotiation session with an SFU
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    events: EventBus,
    gateway: Arc<SignalingGateway>,
    negotiator: CapabilityNegotiator,
    acquirer: LocalSourceAcquirer,
    send: SendSessionManager,
    recv: RecvSessionManager,
    connection_id: Arc<watch::Sender<Option<String>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    /// Build a session; the configuration is validated first
    pub fn new(
        config: SessionConfig,
        channel: Arc<dyn SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
        source: Arc<dyn MediaSource>,
    ) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_capacity);
        let gateway = SignalingGateway::new(channel, config.request_timeout, events.clone());
        let negotiator = CapabilityNegotiator::new(gateway.clone(), engine.clone(), events.clone());
        let acquirer = LocalSourceAcquirer::new(
            source,
            config.simulcast.clone(),
            config.codec_options.clone(),
        );
        let send = SendSessionManager::new(gateway.clone(), engine.clone(), events.clone());
        let recv = RecvSessionManager::new(
            gateway.clone(),
            engine,
            config.consumer_control,
            events.clone(),
        );
        let (connection_id, _) = watch::channel(None);

        let id = Uuid::new_v4();
        info!(session = %id, timeout = ?config.request_timeout, "Session created");

        Ok(Self {
            id,
            config,
            events,
            gateway,
            negotiator,
            acquirer,
            send,
            recv,
            connection_id: Arc::new(connection_id),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Start processing frames from the SFU
    pub fn connect(&self, inbound: mpsc::Receiver<SignalingMessage>) -> Result<()> {
        self.ensure_open()?;

        let mut listener = self.listener.lock();
        if listener.is_some() {
            return Err(Error::invalid_state("connect", "already connected"));
        }

        // Subscribe before attaching so an early connection-success is not lost
        let mut notifications = self.gateway.notifications();
        let connection_id = self.connection_id.clone();
        let events = self.events.clone();
        let session = self.id;

        *listener = Some(tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(n) if n.method == CONNECTION_SUCCESS => {
                        match serde_json::from_value::<ConnectionSuccess>(n.data) {
                            Ok(success) => {
                                info!(session = %session, connection = %success.socket_id, "Connected to SFU");
                                connection_id.send_replace(Some(success.socket_id.clone()));
                                events.emit(SessionEvent::Connected {
                                    connection_id: success.socket_id,
                                });
                            }
                            Err(e) => warn!(error = %e, "Malformed connection-success"),
                        }
                    }
                    Ok(n) => debug!(method = %n.method, "Unhandled notification"),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        self.gateway.attach(inbound);
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to session events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Id announced by the SFU through `connection-success`
    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.borrow().clone()
    }

    /// Wait for the SFU to announce the connection
    pub async fn wait_connected(&self) -> Result<String> {
        let mut rx = self.connection_id.subscribe();
        let id = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::closed("session"))?
            .clone();
        id.ok_or_else(|| Error::closed("session"))
    }

    pub fn gateway(&self) -> &Arc<SignalingGateway> {
        &self.gateway
    }

    pub fn negotiator(&self) -> &CapabilityNegotiator {
        &self.negotiator
    }

    pub fn acquirer(&self) -> &LocalSourceAcquirer {
        &self.acquirer
    }

    pub fn send_manager(&self) -> &SendSessionManager {
        &self.send
    }

    pub fn recv_manager(&self) -> &RecvSessionManager {
        &self.recv
    }

    pub fn device(&self) -> Option<Arc<Device>> {
        self.negotiator.device()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Acquire the local camera with the configured constraints and layers
    pub async fn get_local_stream(&self) -> Result<MediaParameters> {
        self.ensure_open()?;
        self.acquirer.acquire_local_video(&self.config.video).await
    }

    /// Fetch the SFU capabilities (cached after the first success)
    pub async fn get_rtp_capabilities(&self) -> Result<Arc<RtpCapabilities>> {
        self.ensure_open()?;
        self.negotiator.fetch_remote_capabilities().await
    }

    /// Load the device against the fetched capabilities
    pub fn create_device(&self) -> Result<Arc<Device>> {
        self.ensure_open()?;
        self.negotiator.initialize_device()
    }

    pub async fn create_send_transport(&self) -> Result<Arc<Transport>> {
        self.ensure_open()?;
        let device = self.require_device("create_send_transport")?;
        self.send.create_send_transport(device).await
    }

    /// Produce the acquired local track; connects the send transport first
    pub async fn connect_send_transport(&self) -> Result<Arc<Producer>> {
        self.ensure_open()?;
        let params = self
            .acquirer
            .current()
            .ok_or_else(|| Error::invalid_state("connect_send_transport", "no local stream"))?;
        self.send.produce(params).await
    }

    pub async fn create_recv_transport(&self) -> Result<Arc<Transport>> {
        self.ensure_open()?;
        self.require_device("create_recv_transport")?;
        self.recv.create_recv_transport().await
    }

    /// Consume the remote producer and resume it
    pub async fn connect_recv_transport(&self) -> Result<Arc<Consumer>> {
        self.ensure_open()?;
        let device = self.require_device("connect_recv_transport")?;
        self.recv.consume(&device).await
    }

    /// Pause the most recent consumer
    pub async fn pause_video(&self) -> Result<()> {
        let consumer = self.require_consumer("pause_video")?;
        self.recv.pause(consumer.id()).await
    }

    /// Resume the most recent consumer
    pub async fn resume_video(&self) -> Result<()> {
        let consumer = self.require_consumer("resume_video")?;
        self.recv.resume(consumer.id()).await
    }

    /// Close the most recent consumer
    pub async fn close_video(&self) -> Result<()> {
        let consumer = self.require_consumer("close_video")?;
        self.recv.close_consumer(consumer.id()).await
    }

    /// Tear everything down
    ///
    /// Producers end with `TransportClosed`, consumers close, the local track
    /// is released and the gateway fails anything still pending.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session = %self.id, "Closing session");

        self.send.close().await;
        self.recv.close().await;
        self.acquirer.release();
        self.gateway.close().await;

        let listener = self.listener.lock().take();
        if let Some(task) = listener {
            task.abort();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed("session"));
        }
        Ok(())
    }

    fn require_device(&self, operation: &'static str) -> Result<Arc<Device>> {
        self.negotiator
            .device()
            .ok_or_else(|| Error::invalid_state(operation, "device not loaded"))
    }

    fn require_consumer(&self, operation: &'static str) -> Result<Arc<Consumer>> {
        self.ensure_open()?;
        self.recv
            .latest_consumer()
            .ok_or_else(|| Error::invalid_state(operation, "no consumer"))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.listener.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id())
            .field("send", &self.send.state())
            .field("recv", &self.recv.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
