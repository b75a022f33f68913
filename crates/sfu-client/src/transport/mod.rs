//! Local transports
//!
//! A [`Transport`] pairs a server-issued descriptor with the engine handler
//! built from it. The first time a transport needs the network it fires its
//! connect hook; each new outbound flow fires the produce hook after that.
//! Both hooks are registered by the owning session manager.
//!
//! ```text
//!   New ──connect hook──► Connecting ──ack──► Connected
//!                              │
//!                              └──error──► Failed (never reused)
//!   any ──close()──► Closed
//! ```

pub mod hooks;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::consumer::Consumer;
use crate::engine::{ReceiveRequest, ReceiveResult, SendRequest, SendResult, TransportHandler};
use crate::error::{Error, Result};
use crate::events::{EventBus, ProducerEndReason, SessionEvent};
use crate::media::MediaParameters;
use crate::producer::Producer;
use crate::signaling::messages::{ConsumeParams, ProduceRequest};
use crate::types::{
    ConsumerId, Direction, ProducerId, RtpCodecCapability, TransportDescriptor, TransportId,
};

pub use hooks::{
    connect_via, produce_via, ConnectHook, ConnectObserver, ConnectPhase, HookCompletion,
    ProduceHook,
};

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One send or receive transport
pub struct Transport {
    id: TransportId,
    direction: Direction,
    descriptor: TransportDescriptor,
    handler: Arc<dyn TransportHandler>,
    state: watch::Sender<TransportState>,
    /// Serializes connect attempts so the hook fires at most once
    connect_gate: tokio::sync::Mutex<()>,
    connect_hook: Mutex<Option<ConnectHook>>,
    produce_hook: Mutex<Option<ProduceHook>>,
    producers: DashMap<ProducerId, Arc<Producer>>,
    consumers: DashMap<ConsumerId, Arc<Consumer>>,
    events: EventBus,
}

impl Transport {
    pub fn new(
        direction: Direction,
        descriptor: TransportDescriptor,
        handler: Arc<dyn TransportHandler>,
        events: EventBus,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(TransportState::New);
        info!(
            transport = %descriptor.id,
            direction = %direction,
            candidates = descriptor.ice_candidates.len(),
            "Transport created"
        );
        Arc::new(Self {
            id: descriptor.id.clone(),
            direction,
            descriptor,
            handler,
            state,
            connect_gate: tokio::sync::Mutex::new(()),
            connect_hook: Mutex::new(None),
            produce_hook: Mutex::new(None),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            events,
        })
    }

    /// Register the connect hook
    pub fn on_connect(&self, hook: ConnectHook) {
        *self.connect_hook.lock() = Some(hook);
    }

    /// Register the produce hook (send transports only)
    pub fn on_produce(&self, hook: ProduceHook) {
        *self.produce_hook.lock() = Some(hook);
    }

    pub fn id(&self) -> &TransportId {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The descriptor this transport was built from
    pub fn descriptor(&self) -> &TransportDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == TransportState::Closed
    }

    /// Producers created on this transport
    pub fn producers(&self) -> Vec<Arc<Producer>> {
        self.producers.iter().map(|e| e.value().clone()).collect()
    }

    /// Consumers created on this transport
    pub fn consumers(&self) -> Vec<Arc<Consumer>> {
        self.consumers.iter().map(|e| e.value().clone()).collect()
    }

    /// Start sending a local track
    ///
    /// Fires the connect hook first if the transport has never connected,
    /// then the produce hook. Returns once the SFU has issued a producer id.
    pub async fn produce(
        &self,
        params: MediaParameters,
        codecs: Vec<RtpCodecCapability>,
    ) -> Result<Arc<Producer>> {
        if !self.direction.is_sender() {
            return Err(Error::invalid_state("produce", "receive transport"));
        }
        self.ensure_usable()?;
        if params.track.is_ended() {
            return Err(Error::invalid_state("produce", "track ended"));
        }
        let hook = self
            .produce_hook
            .lock()
            .clone()
            .ok_or_else(|| Error::invalid_state("produce", "no produce hook registered"))?;

        self.ensure_connected().await?;

        let kind = params.track.kind();
        let SendResult {
            local_id,
            rtp_parameters,
        } = self
            .handler
            .send(SendRequest {
                track: params.track.clone(),
                encodings: params.encodings.clone(),
                codec_options: params.codec_options.clone(),
                codecs,
            })
            .await?;

        debug!(transport = %self.id, track = %params.track.id(), "Firing produce hook");
        let (done, waiter) = HookCompletion::new("produce");
        hook(
            ProduceRequest {
                kind,
                rtp_parameters: rtp_parameters.clone(),
                app_data: params.app_data.clone(),
            },
            done,
        )
        .await;

        let outcome = waiter.wait().await.and_then(|id| {
            if id.is_empty() {
                Err(Error::remote("SFU returned an empty producer id"))
            } else {
                Ok(id)
            }
        });
        let id = match outcome {
            Ok(id) => id,
            Err(e) => {
                warn!(transport = %self.id, error = %e, "Produce rejected, releasing sender");
                if let Err(stop) = self.handler.stop_sending(&local_id).await {
                    warn!(transport = %self.id, error = %stop, "Failed to release sender");
                }
                return Err(e);
            }
        };

        let producer = Producer::start(
            id,
            local_id,
            params,
            rtp_parameters,
            self.handler.clone(),
            self.state.subscribe(),
            self.events.clone(),
        );
        self.producers.insert(producer.id().clone(), producer.clone());
        Ok(producer)
    }

    /// Start receiving a remote flow
    ///
    /// The returned consumer is paused; the caller resumes it through
    /// signaling.
    pub async fn consume(&self, params: ConsumeParams) -> Result<Arc<Consumer>> {
        if self.direction.is_sender() {
            return Err(Error::invalid_state("consume", "send transport"));
        }
        self.ensure_usable()?;
        self.ensure_connected().await?;

        let ReceiveResult { local_id, track } = self
            .handler
            .receive(ReceiveRequest {
                consumer_id: params.id.clone(),
                kind: params.kind,
                rtp_parameters: params.rtp_parameters.clone(),
            })
            .await?;

        let consumer = Arc::new(Consumer::new(
            params,
            local_id,
            track,
            self.handler.clone(),
            self.events.clone(),
        ));
        self.consumers.insert(consumer.id().clone(), consumer.clone());
        debug!(transport = %self.id, consumer = %consumer.id(), "Consumer created paused");
        Ok(consumer)
    }

    pub(crate) fn remove_producer(&self, id: &ProducerId) -> Option<Arc<Producer>> {
        self.producers.remove(id).map(|(_, producer)| producer)
    }

    pub(crate) fn remove_consumer(&self, id: &ConsumerId) -> Option<Arc<Consumer>> {
        self.consumers.remove(id).map(|(_, consumer)| consumer)
    }

    /// Close the transport, ending every producer and consumer on it
    pub async fn close(&self) {
        let previous = self.state.send_replace(TransportState::Closed);
        if previous == TransportState::Closed {
            return;
        }
        info!(transport = %self.id, direction = %self.direction, "Closing transport");

        let producers: Vec<Arc<Producer>> = self.producers.iter().map(|e| e.value().clone()).collect();
        self.producers.clear();
        for producer in producers {
            producer.end(ProducerEndReason::TransportClosed).await;
        }

        let consumers: Vec<Arc<Consumer>> = self.consumers.iter().map(|e| e.value().clone()).collect();
        self.consumers.clear();
        for consumer in consumers {
            consumer.close_local().await;
        }

        self.handler.close();
    }

    /// Fails once the transport is closed or could not connect
    pub(crate) fn ensure_usable(&self) -> Result<()> {
        match self.state() {
            TransportState::Failed => Err(Error::TransportFailed(format!(
                "transport {} failed to connect",
                self.id
            ))),
            TransportState::Closed => Err(Error::closed(format!("transport {}", self.id))),
            _ => Ok(()),
        }
    }

    /// Fire the connect hook unless the transport is already connected
    async fn ensure_connected(&self) -> Result<()> {
        let _gate = self.connect_gate.lock().await;

        match self.state() {
            TransportState::Connected => return Ok(()),
            TransportState::New | TransportState::Connecting => {}
            TransportState::Failed | TransportState::Closed => return self.ensure_usable(),
        }

        let hook = self
            .connect_hook
            .lock()
            .clone()
            .ok_or_else(|| Error::invalid_state("connect", "no connect hook registered"))?;

        self.state.send_replace(TransportState::Connecting);
        info!(transport = %self.id, direction = %self.direction, "Connecting transport");

        let (done, waiter) = HookCompletion::new("connect");
        hook(self.handler.local_dtls_parameters(), done).await;

        match waiter.wait().await {
            Ok(()) => {
                if self.state() == TransportState::Closed {
                    return Err(Error::closed(format!("transport {}", self.id)));
                }
                self.state.send_replace(TransportState::Connected);
                info!(transport = %self.id, "Transport connected");
                self.events.emit(SessionEvent::TransportConnected {
                    transport_id: self.id.clone(),
                    direction: self.direction,
                });
                Ok(())
            }
            Err(e) => {
                if self.state() != TransportState::Closed {
                    self.state.send_replace(TransportState::Failed);
                }
                error!(transport = %self.id, error = %e, "Transport connect failed");
                self.events.emit(SessionEvent::TransportFailed {
                    transport_id: self.id.clone(),
                    direction: self.direction,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .finish()
    }
}
