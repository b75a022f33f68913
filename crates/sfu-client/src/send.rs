//! Send-side negotiation
//!
//! ```text
//!   Idle ─► TransportRequested ─► TransportCreated ─► Connecting ─► Connected ─► Producing ─► Ended
//!                  │                                      │
//!                  └────────────── Failed ◄───────────────┘
//! ```
//!
//! `Failed` only means the last attempt failed: a new transport can be
//! requested from there.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::device::Device;
use crate::engine::MediaEngine;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::media::MediaParameters;
use crate::producer::{Producer, ProducerState};
use crate::signaling::messages::{
    CreateTransportReply, CreateTransportRequest, CREATE_WEBRTC_TRANSPORT, TRANSPORT_CONNECT,
    TRANSPORT_PRODUCE,
};
use crate::signaling::SignalingGateway;
use crate::transport::{connect_via, produce_via, ConnectPhase, Transport, TransportState};
use crate::types::Direction;

/// State of the send side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    TransportRequested,
    TransportCreated,
    Connecting,
    Connected,
    Producing,
    Ended,
    Failed,
}

impl SendState {
    pub fn can_transition_to(self, to: SendState) -> bool {
        use SendState::*;
        matches!(
            (self, to),
            (Idle, TransportRequested)
                | (Failed, TransportRequested)
                | (TransportRequested, TransportCreated)
                | (TransportRequested, Failed)
                | (TransportCreated, Connecting)
                | (TransportCreated, Ended)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Producing)
                | (Connected, Ended)
                | (Producing, Ended)
                | (Ended, Producing)
        )
    }
}

impl std::fmt::Display for SendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::TransportRequested => "transport-requested",
            Self::TransportCreated => "transport-created",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Producing => "producing",
            Self::Ended => "ended",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Shared state cell, cloned into hook observers and producer watchers
#[derive(Clone)]
struct SendStateCell {
    state: Arc<watch::Sender<SendState>>,
    events: EventBus,
}

impl SendStateCell {
    fn get(&self) -> SendState {
        *self.state.borrow()
    }

    fn transition(&self, operation: &'static str, to: SendState) -> Result<()> {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if !state.can_transition_to(to) {
                return false;
            }
            previous = Some(*state);
            *state = to;
            true
        });

        match previous {
            Some(previous) => {
                debug!(from = %previous, to = %to, "Send state changed");
                self.events.emit(SessionEvent::SendStateChanged {
                    previous,
                    current: to,
                });
                Ok(())
            }
            None => Err(Error::invalid_state(operation, self.get())),
        }
    }

    /// Put the side back to `to` if it is still in `from`, bypassing the
    /// transition table
    fn rollback(&self, from: SendState, to: SendState) {
        let rolled_back = self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        });
        if rolled_back {
            debug!(from = %from, to = %to, "Send state rolled back");
            self.events.emit(SessionEvent::SendStateChanged {
                previous: from,
                current: to,
            });
        }
    }
}

/// Returns the side to its prior state if a transport request is dropped
/// before it settles
struct RequestGuard {
    cell: SendStateCell,
    prior: SendState,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.cell.rollback(SendState::TransportRequested, self.prior);
    }
}

/// Owns the send transport and every producer on it
pub struct SendSessionManager {
    gateway: Arc<SignalingGateway>,
    engine: Arc<dyn MediaEngine>,
    cell: SendStateCell,
    transport: RwLock<Option<Arc<Transport>>>,
    device: RwLock<Option<Arc<Device>>>,
}

impl SendSessionManager {
    pub fn new(gateway: Arc<SignalingGateway>, engine: Arc<dyn MediaEngine>, events: EventBus) -> Self {
        let (state, _) = watch::channel(SendState::Idle);
        Self {
            gateway,
            engine,
            cell: SendStateCell {
                state: Arc::new(state),
                events,
            },
            transport: RwLock::new(None),
            device: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SendState {
        self.cell.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<SendState> {
        self.cell.state.subscribe()
    }

    /// The current send transport
    pub fn transport(&self) -> Option<Arc<Transport>> {
        self.transport.read().clone()
    }

    /// Ask the SFU for a send transport and build it locally
    ///
    /// An `{error}` reply fails with [`Error::RemoteNegotiation`], leaves no
    /// transport behind and allows a retry.
    pub async fn create_send_transport(&self, device: Arc<Device>) -> Result<Arc<Transport>> {
        let prior = self.state();
        self.cell.transition("create_send_transport", SendState::TransportRequested)?;
        let _guard = RequestGuard {
            cell: self.cell.clone(),
            prior,
        };

        // A transport left behind by a failed attempt still holds engine resources
        let stale = self.transport.write().take();
        if let Some(stale) = stale {
            debug!(transport = %stale.id(), "Closing transport from failed attempt");
            stale.close().await;
        }

        let descriptor = match self
            .gateway
            .request_typed::<_, CreateTransportReply>(
                CREATE_WEBRTC_TRANSPORT,
                &CreateTransportRequest { sender: true },
            )
            .await
        {
            Ok(reply) => match reply.params.into_result() {
                Ok(descriptor) => descriptor,
                Err(message) => {
                    error!(error = %message, "SFU refused to create send transport");
                    self.fail();
                    return Err(Error::RemoteNegotiation(message));
                }
            },
            Err(e) => {
                error!(error = %e, "Send transport request failed");
                self.fail();
                return Err(e);
            }
        };

        let handler = match self.engine.create_transport_handler(Direction::Send, &descriptor) {
            Ok(handler) => handler,
            Err(e) => {
                error!(error = %e, "Engine could not build send transport");
                self.fail();
                return Err(e);
            }
        };

        let transport = Transport::new(
            Direction::Send,
            descriptor,
            handler,
            self.cell.events.clone(),
        );

        let cell = self.cell.clone();
        transport.on_connect(connect_via(
            self.gateway.clone(),
            TRANSPORT_CONNECT,
            Arc::new(move |phase| {
                let to = match phase {
                    ConnectPhase::Started => SendState::Connecting,
                    ConnectPhase::Succeeded => SendState::Connected,
                    ConnectPhase::Failed => SendState::Failed,
                };
                if let Err(e) = cell.transition("transport connect", to) {
                    debug!(error = %e, "Ignoring connect phase");
                }
            }),
        ));
        transport.on_produce(produce_via(self.gateway.clone(), TRANSPORT_PRODUCE));

        *self.transport.write() = Some(transport.clone());
        *self.device.write() = Some(device);
        self.cell.transition("create_send_transport", SendState::TransportCreated)?;
        Ok(transport)
    }

    /// Produce a local track on the send transport
    ///
    /// The first call connects the transport. Producing a track that already
    /// has a live producer is rejected.
    pub async fn produce(&self, params: MediaParameters) -> Result<Arc<Producer>> {
        let transport = self
            .transport()
            .ok_or_else(|| Error::invalid_state("produce", self.state()))?;
        let device = self
            .device
            .read()
            .clone()
            .ok_or_else(|| Error::invalid_state("produce", "device not loaded"))?;

        let kind = params.track.kind();
        if !device.can_produce(kind) {
            return Err(Error::UnsupportedEnvironment(format!("cannot produce {}", kind)));
        }

        let duplicate = transport
            .producers()
            .iter()
            .any(|p| p.track().id() == params.track.id() && !matches!(p.state(), ProducerState::Ended(_)));
        if duplicate {
            return Err(Error::invalid_state("produce", "track already produced"));
        }

        info!(track = %params.track.id(), kind = %kind, layers = params.encodings.len(), "Producing");
        let producer = transport.produce(params, device.send_codecs(kind)).await?;

        self.cell.transition("produce", SendState::Producing).or_else(|e| {
            // A second producer keeps the side in Producing
            if self.state() == SendState::Producing {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        self.watch_producer(&producer, transport);
        Ok(producer)
    }

    /// Close the send transport and every producer on it
    pub async fn close(&self) {
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        // Idle and Failed have nothing to end
        let _ = self.cell.transition("close", SendState::Ended);
    }

    /// Drop ended producers from the transport and move to Ended once none
    /// is live
    fn watch_producer(&self, producer: &Arc<Producer>, transport: Arc<Transport>) {
        let mut rx = producer.subscribe();
        let id = producer.id().clone();
        let cell = self.cell.clone();
        tokio::spawn(async move {
            let _ = rx.wait_for(|s| matches!(s, ProducerState::Ended(_))).await;
            transport.remove_producer(&id);
            let live = transport.producers().iter().any(|p| p.is_active());
            if !live && cell.get() == SendState::Producing {
                if let Err(e) = cell.transition("producer ended", SendState::Ended) {
                    warn!(error = %e, "Could not end send side");
                }
            }
        });
    }

    fn fail(&self) {
        if let Err(e) = self.cell.transition("fail", SendState::Failed) {
            warn!(error = %e, "Could not mark send side failed");
        }
    }
}
