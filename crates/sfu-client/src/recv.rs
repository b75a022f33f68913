//! Receive-side negotiation
//!
//! ```text
//!   Idle ─► TransportRequested ─► TransportCreated ─► ConsumeRequested ─► Connecting ─► Connected ─► Paused ─► Active
//!                  │                                                          │                        ▲  │
//!                  └──────────────────────── Failed ◄─────────────────────────┘                        └──┘
//! ```
//!
//! Consumers always start paused on the SFU. A resume signal is sent right
//! after creation and media only flows once it has been handled.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ConsumerControlMode;
use crate::consumer::{Consumer, ConsumerState};
use crate::device::Device;
use crate::engine::MediaEngine;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::signaling::messages::{
    ConsumeReply, ConsumeRequest, ConsumerControl, CreateTransportReply, CreateTransportRequest,
    CONSUME, CONSUMER_CLOSE, CONSUMER_PAUSE, CONSUMER_RESUME, CREATE_WEBRTC_TRANSPORT,
    TRANSPORT_RECV_CONNECT,
};
use crate::signaling::SignalingGateway;
use crate::transport::hooks::check_ack;
use crate::transport::{connect_via, ConnectPhase, Transport};
use crate::types::{ConsumerId, Direction};

/// State of the receive side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Idle,
    TransportRequested,
    TransportCreated,
    Connecting,
    Connected,
    ConsumeRequested,
    Paused,
    Active,
    Closed,
    Failed,
}

impl RecvState {
    pub fn can_transition_to(self, to: RecvState) -> bool {
        use RecvState::*;
        match (self, to) {
            (Idle | Failed, TransportRequested) => true,
            (TransportRequested, TransportCreated | Failed) => true,
            (TransportCreated | Connected | Paused | Active | Closed, ConsumeRequested) => true,
            // A rejected consume returns to where it started
            (ConsumeRequested, TransportCreated | Connected | Paused | Active | Closed) => true,
            (ConsumeRequested | TransportCreated, Connecting) => true,
            (Connecting, Connected | Failed) => true,
            (Connected, Paused) => true,
            // The only consumer was discarded before it was resumed
            (Paused, Connected) => true,
            (Paused, Active) | (Active, Paused) => true,
            (TransportCreated | Connected | Paused | Active, Closed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RecvState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::TransportRequested => "transport-requested",
            Self::TransportCreated => "transport-created",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConsumeRequested => "consume-requested",
            Self::Paused => "paused",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone)]
struct RecvStateCell {
    state: Arc<watch::Sender<RecvState>>,
    events: EventBus,
}

impl RecvStateCell {
    fn get(&self) -> RecvState {
        *self.state.borrow()
    }

    fn transition(&self, operation: &'static str, to: RecvState) -> Result<()> {
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
                debug!(from = %previous, to = %to, "Recv state changed");
                self.events.emit(SessionEvent::RecvStateChanged {
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
    fn rollback(&self, from: RecvState, to: RecvState) {
        let rolled_back = self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        });
        if rolled_back {
            debug!(from = %from, to = %to, "Recv state rolled back");
            self.events.emit(SessionEvent::RecvStateChanged {
                previous: from,
                current: to,
            });
        }
    }

    /// Best-effort transition for follow-up bookkeeping
    fn settle(&self, to: RecvState) {
        if self.get() == to {
            return;
        }
        if let Err(e) = self.transition("settle", to) {
            debug!(error = %e, "Recv state left unchanged");
        }
    }
}

/// Returns the side to its prior state if a transport request is dropped
/// before it settles
struct RequestGuard {
    cell: RecvStateCell,
    prior: RecvState,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.cell.rollback(RecvState::TransportRequested, self.prior);
    }
}

/// Owns the receive transport and every consumer on it
pub struct RecvSessionManager {
    gateway: Arc<SignalingGateway>,
    engine: Arc<dyn MediaEngine>,
    control: ConsumerControlMode,
    cell: RecvStateCell,
    transport: RwLock<Option<Arc<Transport>>>,
    consumers: DashMap<ConsumerId, Arc<Consumer>>,
    latest: RwLock<Option<ConsumerId>>,
}

impl RecvSessionManager {
    pub fn new(
        gateway: Arc<SignalingGateway>,
        engine: Arc<dyn MediaEngine>,
        control: ConsumerControlMode,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(RecvState::Idle);
        Self {
            gateway,
            engine,
            control,
            cell: RecvStateCell {
                state: Arc::new(state),
                events,
            },
            transport: RwLock::new(None),
            consumers: DashMap::new(),
            latest: RwLock::new(None),
        }
    }

    pub fn state(&self) -> RecvState {
        self.cell.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecvState> {
        self.cell.state.subscribe()
    }

    pub fn transport(&self) -> Option<Arc<Transport>> {
        self.transport.read().clone()
    }

    pub fn consumer(&self, id: &ConsumerId) -> Option<Arc<Consumer>> {
        self.consumers.get(id).map(|c| c.value().clone())
    }

    /// The most recently created consumer that is still open
    pub fn latest_consumer(&self) -> Option<Arc<Consumer>> {
        let id = self.latest.read().clone()?;
        self.consumer(&id)
    }

    /// Ask the SFU for a receive transport and build it locally
    pub async fn create_recv_transport(&self) -> Result<Arc<Transport>> {
        let prior = self.state();
        self.cell.transition("create_recv_transport", RecvState::TransportRequested)?;
        let _guard = RequestGuard {
            cell: self.cell.clone(),
            prior,
        };

        let stale = self.transport.write().take();
        if let Some(stale) = stale {
            debug!(transport = %stale.id(), "Closing transport from failed attempt");
            stale.close().await;
        }

        let descriptor = match self
            .gateway
            .request_typed::<_, CreateTransportReply>(
                CREATE_WEBRTC_TRANSPORT,
                &CreateTransportRequest { sender: false },
            )
            .await
        {
            Ok(reply) => match reply.params.into_result() {
                Ok(descriptor) => descriptor,
                Err(message) => {
                    error!(error = %message, "SFU refused to create receive transport");
                    self.cell.settle(RecvState::Failed);
                    return Err(Error::RemoteNegotiation(message));
                }
            },
            Err(e) => {
                error!(error = %e, "Receive transport request failed");
                self.cell.settle(RecvState::Failed);
                return Err(e);
            }
        };

        let handler = match self.engine.create_transport_handler(Direction::Recv, &descriptor) {
            Ok(handler) => handler,
            Err(e) => {
                error!(error = %e, "Engine could not build receive transport");
                self.cell.settle(RecvState::Failed);
                return Err(e);
            }
        };

        let transport = Transport::new(Direction::Recv, descriptor, handler, self.cell.events.clone());

        let cell = self.cell.clone();
        transport.on_connect(connect_via(
            self.gateway.clone(),
            TRANSPORT_RECV_CONNECT,
            Arc::new(move |phase| {
                cell.settle(match phase {
                    ConnectPhase::Started => RecvState::Connecting,
                    ConnectPhase::Succeeded => RecvState::Connected,
                    ConnectPhase::Failed => RecvState::Failed,
                });
            }),
        ));

        *self.transport.write() = Some(transport.clone());
        self.cell.transition("create_recv_transport", RecvState::TransportCreated)?;
        Ok(transport)
    }

    /// Consume the SFU's producer with our device capabilities
    ///
    /// The consumer is created paused and resumed immediately; if the SFU
    /// rejects that resume the consumer is closed on both ends. A reply
    /// carrying `{error}` fails with [`Error::ConsumeRejected`] and leaves the
    /// receive side where it was.
    pub async fn consume(&self, device: &Device) -> Result<Arc<Consumer>> {
        let transport = self
            .transport()
            .ok_or_else(|| Error::invalid_state("consume", self.state()))?;
        transport.ensure_usable()?;

        let prior = self.state();
        self.cell.transition("consume", RecvState::ConsumeRequested)?;

        let reply = self
            .gateway
            .request_typed::<_, ConsumeReply>(
                CONSUME,
                &ConsumeRequest {
                    rtp_capabilities: device.rtp_capabilities().clone(),
                },
            )
            .await;

        let params = match reply.map(|r| r.params.into_result()) {
            Ok(Ok(params)) => params,
            Ok(Err(message)) => {
                warn!(error = %message, "SFU rejected consume");
                self.cell.settle(prior);
                return Err(Error::ConsumeRejected(message));
            }
            Err(e) => {
                self.cell.settle(prior);
                return Err(e);
            }
        };

        if !device.can_consume(params.kind, &params.rtp_parameters) {
            self.cell.settle(prior);
            return Err(Error::ConsumeRejected(format!(
                "{} flow uses a codec outside the negotiated set",
                params.kind
            )));
        }

        let consumer = match transport.consume(params).await {
            Ok(consumer) => consumer,
            Err(e) => {
                if self.state() == RecvState::ConsumeRequested {
                    self.cell.settle(prior);
                }
                return Err(e);
            }
        };

        self.cell.settle(RecvState::Paused);
        self.consumers.insert(consumer.id().clone(), consumer.clone());
        *self.latest.write() = Some(consumer.id().clone());

        info!(
            consumer = %consumer.id(),
            producer = %consumer.producer_id(),
            kind = %consumer.kind(),
            "Consumer created"
        );
        self.cell.events.emit(SessionEvent::ConsumerCreated {
            consumer_id: consumer.id().clone(),
            producer_id: consumer.producer_id().clone(),
            kind: consumer.kind(),
        });

        if let Err(e) = self.resume(consumer.id()).await {
            warn!(consumer = %consumer.id(), error = %e, "Initial resume failed, discarding consumer");
            self.discard(&consumer, prior).await;
            return Err(e);
        }
        Ok(consumer)
    }

    /// Tear down a consumer that never became active
    async fn discard(&self, consumer: &Arc<Consumer>, prior: RecvState) {
        let id = consumer.id();
        if let Err(e) = self.signal(CONSUMER_CLOSE, id).await {
            warn!(consumer = %id, error = %e, "SFU did not accept consumer-close");
        }
        self.forget(id);
        consumer.close_local().await;

        if self.consumers.is_empty() {
            self.cell.settle(RecvState::Connected);
        } else {
            self.cell.settle(prior);
        }
    }

    /// Remove a consumer from every table
    fn forget(&self, id: &ConsumerId) {
        self.consumers.remove(id);
        if let Some(transport) = self.transport() {
            transport.remove_consumer(id);
        }
        let mut latest = self.latest.write();
        if latest.as_ref() == Some(id) {
            *latest = None;
        }
    }

    /// Ask the SFU to start forwarding media to a consumer
    pub async fn resume(&self, id: &ConsumerId) -> Result<()> {
        let consumer = self.require(id, "resume")?;
        consumer.transition(ConsumerState::ResumeRequested)?;

        if let Err(e) = self.signal(CONSUMER_RESUME, id).await {
            let _ = consumer.transition(ConsumerState::Paused);
            return Err(e);
        }

        consumer.resume_local().await;
        consumer.transition(ConsumerState::Active)?;
        self.cell.settle(RecvState::Active);
        Ok(())
    }

    /// Ask the SFU to stop forwarding media to a consumer
    pub async fn pause(&self, id: &ConsumerId) -> Result<()> {
        let consumer = self.require(id, "pause")?;
        if consumer.state() != ConsumerState::Active {
            return Err(Error::invalid_state("pause", consumer.state()));
        }

        self.signal(CONSUMER_PAUSE, id).await?;

        consumer.transition(ConsumerState::Paused)?;
        consumer.pause_local().await;
        self.cell.settle(RecvState::Paused);
        Ok(())
    }

    /// Close a consumer on the SFU and locally
    pub async fn close_consumer(&self, id: &ConsumerId) -> Result<()> {
        let consumer = self.require(id, "close")?;

        self.signal(CONSUMER_CLOSE, id).await?;

        self.forget(id);
        consumer.close_local().await;

        if self.consumers.is_empty() {
            self.cell.settle(RecvState::Closed);
        }
        Ok(())
    }

    /// Close the receive transport and every consumer on it
    pub async fn close(&self) {
        self.consumers.clear();
        self.latest.write().take();
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        self.cell.settle(RecvState::Closed);
    }

    fn require(&self, id: &ConsumerId, operation: &'static str) -> Result<Arc<Consumer>> {
        self.consumer(id)
            .filter(|c| !c.is_closed())
            .ok_or_else(|| Error::invalid_state(operation, format!("unknown consumer {}", id)))
    }

    /// Send a consumer control signal according to the configured mode
    async fn signal(&self, method: &'static str, id: &ConsumerId) -> Result<()> {
        let payload = serde_json::to_value(ConsumerControl {
            consumer_id: id.clone(),
        })?;
        match self.control {
            ConsumerControlMode::Acknowledged => {
                let ack = self.gateway.request(method, payload).await?;
                check_ack(&ack)
            }
            ConsumerControlMode::FireAndForget => self.gateway.notify(method, payload).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recv_transitions() {
        use RecvState::*;

        assert!(Idle.can_transition_to(TransportRequested));
        assert!(TransportCreated.can_transition_to(ConsumeRequested));
        assert!(ConsumeRequested.can_transition_to(Connecting));
        assert!(Connected.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(ConsumeRequested.can_transition_to(TransportCreated));

        assert!(!Idle.can_transition_to(ConsumeRequested));
        assert!(!Connecting.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Active));
        assert!(Paused.can_transition_to(Connected));
    }

    #[test]
    fn test_rollback_only_from_expected_state() {
        let (state, _) = watch::channel(RecvState::Idle);
        let cell = RecvStateCell {
            state: Arc::new(state),
            events: EventBus::new(4),
        };

        cell.transition("create", RecvState::TransportRequested).unwrap();
        cell.rollback(RecvState::TransportRequested, RecvState::Idle);
        assert_eq!(cell.get(), RecvState::Idle);

        cell.transition("create", RecvState::TransportRequested).unwrap();
        cell.transition("create", RecvState::TransportCreated).unwrap();
        cell.rollback(RecvState::TransportRequested, RecvState::Idle);
        assert_eq!(cell.get(), RecvState::TransportCreated);
    }
}
