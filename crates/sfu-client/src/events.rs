//! Event system for the SFU client
//!
//! Every component publishes into one broadcast channel owned by the
//! session. Presentation code subscribes with [`EventBus::subscribe`] and
//! reacts to state changes instead of polling.

use tokio::sync::broadcast;
use tracing::trace;

use crate::consumer::ConsumerState;
use crate::recv::RecvState;
use crate::send::SendState;
use crate::types::{ConsumerId, Direction, MediaKind, ProducerId, TransportId};

/// Why a producer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerEndReason {
    /// The local track ended
    TrackEnded,
    /// The send transport closed underneath it
    TransportClosed,
    /// Closed by the application
    Closed,
}

impl std::fmt::Display for ProducerEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrackEnded => write!(f, "track ended"),
            Self::TransportClosed => write!(f, "transport closed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Events emitted by the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The SFU announced our connection
    Connected {
        connection_id: String,
    },

    /// Remote capabilities fetched
    CapabilitiesLoaded {
        codec_count: usize,
    },

    /// Local device loaded against the remote capabilities
    DeviceLoaded {
        can_produce_video: bool,
        can_produce_audio: bool,
    },

    SendStateChanged {
        previous: SendState,
        current: SendState,
    },

    RecvStateChanged {
        previous: RecvState,
        current: RecvState,
    },

    /// DTLS parameters acknowledged by the SFU
    TransportConnected {
        transport_id: TransportId,
        direction: Direction,
    },

    /// Transport can no longer be used
    TransportFailed {
        transport_id: TransportId,
        direction: Direction,
        reason: String,
    },

    ProducerCreated {
        producer_id: ProducerId,
        kind: MediaKind,
        track_id: String,
    },

    ProducerEnded {
        producer_id: ProducerId,
        reason: ProducerEndReason,
    },

    ConsumerCreated {
        consumer_id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
    },

    ConsumerStateChanged {
        consumer_id: ConsumerId,
        previous: ConsumerState,
        current: ConsumerState,
    },

    /// The signaling channel went away
    ChannelClosed {
        reason: String,
    },
}

/// Cloneable publisher for session events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        trace!(?event, "Session event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}
