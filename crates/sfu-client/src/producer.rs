//! Outbound media flows
//!
//! A [`Producer`] exists once the SFU has confirmed the flow and issued its
//! id. From then on it watches two things: its track and its transport.
//! Whichever ends first ends the producer, and the engine-side sender is
//! released exactly once.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::TransportHandler;
use crate::events::{EventBus, ProducerEndReason, SessionEvent};
use crate::media::{MediaParameters, MediaTrack};
use crate::transport::TransportState;
use crate::types::{AppData, MediaKind, ProducerId, RtpParameters};

/// Lifecycle of a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// Id issued by the SFU, not yet watching its track
    Confirmed,
    Active,
    Ended(ProducerEndReason),
}

/// One outbound flow bound to a local track
pub struct Producer {
    id: ProducerId,
    local_id: String,
    kind: MediaKind,
    track: MediaTrack,
    rtp_parameters: RtpParameters,
    app_data: AppData,
    handler: Arc<dyn TransportHandler>,
    state: watch::Sender<ProducerState>,
    events: EventBus,
    created_at: DateTime<Utc>,
}

impl Producer {
    /// Build an active producer and start watching its track and transport
    pub(crate) fn start(
        id: ProducerId,
        local_id: String,
        params: MediaParameters,
        rtp_parameters: RtpParameters,
        handler: Arc<dyn TransportHandler>,
        transport_state: watch::Receiver<TransportState>,
        events: EventBus,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ProducerState::Confirmed);
        let producer = Arc::new(Self {
            id,
            local_id,
            kind: params.track.kind(),
            track: params.track,
            rtp_parameters,
            app_data: params.app_data,
            handler,
            state,
            events,
            created_at: Utc::now(),
        });

        Self::spawn_watcher(&producer, transport_state);
        producer.state.send_replace(ProducerState::Active);

        info!(
            producer = %producer.id,
            kind = %producer.kind,
            track = %producer.track.id(),
            layers = producer.rtp_parameters.encodings.len(),
            "Producer active"
        );
        producer.events.emit(SessionEvent::ProducerCreated {
            producer_id: producer.id.clone(),
            kind: producer.kind,
            track_id: producer.track.id().to_string(),
        });
        producer
    }

    fn spawn_watcher(producer: &Arc<Self>, mut transport_state: watch::Receiver<TransportState>) {
        let weak: Weak<Self> = Arc::downgrade(producer);
        let track = producer.track.clone();
        let mut own_state = producer.state.subscribe();

        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = track.ended() => ProducerEndReason::TrackEnded,
                _ = async {
                    let _ = transport_state.wait_for(|s| *s == TransportState::Closed).await;
                } => ProducerEndReason::TransportClosed,
                _ = async {
                    let _ = own_state.wait_for(|s| matches!(s, ProducerState::Ended(_))).await;
                } => return,
            };

            if let Some(producer) = weak.upgrade() {
                producer.end(reason).await;
            }
        });
    }

    pub fn id(&self) -> &ProducerId {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn track(&self) -> &MediaTrack {
        &self.track
    }

    /// Parameters the SFU accepted, including every simulcast layer
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    pub fn app_data(&self) -> &AppData {
        &self.app_data
    }

    pub fn state(&self) -> ProducerState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ProducerState::Active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Stop producing and stop the track
    pub async fn close(&self) {
        self.end(ProducerEndReason::Closed).await;
    }

    /// Wait until the producer ends
    pub async fn closed(&self) -> ProducerEndReason {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| matches!(s, ProducerState::Ended(_))).await {
            Ok(state) => match *state {
                ProducerState::Ended(reason) => reason,
                _ => ProducerEndReason::Closed,
            },
            Err(_) => ProducerEndReason::Closed,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ProducerState> {
        self.state.subscribe()
    }

    /// Move to `Ended`. Only the first call releases resources.
    pub(crate) async fn end(&self, reason: ProducerEndReason) -> bool {
        let mut first = false;
        self.state.send_if_modified(|state| {
            if matches!(state, ProducerState::Ended(_)) {
                return false;
            }
            *state = ProducerState::Ended(reason);
            first = true;
            true
        });
        if !first {
            debug!(producer = %self.id, "Producer already ended");
            return false;
        }

        info!(producer = %self.id, reason = %reason, "Producer ended");

        if let Err(e) = self.handler.stop_sending(&self.local_id).await {
            warn!(producer = %self.id, error = %e, "Failed to stop engine sender");
        }
        if reason == ProducerEndReason::Closed {
            self.track.stop();
        }

        self.events.emit(SessionEvent::ProducerEnded {
            producer_id: self.id.clone(),
            reason,
        });
        true
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("track", &self.track.id())
            .field("state", &self.state())
            .finish()
    }
}
