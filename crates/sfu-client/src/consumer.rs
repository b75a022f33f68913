//! Inbound media flows

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::TransportHandler;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::media::MediaTrack;
use crate::signaling::messages::ConsumeParams;
use crate::types::{ConsumerId, MediaKind, ProducerId, RtpParameters};

/// Lifecycle of a consumer
///
/// Consumers start paused on the SFU side; media only flows after a resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Paused,
    ResumeRequested,
    Active,
    Closed,
}

impl ConsumerState {
    pub fn can_transition_to(self, to: ConsumerState) -> bool {
        use ConsumerState::*;
        matches!(
            (self, to),
            (Paused, ResumeRequested)
                | (Paused, Closed)
                | (ResumeRequested, Active)
                | (ResumeRequested, Paused)
                | (ResumeRequested, Closed)
                | (Active, Paused)
                | (Active, Closed)
        )
    }
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paused => write!(f, "paused"),
            Self::ResumeRequested => write!(f, "resume-requested"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One inbound flow and the track it renders into
pub struct Consumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    local_id: String,
    track: MediaTrack,
    handler: Arc<dyn TransportHandler>,
    state: Mutex<ConsumerState>,
    events: EventBus,
    created_at: DateTime<Utc>,
}

impl Consumer {
    pub(crate) fn new(
        params: ConsumeParams,
        local_id: String,
        track: MediaTrack,
        handler: Arc<dyn TransportHandler>,
        events: EventBus,
    ) -> Self {
        Self {
            id: params.id,
            producer_id: params.producer_id,
            kind: params.kind,
            rtp_parameters: params.rtp_parameters,
            local_id,
            track,
            handler,
            state: Mutex::new(ConsumerState::Paused),
            events,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &ConsumerId {
        &self.id
    }

    /// Id of the remote producer this consumer receives from
    pub fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    /// Track receiving the remote media
    pub fn track(&self) -> &MediaTrack {
        &self.track
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConsumerState::Closed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Validated state change; emits [`SessionEvent::ConsumerStateChanged`]
    pub(crate) fn transition(&self, to: ConsumerState) -> Result<ConsumerState> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if !previous.can_transition_to(to) {
                return Err(Error::invalid_state("consumer transition", format!("{} -> {}", previous, to)));
            }
            *state = to;
            previous
        };

        debug!(consumer = %self.id, from = %previous, to = %to, "Consumer state changed");
        self.events.emit(SessionEvent::ConsumerStateChanged {
            consumer_id: self.id.clone(),
            previous,
            current: to,
        });
        Ok(previous)
    }

    pub(crate) async fn pause_local(&self) {
        if let Err(e) = self.handler.pause_receiving(&self.local_id).await {
            warn!(consumer = %self.id, error = %e, "Failed to pause engine receiver");
        }
    }

    pub(crate) async fn resume_local(&self) {
        if let Err(e) = self.handler.resume_receiving(&self.local_id).await {
            warn!(consumer = %self.id, error = %e, "Failed to resume engine receiver");
        }
    }

    /// Release the receiver and end the track. Returns false if already closed.
    pub(crate) async fn close_local(&self) -> bool {
        if self.transition(ConsumerState::Closed).is_err() {
            return false;
        }
        if let Err(e) = self.handler.stop_receiving(&self.local_id).await {
            warn!(consumer = %self.id, error = %e, "Failed to stop engine receiver");
        }
        self.track.stop();
        true
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("producer_id", &self.producer_id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}
