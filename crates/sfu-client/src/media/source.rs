//! Local media acquisition
//!
//! [`MediaSource`] is the platform seam (camera, screen capture). The
//! [`LocalSourceAcquirer`] validates constraints, asks the platform for a
//! track and binds it to the configured simulcast table.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::media::parameters::{validate_encodings, CodecOptions, MediaParameters};
use crate::media::track::MediaTrack;
use crate::types::{MediaKind, RtpEncodingParameters};

/// Inclusive range constraint on a capture dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRange {
    pub min: u32,
    pub max: u32,
}

impl ConstraintRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Capture constraints for `get_user_media`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    /// Capture audio alongside video
    pub audio: bool,
    pub width: ConstraintRange,
    pub height: ConstraintRange,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            audio: false,
            width: ConstraintRange::new(640, 1920),
            height: ConstraintRange::new(400, 1080),
        }
    }
}

impl VideoConstraints {
    pub fn validate(&self) -> Result<()> {
        for (name, range) in [("width", self.width), ("height", self.height)] {
            if range.min == 0 || range.min > range.max {
                return Err(Error::config(format!(
                    "invalid {} constraint {}..={}",
                    name, range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

/// Platform capture access
///
/// Implementations suspend until the platform grants or denies access and
/// report refusal as [`Error::PermissionDenied`] and missing hardware as
/// [`Error::DeviceUnavailable`].
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn get_user_media(&self, constraints: &VideoConstraints) -> Result<MediaTrack>;
}

/// Obtains a local video track and binds it to encoding parameters
pub struct LocalSourceAcquirer {
    source: Arc<dyn MediaSource>,
    encodings: Vec<RtpEncodingParameters>,
    codec_options: CodecOptions,
    current: Mutex<Option<MediaParameters>>,
}

impl LocalSourceAcquirer {
    pub fn new(
        source: Arc<dyn MediaSource>,
        encodings: Vec<RtpEncodingParameters>,
        codec_options: CodecOptions,
    ) -> Self {
        Self {
            source,
            encodings,
            codec_options,
            current: Mutex::new(None),
        }
    }

    /// Request a camera track and bind it to the simulcast table
    ///
    /// Failures leave any previously acquired parameters untouched so the
    /// caller can retry after prompting the user again.
    pub async fn acquire_local_video(&self, constraints: &VideoConstraints) -> Result<MediaParameters> {
        constraints.validate()?;
        validate_encodings(&self.encodings)?;

        debug!(?constraints, "Requesting local video");
        let track = match self.source.get_user_media(constraints).await {
            Ok(track) => track,
            Err(e) => {
                warn!(error = %e, "Local media acquisition failed");
                return Err(e);
            }
        };

        if track.kind() != MediaKind::Video {
            track.stop();
            return Err(Error::DeviceUnavailable(format!(
                "platform returned a {} track for a video request",
                track.kind()
            )));
        }

        info!(track = %track.id(), label = %track.label(), "Local video acquired");

        let params = MediaParameters::new(track)
            .with_encodings(self.encodings.clone())
            .with_codec_options(self.codec_options.clone());

        if let Some(previous) = self.current.lock().replace(params.clone()) {
            debug!(track = %previous.track.id(), "Replacing previously acquired track");
        }
        Ok(params)
    }

    /// The most recently acquired parameters
    pub fn current(&self) -> Option<MediaParameters> {
        self.current.lock().clone()
    }

    /// Stop and forget the current track
    pub fn release(&self) {
        if let Some(params) = self.current.lock().take() {
            params.track.stop();
        }
    }
}
