//! Session configuration
//!
//! # Usage Examples
//!
//! ```rust
//! use rvoip_sfu_client::config::{ConsumerControlMode, SessionConfig};
//! use std::time::Duration;
//!
//! let config = SessionConfig::new()
//!     .with_request_timeout(Some(Duration::from_secs(5)))
//!     .with_consumer_control(ConsumerControlMode::FireAndForget)
//!     .with_event_capacity(128);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.event_capacity, 128);
//! assert_eq!(config.simulcast.len(), 3);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::media::{default_simulcast_encodings, validate_encodings, CodecOptions, VideoConstraints};
use crate::types::RtpEncodingParameters;

/// Default time a signaling request may wait for its reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How `consumer-pause` / `consumer-resume` / `consumer-close` are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerControlMode {
    /// Send as a request and update local state once the SFU acknowledges
    Acknowledged,
    /// Send as a notification and update local state immediately
    FireAndForget,
}

impl Default for ConsumerControlMode {
    fn default() -> Self {
        Self::Acknowledged
    }
}

/// Configuration for one negotiation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Per-request reply timeout; `None` waits indefinitely
    #[serde(with = "optional_millis")]
    pub request_timeout: Option<Duration>,

    pub consumer_control: ConsumerControlMode,

    /// Capacity of the session event broadcast channel
    pub event_capacity: usize,

    /// Capture constraints used by `get_local_stream`
    pub video: VideoConstraints,

    /// Simulcast layers attached to every produced track
    pub simulcast: Vec<RtpEncodingParameters>,

    pub codec_options: CodecOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            consumer_control: ConsumerControlMode::default(),
            event_capacity: 64,
            video: VideoConstraints::default(),
            simulcast: default_simulcast_encodings(),
            codec_options: CodecOptions::default(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_consumer_control(mut self, mode: ConsumerControlMode) -> Self {
        self.consumer_control = mode;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_video(mut self, video: VideoConstraints) -> Self {
        self.video = video;
        self
    }

    pub fn with_simulcast(mut self, encodings: Vec<RtpEncodingParameters>) -> Self {
        self.simulcast = encodings;
        self
    }

    pub fn with_codec_options(mut self, codec_options: CodecOptions) -> Self {
        self.codec_options = codec_options;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::config("event_capacity must be greater than zero"));
        }

        if self.request_timeout == Some(Duration::ZERO) {
            return Err(Error::config("request_timeout must be non-zero; use None to disable"));
        }

        self.video.validate()?;
        validate_encodings(&self.simulcast)?;

        Ok(())
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ConstraintRange;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.request_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.consumer_control, ConsumerControlMode::Acknowledged);
        assert_eq!(config.video.width, ConstraintRange::new(640, 1920));
        assert_eq!(config.video.height, ConstraintRange::new(400, 1080));
        assert!(!config.video.audio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        assert!(SessionConfig::new().with_event_capacity(0).validate().is_err());
        assert!(SessionConfig::new()
            .with_request_timeout(Some(Duration::ZERO))
            .validate()
            .is_err());
        assert!(SessionConfig::new().with_simulcast(vec![]).validate().is_err());

        // Unbounded waits are allowed
        assert!(SessionConfig::new().with_request_timeout(None).validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let config: SessionConfig = serde_json::from_value(serde_json::json!({
            "request_timeout": 2500,
            "consumer_control": "fire_and_forget",
            "event_capacity": 16,
            "video": { "audio": false, "width": { "min": 320, "max": 640 }, "height": { "min": 240, "max": 480 } },
            "simulcast": [{ "rid": "r0", "maxBitrate": 150000, "scalabilityMode": "S1T3" }],
            "codec_options": {}
        }))
        .unwrap();

        assert_eq!(config.request_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.consumer_control, ConsumerControlMode::FireAndForget);
        assert_eq!(config.simulcast.len(), 1);
        assert_eq!(config.codec_options.video_google_start_bitrate, None);
        assert!(config.validate().is_ok());
    }
}
