//! Encoding parameters attached to a producer
//!
//! The default table sends three simulcast layers with ascending bitrate
//! ceilings, each carrying three temporal sub-layers (`S1T3`).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::media::track::MediaTrack;
use crate::types::{AppData, RtpEncodingParameters};

/// Bitrate ceilings of the default simulcast layers, lowest first
pub const DEFAULT_LAYER_BITRATES: [u32; 3] = [100_000, 300_000, 900_000];

/// Scalability mode used by every default layer
pub const DEFAULT_SCALABILITY_MODE: &str = "S1T3";

/// Codec options passed to the engine when producing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecOptions {
    /// Initial encoder bitrate in kbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_google_start_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_google_max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_google_min_bitrate: Option<u32>,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            video_google_start_bitrate: Some(1000),
            video_google_max_bitrate: None,
            video_google_min_bitrate: None,
        }
    }
}

/// Parsed `S<n>T<m>` scalability mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalabilityMode {
    pub spatial_layers: u8,
    pub temporal_layers: u8,
    /// `_KEY` suffix
    pub ksvc: bool,
}

impl ScalabilityMode {
    pub fn parse(mode: &str) -> Result<Self> {
        let invalid = || Error::config(format!("invalid scalability mode '{}'", mode));

        let rest = mode.strip_prefix(['S', 'L']).ok_or_else(invalid)?;
        let (rest, ksvc) = match rest.strip_suffix("_KEY") {
            Some(r) => (r, true),
            None => (rest, false),
        };
        let (spatial, temporal) = rest.split_once('T').ok_or_else(invalid)?;
        let spatial_layers: u8 = spatial.parse().map_err(|_| invalid())?;
        let temporal_layers: u8 = temporal.parse().map_err(|_| invalid())?;
        if spatial_layers == 0 || temporal_layers == 0 {
            return Err(invalid());
        }

        Ok(Self {
            spatial_layers,
            temporal_layers,
            ksvc,
        })
    }
}

/// The default three-layer simulcast table
pub fn default_simulcast_encodings() -> Vec<RtpEncodingParameters> {
    DEFAULT_LAYER_BITRATES
        .iter()
        .enumerate()
        .map(|(i, bitrate)| RtpEncodingParameters {
            rid: Some(format!("r{}", i)),
            ssrc: None,
            max_bitrate: Some(*bitrate),
            scalability_mode: Some(DEFAULT_SCALABILITY_MODE.to_string()),
        })
        .collect()
}

/// Check that a simulcast table is usable: non-empty, ascending ceilings,
/// parseable scalability modes.
pub fn validate_encodings(encodings: &[RtpEncodingParameters]) -> Result<()> {
    if encodings.is_empty() {
        return Err(Error::config("at least one encoding is required"));
    }

    let mut previous = 0u32;
    for encoding in encodings {
        if let Some(mode) = &encoding.scalability_mode {
            ScalabilityMode::parse(mode)?;
        }
        if let Some(bitrate) = encoding.max_bitrate {
            if bitrate <= previous {
                return Err(Error::config(format!(
                    "encoding bitrates must ascend, got {} after {}",
                    bitrate, previous
                )));
            }
            previous = bitrate;
        }
    }
    Ok(())
}

/// A local track bound to its encoding configuration
///
/// Immutable once handed to `produce`.
#[derive(Debug, Clone)]
pub struct MediaParameters {
    pub track: MediaTrack,
    pub encodings: Vec<RtpEncodingParameters>,
    pub codec_options: CodecOptions,
    pub app_data: AppData,
}

impl MediaParameters {
    /// Bind a track to the default simulcast table
    pub fn new(track: MediaTrack) -> Self {
        Self {
            track,
            encodings: default_simulcast_encodings(),
            codec_options: CodecOptions::default(),
            app_data: AppData::new(),
        }
    }

    pub fn with_encodings(mut self, encodings: Vec<RtpEncodingParameters>) -> Self {
        self.encodings = encodings;
        self
    }

    pub fn with_codec_options(mut self, codec_options: CodecOptions) -> Self {
        self.codec_options = codec_options;
        self
    }

    pub fn with_app_data(mut self, app_data: AppData) -> Self {
        self.app_data = app_data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_simulcast_table() {
        let encodings = default_simulcast_encodings();
        assert_eq!(encodings.len(), 3);

        let bitrates: Vec<u32> = encodings.iter().filter_map(|e| e.max_bitrate).collect();
        assert_eq!(bitrates, vec![100_000, 300_000, 900_000]);

        for (i, e) in encodings.iter().enumerate() {
            assert_eq!(e.rid.as_deref(), Some(format!("r{}", i).as_str()));
            let mode = ScalabilityMode::parse(e.scalability_mode.as_deref().unwrap()).unwrap();
            assert_eq!(mode.spatial_layers, 1);
            assert_eq!(mode.temporal_layers, 3);
        }

        assert!(validate_encodings(&encodings).is_ok());
    }

    #[test]
    fn test_scalability_mode_parse() {
        let mode = ScalabilityMode::parse("L3T3_KEY").unwrap();
        assert_eq!(mode.spatial_layers, 3);
        assert!(mode.ksvc);

        assert!(ScalabilityMode::parse("T3").is_err());
        assert!(ScalabilityMode::parse("S0T1").is_err());
        assert!(ScalabilityMode::parse("S1Tx").is_err());
    }

    #[test]
    fn test_descending_bitrates_rejected() {
        let mut encodings = default_simulcast_encodings();
        encodings.swap(0, 2);
        assert!(matches!(
            validate_encodings(&encodings),
            Err(Error::Configuration(_))
        ));
        assert!(validate_encodings(&[]).is_err());
    }

    #[test]
    fn test_codec_options_wire_shape() {
        let json = serde_json::to_value(CodecOptions::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "videoGoogleStartBitrate": 1000 }));
    }
}
