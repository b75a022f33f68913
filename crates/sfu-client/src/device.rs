//! Local negotiation context
//!
//! A [`Device`] is the intersection of what the SFU advertises and what the
//! local media engine can handle. It is built once per session and its
//! capability set is what we send with `consume`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{MediaKind, RtpCapabilities, RtpCodecCapability, RtpParameters};

/// Negotiated local capability context
#[derive(Debug, Clone)]
pub struct Device {
    remote: Arc<RtpCapabilities>,
    rtp_capabilities: RtpCapabilities,
    can_produce: HashSet<MediaKind>,
    loaded_at: DateTime<Utc>,
}

impl Device {
    /// Load against the remote capability set
    ///
    /// Fails with [`Error::UnsupportedEnvironment`] when no media codec is
    /// shared between `remote` and `native`.
    pub fn load(remote: Arc<RtpCapabilities>, native: &RtpCapabilities) -> Result<Self> {
        let mut codecs: Vec<RtpCodecCapability> = Vec::new();

        for remote_codec in remote.codecs.iter().filter(|c| !c.is_rtx()) {
            if !native.codecs.iter().any(|n| n.matches(remote_codec)) {
                debug!(mime = %remote_codec.mime_type, "Remote codec not supported locally");
                continue;
            }
            codecs.push(remote_codec.clone());

            // Keep the matching RTX entry when both sides do retransmission
            let native_rtx = native
                .codecs
                .iter()
                .any(|n| n.is_rtx() && n.kind == remote_codec.kind);
            if let (true, Some(pt)) = (native_rtx, remote_codec.preferred_payload_type) {
                if let Some(rtx) = remote
                    .codecs
                    .iter()
                    .find(|c| c.is_rtx() && apt(c) == Some(pt))
                {
                    codecs.push(rtx.clone());
                }
            }
        }

        let can_produce: HashSet<MediaKind> = codecs
            .iter()
            .filter(|c| !c.is_rtx())
            .map(|c| c.kind)
            .collect();

        if can_produce.is_empty() {
            return Err(Error::UnsupportedEnvironment(
                "no media codec in common with the remote capability set".to_string(),
            ));
        }

        let header_extensions = remote
            .header_extensions
            .iter()
            .filter(|ext| {
                native.header_extensions.iter().any(|n| {
                    n.uri == ext.uri
                        && match (n.kind, ext.kind) {
                            (Some(a), Some(b)) => a == b,
                            _ => true,
                        }
                })
            })
            .cloned()
            .collect();

        let rtp_capabilities = RtpCapabilities {
            codecs,
            header_extensions,
        };

        info!(
            codecs = rtp_capabilities.codecs.len(),
            header_extensions = rtp_capabilities.header_extensions.len(),
            "Device loaded"
        );

        Ok(Self {
            remote,
            rtp_capabilities,
            can_produce,
            loaded_at: Utc::now(),
        })
    }

    /// Negotiated local capabilities, sent with `consume`
    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.rtp_capabilities
    }

    /// Capabilities the device was loaded against
    pub fn remote_capabilities(&self) -> &RtpCapabilities {
        &self.remote
    }

    pub fn can_produce(&self, kind: MediaKind) -> bool {
        self.can_produce.contains(&kind)
    }

    /// Negotiated codecs usable for sending `kind`
    pub fn send_codecs(&self, kind: MediaKind) -> Vec<RtpCodecCapability> {
        self.rtp_capabilities
            .codecs
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    /// Whether the primary codec of a remote flow is one we negotiated
    pub fn can_consume(&self, kind: MediaKind, rtp_parameters: &RtpParameters) -> bool {
        let Some(codec) = rtp_parameters.codecs.first() else {
            return false;
        };
        self.rtp_capabilities.media_codecs(kind).any(|c| {
            c.mime_type.eq_ignore_ascii_case(&codec.mime_type) && c.clock_rate == codec.clock_rate
        })
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

fn apt(codec: &RtpCodecCapability) -> Option<u8> {
    match codec.parameters.get("apt") {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
        _ => None,
    }
}
