//! Media engine seam
//!
//! The client never touches RTP itself. A [`MediaEngine`] reports what the
//! local stack can encode and decode and builds one [`TransportHandler`]
//! per server-issued transport. The handler owns the ICE/DTLS machinery and
//! the encoders/decoders bound to it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::media::{CodecOptions, MediaTrack};
use crate::types::{
    ConsumerId, Direction, DtlsParameters, MediaKind, RtpCapabilities, RtpCodecCapability,
    RtpEncodingParameters, RtpParameters, TransportDescriptor,
};

/// Input to [`TransportHandler::send`]
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub track: MediaTrack,
    pub encodings: Vec<RtpEncodingParameters>,
    pub codec_options: CodecOptions,
    /// Negotiated codecs for the track's kind, preferred first
    pub codecs: Vec<RtpCodecCapability>,
}

/// A local sender bound to a track
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Engine-local handle used to stop the sender
    pub local_id: String,
    /// Parameters the SFU needs to accept the flow
    pub rtp_parameters: RtpParameters,
}

/// Input to [`TransportHandler::receive`]
#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    pub consumer_id: ConsumerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// A local receiver and the track it renders into
#[derive(Debug, Clone)]
pub struct ReceiveResult {
    pub local_id: String,
    pub track: MediaTrack,
}

/// Engine side of one transport
#[async_trait]
pub trait TransportHandler: Send + Sync {
    /// Local DTLS parameters to hand to the SFU on connect
    fn local_dtls_parameters(&self) -> DtlsParameters;

    /// Start sending a track
    async fn send(&self, request: SendRequest) -> Result<SendResult>;

    async fn stop_sending(&self, local_id: &str) -> Result<()>;

    /// Start receiving a remote flow
    async fn receive(&self, request: ReceiveRequest) -> Result<ReceiveResult>;

    async fn stop_receiving(&self, local_id: &str) -> Result<()>;

    async fn pause_receiving(&self, local_id: &str) -> Result<()>;

    async fn resume_receiving(&self, local_id: &str) -> Result<()>;

    /// Tear down the transport. Idempotent.
    fn close(&self);
}

/// Local media stack
pub trait MediaEngine: Send + Sync {
    /// Codecs and header extensions the local stack supports
    fn native_capabilities(&self) -> RtpCapabilities;

    /// Build the engine side of a server-issued transport
    fn create_transport_handler(
        &self,
        direction: Direction,
        descriptor: &TransportDescriptor,
    ) -> Result<Arc<dyn TransportHandler>>;
}
