//! Method names and payload shapes of the SFU signaling protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    AppData, ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportDescriptor,
};

pub const GET_RTP_CAPABILITIES: &str = "getRtpCapabilities";
pub const CREATE_WEBRTC_TRANSPORT: &str = "createWebRtcTransport";
pub const TRANSPORT_CONNECT: &str = "transport-connect";
pub const TRANSPORT_PRODUCE: &str = "transport-produce";
pub const TRANSPORT_RECV_CONNECT: &str = "transport-recv-connect";
pub const CONSUME: &str = "consume";
pub const CONSUMER_RESUME: &str = "consumer-resume";
pub const CONSUMER_PAUSE: &str = "consumer-pause";
pub const CONSUMER_CLOSE: &str = "consumer-close";

/// Notification sent by the SFU once the socket is accepted
pub const CONNECTION_SUCCESS: &str = "connection-success";

/// `{params: {...}}` or `{params: {error}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamsReply<T> {
    Error { error: Value },
    Params(T),
}

impl<T> ParamsReply<T> {
    pub fn into_result(self) -> std::result::Result<T, String> {
        match self {
            ParamsReply::Params(params) => Ok(params),
            ParamsReply::Error { error: Value::String(message) } => Err(message),
            ParamsReply::Error { error } => Err(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilitiesReply {
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransportRequest {
    pub sender: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransportReply {
    pub params: ParamsReply<TransportDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(default)]
    pub app_data: AppData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceReply {
    pub id: ProducerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeParams {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeReply {
    pub params: ParamsReply<ConsumeParams>,
}

/// Payload of `consumer-resume`, `consumer-pause` and `consumer-close`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerControl {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSuccess {
    pub socket_id: String,
}
