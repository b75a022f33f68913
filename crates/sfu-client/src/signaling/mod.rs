//! Signaling with the SFU control plane
//!
//! The channel itself is a seam: anything that can carry
//! [`SignalingMessage`] frames both ways (a WebSocket, a socket.io bridge,
//! the in-memory [`local`] pair used in tests) implements
//! [`SignalingChannel`] for the outbound half and feeds the inbound half to
//! [`SignalingGateway::attach`].

pub mod gateway;
pub mod local;
pub mod messages;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use gateway::{RemoteNotification, SignalingGateway};
pub use local::{LocalChannel, RemoteEnd};

/// One frame on the signaling channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// Request expecting exactly one correlated response
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        data: Value,
    },

    /// Reply to the request with the same id
    Response {
        id: u64,
        #[serde(default)]
        data: Value,
    },

    /// Uncorrelated one-way message
    Notification {
        method: String,
        #[serde(default)]
        data: Value,
    },
}

/// Outbound half of a signaling channel
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send one frame
    async fn send(&self, message: SignalingMessage) -> Result<()>;

    /// Whether frames can currently be sent
    fn is_connected(&self) -> bool;

    /// Close the outbound half. Default is a no-op.
    async fn close(&self) {}
}
