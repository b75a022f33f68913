//! # SFU Client - Media Session Negotiation
//!
//! Client-side negotiation with a selective forwarding unit: capability
//! exchange, send and receive transports, producers and consumers, all
//! driven over a request/reply signaling channel.
//!
//! - **signaling**: correlated requests and remote notifications over any
//!   [`SignalingChannel`]
//! - **capabilities**: fetches the router capabilities and loads the local [`Device`]
//! - **media**: local capture and the simulcast encoding table
//! - **send / recv**: transport lifecycles, producers and consumers
//!
//! The media stack itself sits behind [`MediaEngine`] and [`MediaSource`],
//! so the crate never touches RTP.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_sfu_client::prelude::*;
//! use rvoip_sfu_client::signaling::local;
//!
//! # async fn run(engine: Arc<dyn MediaEngine>, camera: Arc<dyn MediaSource>) -> Result<()> {
//! let (channel, inbound, _sfu) = local::pair(64);
//! let session = Session::new(SessionConfig::default(), Arc::new(channel), engine, camera)?;
//! session.connect(inbound)?;
//!
//! // Publish
//! session.get_local_stream().await?;
//! session.get_rtp_capabilities().await?;
//! session.create_device()?;
//! session.create_send_transport().await?;
//! let producer = session.connect_send_transport().await?;
//!
//! // Subscribe
//! session.create_recv_transport().await?;
//! let consumer = session.connect_recv_transport().await?;
//! println!("sending {} receiving {}", producer.id(), consumer.id());
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod config;
pub mod consumer;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod producer;
pub mod recv;
pub mod send;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod types;

// Re-export main types
pub use capabilities::CapabilityNegotiator;
pub use config::{ConsumerControlMode, SessionConfig};
pub use consumer::{Consumer, ConsumerState};
pub use device::Device;
pub use engine::{MediaEngine, TransportHandler};
pub use error::{Error, Result};
pub use events::{EventBus, ProducerEndReason, SessionEvent};
pub use media::{MediaParameters, MediaSource, MediaTrack, VideoConstraints};
pub use producer::{Producer, ProducerState};
pub use recv::{RecvSessionManager, RecvState};
pub use send::{SendSessionManager, SendState};
pub use session::Session;
pub use signaling::{SignalingChannel, SignalingGateway, SignalingMessage};
pub use transport::{Transport, TransportState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used types
pub mod prelude {
    pub use crate::config::{ConsumerControlMode, SessionConfig};
    pub use crate::consumer::{Consumer, ConsumerState};
    pub use crate::device::Device;
    pub use crate::engine::{MediaEngine, TransportHandler};
    pub use crate::error::{Error, Result};
    pub use crate::events::{ProducerEndReason, SessionEvent};
    pub use crate::media::{MediaParameters, MediaSource, MediaTrack, VideoConstraints};
    pub use crate::producer::{Producer, ProducerState};
    pub use crate::recv::RecvState;
    pub use crate::send::SendState;
    pub use crate::session::Session;
    pub use crate::transport::{Transport, TransportState};
    pub use crate::types::{ConsumerId, MediaKind, ProducerId, RtpCapabilities, TransportId};
}
