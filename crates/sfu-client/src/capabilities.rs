//! Capability exchange with the SFU
//!
//! Fetching the router capabilities happens at most once per session, and
//! the device can only be loaded after that fetch has succeeded. An
//! environment that turned out to be unsupported stays unsupported.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::device::Device;
use crate::engine::MediaEngine;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::signaling::messages::{RtpCapabilitiesReply, GET_RTP_CAPABILITIES};
use crate::signaling::SignalingGateway;
use crate::types::{MediaKind, RtpCapabilities};

enum DeviceSlot {
    Empty,
    Loaded(Arc<Device>),
    Unsupported(String),
}

/// Fetches remote capabilities and loads the local [`Device`]
pub struct CapabilityNegotiator {
    gateway: Arc<SignalingGateway>,
    engine: Arc<dyn MediaEngine>,
    events: EventBus,
    remote: OnceCell<Arc<RtpCapabilities>>,
    device: Mutex<DeviceSlot>,
}

impl CapabilityNegotiator {
    pub fn new(gateway: Arc<SignalingGateway>, engine: Arc<dyn MediaEngine>, events: EventBus) -> Self {
        Self {
            gateway,
            engine,
            events,
            remote: OnceCell::new(),
            device: Mutex::new(DeviceSlot::Empty),
        }
    }

    /// Ask the SFU for its capability set
    ///
    /// Only the first successful call reaches the network; later calls return
    /// the cached value. A failed fetch leaves nothing cached.
    pub async fn fetch_remote_capabilities(&self) -> Result<Arc<RtpCapabilities>> {
        let caps = self
            .remote
            .get_or_try_init(|| async {
                debug!("Fetching remote RTP capabilities");
                let reply: RtpCapabilitiesReply = self
                    .gateway
                    .request_typed(GET_RTP_CAPABILITIES, &Value::Null)
                    .await?;

                let caps = Arc::new(reply.rtp_capabilities);
                info!(
                    codecs = caps.codecs.len(),
                    header_extensions = caps.header_extensions.len(),
                    "Remote RTP capabilities received"
                );
                self.events.emit(SessionEvent::CapabilitiesLoaded {
                    codec_count: caps.codecs.len(),
                });
                Ok::<_, Error>(caps)
            })
            .await?;
        Ok(caps.clone())
    }

    /// Cached remote capabilities, if fetched
    pub fn remote_capabilities(&self) -> Option<Arc<RtpCapabilities>> {
        self.remote.get().cloned()
    }

    /// Load the device against the fetched capabilities
    pub fn initialize_device(&self) -> Result<Arc<Device>> {
        let remote = self
            .remote
            .get()
            .cloned()
            .ok_or_else(|| Error::invalid_state("initialize_device", "remote capabilities not fetched"))?;

        let mut slot = self.device.lock();
        match &*slot {
            DeviceSlot::Loaded(_) => return Err(Error::AlreadyInitialized),
            DeviceSlot::Unsupported(reason) => {
                return Err(Error::UnsupportedEnvironment(reason.clone()));
            }
            DeviceSlot::Empty => {}
        }

        let native = self.engine.native_capabilities();
        match Device::load(remote, &native) {
            Ok(device) => {
                let device = Arc::new(device);
                *slot = DeviceSlot::Loaded(device.clone());
                self.events.emit(SessionEvent::DeviceLoaded {
                    can_produce_video: device.can_produce(MediaKind::Video),
                    can_produce_audio: device.can_produce(MediaKind::Audio),
                });
                Ok(device)
            }
            Err(Error::UnsupportedEnvironment(reason)) => {
                error!(reason = %reason, "Local media stack cannot handle the remote capabilities");
                *slot = DeviceSlot::Unsupported(reason.clone());
                Err(Error::UnsupportedEnvironment(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// The loaded device, if any
    pub fn device(&self) -> Option<Arc<Device>> {
        match &*self.device.lock() {
            DeviceSlot::Loaded(device) => Some(device.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransportHandler;
    use crate::signaling::{local, SignalingMessage};
    use crate::types::{Direction, TransportDescriptor};
    use serde_json::json;

    struct CapsOnly(RtpCapabilities);

    impl MediaEngine for CapsOnly {
        fn native_capabilities(&self) -> RtpCapabilities {
            self.0.clone()
        }

        fn create_transport_handler(
            &self,
            _direction: Direction,
            _descriptor: &TransportDescriptor,
        ) -> Result<Arc<dyn TransportHandler>> {
            Err(Error::engine("not used"))
        }
    }

    fn vp8_caps() -> RtpCapabilities {
        serde_json::from_value(json!({
            "codecs": [{ "kind": "video", "mimeType": "video/VP8", "preferredPayloadType": 101, "clockRate": 90000 }]
        }))
        .unwrap()
    }

    fn setup(native: RtpCapabilities) -> (CapabilityNegotiator, local::RemoteEnd) {
        let (channel, inbound, remote) = local::pair(8);
        let events = EventBus::new(8);
        let gateway = SignalingGateway::new(Arc::new(channel), None, events.clone());
        gateway.attach(inbound);
        (
            CapabilityNegotiator::new(gateway, Arc::new(CapsOnly(native)), events),
            remote,
        )
    }

    async fn answer_capabilities(remote: &mut local::RemoteEnd) {
        match remote.recv().await {
            Some(SignalingMessage::Request { id, method, .. }) => {
                assert_eq!(method, GET_RTP_CAPABILITIES);
                remote
                    .reply(id, json!({ "rtpCapabilities": vp8_caps() }))
                    .await
                    .unwrap();
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_before_fetch_is_rejected() {
        let (negotiator, _remote) = setup(vp8_caps());
        let err = negotiator.initialize_device().unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_fetch_is_cached() {
        let (negotiator, mut remote) = setup(vp8_caps());

        let (first, _) = tokio::join!(
            negotiator.fetch_remote_capabilities(),
            answer_capabilities(&mut remote)
        );
        let first = first.unwrap();
        let second = negotiator.fetch_remote_capabilities().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Nothing else reached the SFU
        assert!(remote.incoming.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_device_loads_once() {
        let (negotiator, mut remote) = setup(vp8_caps());
        let (fetched, _) = tokio::join!(
            negotiator.fetch_remote_capabilities(),
            answer_capabilities(&mut remote)
        );
        fetched.unwrap();

        let device = negotiator.initialize_device().unwrap();
        assert!(device.can_produce(MediaKind::Video));
        assert!(negotiator.device().is_some());

        let err = negotiator.initialize_device().unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_unsupported_environment_is_sticky() {
        let (negotiator, mut remote) = setup(RtpCapabilities::default());
        let (fetched, _) = tokio::join!(
            negotiator.fetch_remote_capabilities(),
            answer_capabilities(&mut remote)
        );
        fetched.unwrap();

        for _ in 0..2 {
            let err = negotiator.initialize_device().unwrap_err();
            assert!(matches!(err, Error::UnsupportedEnvironment(_)));
        }
        assert!(negotiator.device().is_none());
    }
}
