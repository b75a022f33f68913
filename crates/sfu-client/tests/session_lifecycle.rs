//! Session connection announcement and teardown

mod common;

use std::time::Duration;

use common::{harness, EngineStats, MockCamera, Script};
use rvoip_sfu_client::prelude::*;

#[tokio::test]
async fn test_connection_success_is_recorded() {
    let script = Script {
        socket_id: Some("sock-42".into()),
        ..Default::default()
    };
    let h = harness(SessionConfig::default(), script, MockCamera::Granted);

    let id = tokio::time::timeout(Duration::from_secs(1), h.session.wait_connected())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, "sock-42");
    assert_eq!(h.session.connection_id().as_deref(), Some("sock-42"));
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let h = harness(SessionConfig::default(), Script::default(), MockCamera::Granted);
    let (_channel, inbound, _remote) = rvoip_sfu_client::signaling::local::pair(4);

    let err = h.session.connect(inbound).unwrap_err();
    assert!(matches!(err, Error::InvalidState { operation: "connect", .. }));
}

#[tokio::test]
async fn test_close_tears_everything_down() {
    let h = harness(SessionConfig::default(), Script::default(), MockCamera::Granted);
    let producer = h.publish().await;
    let consumer = h.subscribe().await;

    h.session.close().await;

    assert_eq!(producer.closed().await, ProducerEndReason::TransportClosed);
    assert!(consumer.is_closed());
    assert!(h.session.is_closed());
    assert!(h.session.gateway().is_closed());
    assert_eq!(EngineStats::get(&h.stats.closes), 2);
    assert_eq!(h.session.send_manager().state(), SendState::Ended);
    assert_eq!(h.session.recv_manager().state(), RecvState::Closed);

    let err = h.session.get_rtp_capabilities().await.unwrap_err();
    assert!(matches!(err, Error::Closed(_)));
    let err = h.session.pause_video().await.unwrap_err();
    assert!(matches!(err, Error::Closed(_)));

    // Idempotent
    h.session.close().await;
}

#[tokio::test]
async fn test_close_releases_local_track() {
    let h = harness(SessionConfig::default(), Script::default(), MockCamera::Granted);
    let params = h.session.get_local_stream().await.unwrap();

    h.session.close().await;
    assert!(params.track.is_ended());
    assert!(h.session.acquirer().current().is_none());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let (channel, _inbound, _remote) = rvoip_sfu_client::signaling::local::pair(4);
    let config = SessionConfig::new().with_event_capacity(0);

    let result = Session::new(
        config,
        std::sync::Arc::new(channel),
        std::sync::Arc::new(common::MockEngine::vp8()),
        std::sync::Arc::new(MockCamera::Granted),
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}
