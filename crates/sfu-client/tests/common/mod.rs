//! Shared harness for scenario tests
//!
//! - `FakeSfu`: scripted SFU on the remote end of an in-memory channel
//! - `MockEngine`: media engine that records what the client asked of it
//! - `MockCamera`: capture source that grants, denies or has no device

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use rvoip_sfu_client::engine::{
    ReceiveRequest, ReceiveResult, SendRequest, SendResult, TransportHandler,
};
use rvoip_sfu_client::media::TrackSettings;
use rvoip_sfu_client::prelude::*;
use rvoip_sfu_client::signaling::{local, RemoteEnd, SignalingMessage};
use rvoip_sfu_client::types::{
    Direction, DtlsFingerprint, DtlsParameters, DtlsRole, RtcpParameters, RtpCodecParameters,
    RtpParameters, TransportDescriptor,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rvoip_sfu_client=debug")
        .with_test_writer()
        .try_init();
}

// ===== FAKE SFU =====

/// What the fake SFU answers
#[derive(Debug, Clone)]
pub struct Script {
    /// Sent as `connection-success` right away
    pub socket_id: Option<String>,
    /// Error returned by the first `transport_failures` transport creations
    pub transport_error: Option<String>,
    pub transport_failures: usize,
    pub connect_error: Option<String>,
    pub consume_error: Option<String>,
    /// Error returned to every `consumer-resume`
    pub resume_error: Option<String>,
    pub producer_id: String,
    /// Methods that never get a reply
    pub silent: Vec<&'static str>,
    /// Methods whose first request gets no reply
    pub silent_once: Vec<&'static str>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            socket_id: None,
            transport_error: None,
            transport_failures: 0,
            connect_error: None,
            consume_error: None,
            resume_error: None,
            producer_id: "producer-1".to_string(),
            silent: Vec::new(),
            silent_once: Vec::new(),
        }
    }
}

/// A frame the client sent
#[derive(Debug, Clone)]
pub struct Received {
    pub method: String,
    pub data: Value,
    /// Sent as a notification rather than a request
    pub notification: bool,
}

pub struct FakeSfu {
    log: Arc<Mutex<Vec<Received>>>,
    task: JoinHandle<()>,
}

impl FakeSfu {
    pub fn spawn(mut remote: RemoteEnd, script: Script) -> Self {
        let log = Arc::new(Mutex::new(Vec::new()));
        let record = log.clone();

        let task = tokio::spawn(async move {
            if let Some(socket_id) = &script.socket_id {
                let _ = remote
                    .notify("connection-success", json!({ "socketId": socket_id }))
                    .await;
            }

            let mut transports = 0usize;
            let mut stalled: HashSet<String> = HashSet::new();
            while let Some(message) = remote.recv().await {
                match message {
                    SignalingMessage::Request { id, method, data } => {
                        record.lock().push(Received {
                            method: method.clone(),
                            data: data.clone(),
                            notification: false,
                        });
                        if script.silent.iter().any(|m| *m == method) {
                            continue;
                        }
                        if script.silent_once.iter().any(|m| *m == method)
                            && stalled.insert(method.clone())
                        {
                            continue;
                        }
                        let reply = answer(&script, &method, &data, &mut transports);
                        if remote.reply(id, reply).await.is_err() {
                            break;
                        }
                    }
                    SignalingMessage::Notification { method, data } => {
                        record.lock().push(Received {
                            method,
                            data,
                            notification: true,
                        });
                    }
                    SignalingMessage::Response { .. } => {}
                }
            }
        });

        Self { log, task }
    }

    /// Methods received so far, in order
    pub fn methods(&self) -> Vec<String> {
        self.log.lock().iter().map(|r| r.method.clone()).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.log.lock().iter().filter(|r| r.method == method).count()
    }

    pub fn last(&self, method: &str) -> Option<Received> {
        self.log.lock().iter().rev().find(|r| r.method == method).cloned()
    }

    /// Wait until `method` has been received `count` times
    pub async fn wait_for(&self, method: &str, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.count(method) < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} x{}, got {:?}",
                method,
                count,
                self.methods()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Drop the remote end, as if the socket died
    pub fn disconnect(&self) {
        self.task.abort();
    }
}

impl Drop for FakeSfu {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn answer(script: &Script, method: &str, data: &Value, transports: &mut usize) -> Value {
    match method {
        "getRtpCapabilities" => json!({ "rtpCapabilities": router_capabilities() }),
        "createWebRtcTransport" => {
            *transports += 1;
            if let Some(error) = &script.transport_error {
                if *transports <= script.transport_failures {
                    return json!({ "params": { "error": error } });
                }
            }
            let sender = data["sender"].as_bool().unwrap_or(false);
            let id = format!("{}-transport-{}", if sender { "send" } else { "recv" }, transports);
            json!({ "params": transport_descriptor(&id) })
        }
        "transport-connect" | "transport-recv-connect" => match &script.connect_error {
            Some(error) => json!({ "error": error }),
            None => json!({}),
        },
        "transport-produce" => json!({ "id": script.producer_id }),
        "consumer-resume" => match &script.resume_error {
            Some(error) => json!({ "error": error }),
            None => json!({}),
        },
        "consume" => match &script.consume_error {
            Some(error) => json!({ "params": { "error": error } }),
            None => json!({
                "params": {
                    "id": "consumer-1",
                    "producerId": script.producer_id,
                    "kind": "video",
                    "rtpParameters": {
                        "mid": "0",
                        "codecs": [{ "mimeType": "video/VP8", "payloadType": 101, "clockRate": 90000 }],
                        "encodings": [{ "ssrc": 22222222 }],
                        "rtcp": { "cname": "remote", "reducedSize": true }
                    }
                }
            }),
        },
        _ => json!({}),
    }
}

pub fn router_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "preferredPayloadType": 100,
              "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "preferredPayloadType": 101,
              "clockRate": 90000,
              "rtcpFeedback": [{ "type": "nack" }, { "type": "nack", "parameter": "pli" }] },
            { "kind": "video", "mimeType": "video/rtx", "preferredPayloadType": 102,
              "clockRate": 90000, "parameters": { "apt": 101 } }
        ],
        "headerExtensions": [
            { "kind": "video", "uri": "urn:ietf:params:rtp-hdrext:sdes:mid", "preferredId": 1 },
            { "kind": "video", "uri": "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time", "preferredId": 4 }
        ]
    })
}

fn transport_descriptor(id: &str) -> Value {
    json!({
        "id": id,
        "iceParameters": { "usernameFragment": "frag", "password": "secret", "iceLite": true },
        "iceCandidates": [{
            "foundation": "udpcandidate", "priority": 1076302079, "ip": "10.0.0.1",
            "protocol": "udp", "port": 40000, "type": "host"
        }],
        "dtlsParameters": {
            "role": "auto",
            "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD" }]
        }
    })
}

// ===== MOCK ENGINE =====

/// Counters shared by the mock engine and its handlers
#[derive(Default)]
pub struct EngineStats {
    pub handlers: AtomicUsize,
    pub sends: AtomicUsize,
    pub stop_sends: AtomicUsize,
    pub receives: AtomicUsize,
    pub stop_receives: AtomicUsize,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub closes: AtomicUsize,
}

impl EngineStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct MockEngine {
    native: RtpCapabilities,
    pub stats: Arc<EngineStats>,
}

impl MockEngine {
    /// Engine that handles VP8 with retransmission
    pub fn vp8() -> Self {
        let native = serde_json::from_value(json!({
            "codecs": [
                { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 },
                { "kind": "video", "mimeType": "video/rtx", "clockRate": 90000 }
            ],
            "headerExtensions": [
                { "kind": "video", "uri": "urn:ietf:params:rtp-hdrext:sdes:mid", "preferredId": 1 }
            ]
        }))
        .expect("valid native capabilities");
        Self {
            native,
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// Engine with no codec at all
    pub fn empty() -> Self {
        Self {
            native: RtpCapabilities::default(),
            stats: Arc::new(EngineStats::default()),
        }
    }
}

impl MediaEngine for MockEngine {
    fn native_capabilities(&self) -> RtpCapabilities {
        self.native.clone()
    }

    fn create_transport_handler(
        &self,
        _direction: Direction,
        _descriptor: &TransportDescriptor,
    ) -> Result<Arc<dyn TransportHandler>> {
        self.stats.handlers.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockHandler {
            stats: self.stats.clone(),
        }))
    }
}

struct MockHandler {
    stats: Arc<EngineStats>,
}

#[async_trait]
impl TransportHandler for MockHandler {
    fn local_dtls_parameters(&self) -> DtlsParameters {
        DtlsParameters {
            role: Some(DtlsRole::Client),
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: "01:02:03".into(),
            }],
        }
    }

    async fn send(&self, request: SendRequest) -> Result<SendResult> {
        let n = self.stats.sends.fetch_add(1, Ordering::SeqCst);
        let codecs = request
            .codecs
            .iter()
            .filter(|c| !c.is_rtx())
            .take(1)
            .map(|c| RtpCodecParameters {
                mime_type: c.mime_type.clone(),
                payload_type: c.preferred_payload_type.unwrap_or(96),
                clock_rate: c.clock_rate,
                channels: c.channels,
                parameters: c.parameters.clone(),
                rtcp_feedback: c.rtcp_feedback.clone(),
            })
            .collect();

        Ok(SendResult {
            local_id: format!("sender-{}", n),
            rtp_parameters: RtpParameters {
                mid: Some(n.to_string()),
                codecs,
                header_extensions: vec![],
                encodings: request.encodings,
                rtcp: Some(RtcpParameters {
                    cname: Some("local".into()),
                    reduced_size: true,
                }),
            },
        })
    }

    async fn stop_sending(&self, _local_id: &str) -> Result<()> {
        self.stats.stop_sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive(&self, request: ReceiveRequest) -> Result<ReceiveResult> {
        self.stats.receives.fetch_add(1, Ordering::SeqCst);
        Ok(ReceiveResult {
            local_id: format!("receiver-{}", request.consumer_id),
            track: MediaTrack::new(request.kind, "remote video", TrackSettings::default()),
        })
    }

    async fn stop_receiving(&self, _local_id: &str) -> Result<()> {
        self.stats.stop_receives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pause_receiving(&self, _local_id: &str) -> Result<()> {
        self.stats.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_receiving(&self, _local_id: &str) -> Result<()> {
        self.stats.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== MOCK CAMERA =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCamera {
    Granted,
    Denied,
    Missing,
}

#[async_trait]
impl MediaSource for MockCamera {
    async fn get_user_media(&self, constraints: &VideoConstraints) -> Result<MediaTrack> {
        match self {
            MockCamera::Granted => Ok(MediaTrack::new(
                MediaKind::Video,
                "Mock Camera",
                TrackSettings {
                    width: Some(constraints.width.max.min(1280)),
                    height: Some(constraints.height.max.min(720)),
                    frame_rate: Some(30.0),
                    device_id: Some("mock_camera".into()),
                },
            )),
            MockCamera::Denied => Err(Error::PermissionDenied("user dismissed the prompt".into())),
            MockCamera::Missing => Err(Error::DeviceUnavailable("no camera".into())),
        }
    }
}

// ===== HARNESS =====

pub struct Harness {
    pub session: Session,
    pub sfu: FakeSfu,
    pub stats: Arc<EngineStats>,
}

pub fn harness(config: SessionConfig, script: Script, camera: MockCamera) -> Harness {
    harness_with_engine(config, script, camera, MockEngine::vp8())
}

pub fn harness_with_engine(
    config: SessionConfig,
    script: Script,
    camera: MockCamera,
    engine: MockEngine,
) -> Harness {
    init_tracing();

    let (channel, inbound, remote) = local::pair(64);
    let stats = engine.stats.clone();
    let session = Session::new(config, Arc::new(channel), Arc::new(engine), Arc::new(camera))
        .expect("valid session");
    session.connect(inbound).expect("connect");

    Harness {
        session,
        sfu: FakeSfu::spawn(remote, script),
        stats,
    }
}

impl Harness {
    /// Fetch capabilities and load the device
    pub async fn load_device(&self) -> Arc<Device> {
        self.session.get_rtp_capabilities().await.expect("capabilities");
        self.session.create_device().expect("device")
    }

    /// Run the whole publish flow
    pub async fn publish(&self) -> Arc<Producer> {
        self.session.get_local_stream().await.expect("local stream");
        self.load_device().await;
        self.session.create_send_transport().await.expect("send transport");
        self.session.connect_send_transport().await.expect("produce")
    }

    /// Run the whole subscribe flow
    pub async fn subscribe(&self) -> Arc<Consumer> {
        if self.session.device().is_none() {
            self.load_device().await;
        }
        self.session.create_recv_transport().await.expect("recv transport");
        self.session.connect_recv_transport().await.expect("consume")
    }
}
