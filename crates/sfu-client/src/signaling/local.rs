//! In-memory signaling channel
//!
//! [`pair`] returns the client's outbound channel, the client's inbound
//! receiver (hand it to [`SignalingGateway::attach`](super::SignalingGateway::attach))
//! and the [`RemoteEnd`] that plays the SFU. Dropping the remote end looks
//! like a disconnect to the client.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{SignalingChannel, SignalingMessage};
use crate::error::{Error, Result};

/// Client-side outbound half backed by an mpsc queue
pub struct LocalChannel {
    tx: Mutex<Option<mpsc::Sender<SignalingMessage>>>,
}

/// The SFU side of an in-memory channel
pub struct RemoteEnd {
    /// Frames sent by the client
    pub incoming: mpsc::Receiver<SignalingMessage>,
    /// Frames delivered to the client
    pub outgoing: mpsc::Sender<SignalingMessage>,
}

/// Create a connected in-memory channel pair
pub fn pair(capacity: usize) -> (LocalChannel, mpsc::Receiver<SignalingMessage>, RemoteEnd) {
    let (client_tx, remote_rx) = mpsc::channel(capacity);
    let (remote_tx, client_rx) = mpsc::channel(capacity);

    let channel = LocalChannel {
        tx: Mutex::new(Some(client_tx)),
    };
    let remote = RemoteEnd {
        incoming: remote_rx,
        outgoing: remote_tx,
    };
    (channel, client_rx, remote)
}

#[async_trait]
impl SignalingChannel for LocalChannel {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| Error::channel("local channel closed"))?;
        tx.send(message)
            .await
            .map_err(|_| Error::channel("remote end dropped"))
    }

    fn is_connected(&self) -> bool {
        self.tx.lock().as_ref().map_or(false, |tx| !tx.is_closed())
    }

    async fn close(&self) {
        self.tx.lock().take();
    }
}

impl RemoteEnd {
    /// Next frame sent by the client
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.incoming.recv().await
    }

    /// Answer a request
    pub async fn reply(&self, id: u64, data: Value) -> Result<()> {
        self.outgoing
            .send(SignalingMessage::Response { id, data })
            .await
            .map_err(|_| Error::channel("client end dropped"))
    }

    /// Push a notification to the client
    pub async fn notify(&self, method: &str, data: Value) -> Result<()> {
        self.outgoing
            .send(SignalingMessage::Notification {
                method: method.to_string(),
                data,
            })
            .await
            .map_err(|_| Error::channel("client end dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_frames_cross_the_pair() {
        let (channel, mut inbound, mut remote) = pair(8);
        assert!(channel.is_connected());

        channel
            .send(SignalingMessage::Notification {
                method: "ping".into(),
                data: Value::Null,
            })
            .await
            .unwrap();
        assert!(matches!(
            remote.recv().await,
            Some(SignalingMessage::Notification { method, .. }) if method == "ping"
        ));

        remote.reply(3, json!({ "ok": true })).await.unwrap();
        assert_eq!(
            inbound.recv().await,
            Some(SignalingMessage::Response { id: 3, data: json!({ "ok": true }) })
        );
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_sends() {
        let (channel, _inbound, remote) = pair(8);
        drop(remote);
        assert!(!channel.is_connected());

        let err = channel
            .send(SignalingMessage::Notification {
                method: "x".into(),
                data: Value::Null,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Channel(_)));

        channel.close().await;
        assert!(!channel.is_connected());
    }
}
