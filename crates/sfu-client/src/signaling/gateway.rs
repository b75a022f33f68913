//! Request/reply correlation over the signaling channel
//!
//! Every request gets a fresh id and a oneshot waiter parked in the pending
//! map. The inbound dispatch loop removes the waiter when the matching
//! response arrives, so each reply reaches exactly one caller regardless
//! of arrival order. A reply whose waiter is gone (timed out, session torn
//! down) is logged and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{SignalingChannel, SignalingMessage};
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};

type PendingMap = DashMap<u64, oneshot::Sender<Value>>;

/// Notification pushed by the SFU
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNotification {
    pub method: String,
    pub data: Value,
}

/// Typed request/reply wrapper over a [`SignalingChannel`]
pub struct SignalingGateway {
    channel: Arc<dyn SignalingChannel>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Option<Duration>,
    /// Set once the channel is gone; holds the reason
    closed: RwLock<Option<String>>,
    notifications: broadcast::Sender<RemoteNotification>,
    events: EventBus,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingGateway {
    pub fn new(
        channel: Arc<dyn SignalingChannel>,
        request_timeout: Option<Duration>,
        events: EventBus,
    ) -> Arc<Self> {
        let (notifications, _) = broadcast::channel(32);
        Arc::new(Self {
            channel,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            request_timeout,
            closed: RwLock::new(None),
            notifications,
            events,
            reader: Mutex::new(None),
        })
    }

    /// Start dispatching inbound frames
    ///
    /// When the inbound stream ends every pending request fails with
    /// [`Error::Channel`].
    pub fn attach(self: &Arc<Self>, mut inbound: mpsc::Receiver<SignalingMessage>) {
        let weak: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            debug!("Signaling dispatch loop started");
            while let Some(message) = inbound.recv().await {
                let Some(gateway) = weak.upgrade() else {
                    debug!("Gateway dropped, stopping dispatch loop");
                    return;
                };
                gateway.dispatch(message);
            }

            if let Some(gateway) = weak.upgrade() {
                gateway.fail_all("signaling channel closed");
            }
            debug!("Signaling dispatch loop stopped");
        });

        if let Some(previous) = self.reader.lock().replace(task) {
            warn!("Replacing an attached inbound stream");
            previous.abort();
        }
    }

    /// Route one inbound frame
    pub fn dispatch(&self, message: SignalingMessage) {
        match message {
            SignalingMessage::Response { id, data } => match self.pending.remove(&id) {
                Some((_, waiter)) => {
                    trace!(id, "Reply correlated");
                    // The caller may have stopped waiting; nothing to do then
                    let _ = waiter.send(data);
                }
                None => {
                    debug!(id, "Ignoring reply with no pending request");
                }
            },
            SignalingMessage::Notification { method, data } => {
                debug!(method = %method, "Remote notification");
                let _ = self.notifications.send(RemoteNotification { method, data });
            }
            SignalingMessage::Request { id, method, .. } => {
                warn!(id, method = %method, "Ignoring request from remote; client does not serve requests");
            }
        }
    }

    /// Send a named request and wait for its correlated reply
    pub async fn request(&self, method: &str, data: Value) -> Result<Value> {
        self.ensure_open()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // fail_all may have drained the map between ensure_open and insert
        if let Some(reason) = self.closed.read().clone() {
            self.pending.remove(&id);
            return Err(Error::channel(reason));
        }

        debug!(id, method = %method, "Sending request");
        if let Err(e) = self
            .channel
            .send(SignalingMessage::Request {
                id,
                method: method.to_string(),
                data,
            })
            .await
        {
            self.pending.remove(&id);
            error!(id, method = %method, error = %e, "Failed to send request");
            return Err(e);
        }

        let reply = match self.request_timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.remove(&id);
                    warn!(id, method = %method, ?after, "Request timed out");
                    return Err(Error::Timeout {
                        method: method.to_string(),
                        after,
                    });
                }
            },
            None => rx.await,
        };

        match reply {
            Ok(data) => {
                debug!(id, method = %method, "Received reply");
                Ok(data)
            }
            // Waiter dropped by fail_all
            Err(_) => Err(Error::channel(
                self.closed
                    .read()
                    .clone()
                    .unwrap_or_else(|| "request abandoned".to_string()),
            )),
        }
    }

    /// Serialize the payload, send the request and decode the reply
    pub async fn request_typed<P, T>(&self, method: &str, payload: &P) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let data = serde_json::to_value(payload)?;
        let reply = self.request(method, data).await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Send a fire-and-forget signal
    pub async fn notify(&self, method: &str, data: Value) -> Result<()> {
        self.ensure_open()?;
        debug!(method = %method, "Sending notification");
        self.channel
            .send(SignalingMessage::Notification {
                method: method.to_string(),
                data,
            })
            .await
    }

    /// Subscribe to notifications pushed by the SFU
    pub fn notifications(&self) -> broadcast::Receiver<RemoteNotification> {
        self.notifications.subscribe()
    }

    /// Requests still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.read().is_some()
    }

    /// Close the gateway: fail pending requests, stop dispatching and close
    /// the outbound channel.
    pub async fn close(&self) {
        self.fail_all("gateway closed");
        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
        self.channel.close().await;
    }

    fn ensure_open(&self) -> Result<()> {
        if let Some(reason) = self.closed.read().as_ref() {
            return Err(Error::channel(reason.clone()));
        }
        if !self.channel.is_connected() {
            return Err(Error::channel("signaling channel not connected"));
        }
        Ok(())
    }

    fn fail_all(&self, reason: &str) {
        {
            let mut closed = self.closed.write();
            if closed.is_some() {
                return;
            }
            *closed = Some(reason.to_string());
        }

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in &ids {
            // Dropping the sender wakes the waiter with a channel error
            self.pending.remove(id);
        }

        info!(reason = %reason, failed = ids.len(), "Signaling gateway closed");
        self.events.emit(SessionEvent::ChannelClosed {
            reason: reason.to_string(),
        });
    }
}

impl Drop for SignalingGateway {
    fn drop(&mut self) {
        if let Some(task) = self.reader.get_mut().take() {
            task.abort();
        }
    }
}
