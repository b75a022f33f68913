//! Connect and produce hooks
//!
//! The transport asks its owner for two things it cannot do alone: get its
//! DTLS parameters acknowledged by the SFU, and get a server-side producer
//! id for a new flow. Each hook receives a [`HookCompletion`] that must be
//! signaled exactly once. Dropping it unsignaled fails the waiting
//! transport with [`Error::HookAbandoned`] instead of hanging it.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::signaling::messages::{ConnectTransportRequest, ProduceReply, ProduceRequest};
use crate::signaling::SignalingGateway;
use crate::types::{DtlsParameters, ProducerId};

/// Single-use completion handed to a hook
#[must_use = "a hook completion must be signaled"]
pub struct HookCompletion<T> {
    tx: oneshot::Sender<Result<T>>,
}

/// Transport side of a [`HookCompletion`]
pub(crate) struct HookWaiter<T> {
    hook: &'static str,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> HookCompletion<T> {
    pub(crate) fn new(hook: &'static str) -> (Self, HookWaiter<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, HookWaiter { hook, rx })
    }

    pub fn complete(self, result: Result<T>) {
        if self.tx.send(result).is_err() {
            debug!("Hook completed after the transport stopped waiting");
        }
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, error: Error) {
        self.complete(Err(error));
    }
}

impl<T> HookWaiter<T> {
    pub(crate) async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::HookAbandoned(self.hook)),
        }
    }
}

/// Invoked once per transport with the local DTLS parameters
pub type ConnectHook =
    Arc<dyn Fn(DtlsParameters, HookCompletion<()>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked once per new flow; completes with the server-issued producer id
pub type ProduceHook =
    Arc<dyn Fn(ProduceRequest, HookCompletion<ProducerId>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Progress of a signaling-backed connect hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Started,
    Succeeded,
    Failed,
}

/// Observer notified as a connect hook progresses
pub type ConnectObserver = Arc<dyn Fn(ConnectPhase) + Send + Sync>;

/// Connect hook that sends `{dtlsParameters}` as `method` and waits for the ack
pub fn connect_via(
    gateway: Arc<SignalingGateway>,
    method: &'static str,
    observer: ConnectObserver,
) -> ConnectHook {
    Arc::new(move |dtls_parameters: DtlsParameters, done: HookCompletion<()>| {
        let gateway = gateway.clone();
        let observer = observer.clone();
        async move {
            observer(ConnectPhase::Started);
            let request = ConnectTransportRequest { dtls_parameters };
            let result = match gateway.request_typed::<_, Value>(method, &request).await {
                Ok(ack) => check_ack(&ack),
                Err(e) => Err(e),
            };
            match &result {
                Ok(()) => observer(ConnectPhase::Succeeded),
                Err(e) => {
                    warn!(method, error = %e, "Transport connect rejected");
                    observer(ConnectPhase::Failed);
                }
            }
            done.complete(result);
        }
        .boxed()
    })
}

/// Produce hook that sends the flow as `method` and completes with the reply id
pub fn produce_via(gateway: Arc<SignalingGateway>, method: &'static str) -> ProduceHook {
    Arc::new(move |request: ProduceRequest, done: HookCompletion<ProducerId>| {
        let gateway = gateway.clone();
        async move {
            let result: Result<ProducerId> = async {
                let reply: Value = gateway.request_typed(method, &request).await?;
                check_ack(&reply)?;
                let reply: ProduceReply = serde_json::from_value(reply)?;
                Ok(reply.id)
            }
            .await;
            done.complete(result);
        }
        .boxed()
    })
}

/// An acknowledgment carrying `{error}` is a remote rejection
pub(crate) fn check_ack(ack: &Value) -> Result<()> {
    match ack.get("error") {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(message)) => Err(Error::remote(message.clone())),
        Some(other) => Err(Error::remote(other.to_string())),
    }
}
