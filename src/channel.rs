use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::{mpsc, oneshot};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::conn::Connection;
use crate::error::{CdpError, Result};
use crate::protocol::{CallId, Message, MethodId};

/// The protocol domains that must be enabled before the channel is used.
const REQUIRED_DOMAINS: [&str; 6] = [
    "Page.enable",
    "DOM.enable",
    "Runtime.enable",
    "Accessibility.enable",
    "Network.enable",
    "Inspector.enable",
];

/// Request/response plus event-subscription facade over one debugging target.
///
/// The websocket is owned by a background task; this handle routes commands
/// to it and hands out per-method event receivers. Once
/// `Inspector.targetCrashed` is observed the channel is permanently poisoned
/// and every further `send` surfaces [`CdpError::PageCrashed`].
#[derive(Debug, Clone)]
pub struct CdpChannel {
    tx: mpsc::UnboundedSender<ChannelMessage>,
    crashed: Arc<AtomicBool>,
}

#[derive(Debug)]
enum ChannelMessage {
    Command {
        method: MethodId,
        params: Value,
        tx: oneshot::Sender<Result<Value>>,
    },
    Subscribe {
        method: MethodId,
        tx: mpsc::UnboundedSender<Value>,
    },
    Close,
}

impl CdpChannel {
    /// Connect to the websocket of a single debugging target and spawn the
    /// task that services it.
    pub async fn connect(ws_url: impl AsRef<str>) -> Result<Self> {
        let conn = Connection::connect(ws_url.as_ref()).await?;
        let (tx, rx) = mpsc::unbounded();
        let crashed = Arc::new(AtomicBool::new(false));
        tokio::spawn(run(conn, rx, Arc::clone(&crashed)));
        Ok(Self { tx, crashed })
    }

    /// Enable every domain the session depends on.
    pub async fn enable_domains(&self) -> Result<()> {
        for method in REQUIRED_DOMAINS {
            self.send(method, json!({})).await?;
        }
        Ok(())
    }

    /// Whether the target reported a crash.
    pub fn crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Fail fast with the error the next `send` would surface.
    pub fn ensure_alive(&self) -> Result<()> {
        if self.crashed() {
            return Err(CdpError::PageCrashed);
        }
        if self.tx.is_closed() {
            return Err(CdpError::Disconnected);
        }
        Ok(())
    }

    /// Send a command and await its result payload.
    pub async fn send(&self, method: impl Into<MethodId>, params: Value) -> Result<Value> {
        self.ensure_alive()?;
        let (tx, rx) = oneshot::channel();
        self.tx
            .unbounded_send(ChannelMessage::Command {
                method: method.into(),
                params,
                tx,
            })
            .map_err(|_| CdpError::Disconnected)?;
        match rx.await {
            Ok(res) => res,
            Err(_) => Err(self.gone_error()),
        }
    }

    /// Subscribe to an event method. Dropping the returned subscription
    /// unsubscribes; the service task discards senders whose receiver is
    /// gone.
    pub fn subscribe(&self, method: impl Into<MethodId>) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded();
        let _ = self.tx.unbounded_send(ChannelMessage::Subscribe {
            method: method.into(),
            tx,
        });
        EventSubscription::new(rx)
    }

    /// Shut the channel down. Pending commands fail with
    /// [`CdpError::Disconnected`].
    pub fn close(&self) {
        let _ = self.tx.unbounded_send(ChannelMessage::Close);
    }

    fn gone_error(&self) -> CdpError {
        if self.crashed() {
            CdpError::PageCrashed
        } else {
            CdpError::Disconnected
        }
    }

    /// Evaluate an expression in the page, returning its by-value result.
    pub async fn evaluate(&self, expression: impl Into<String>) -> Result<Value> {
        let resp = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression.into(),
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        unwrap_remote_object(resp)
    }

    /// Call a function declaration with `this` bound to the remote object.
    pub async fn call_function_on(
        &self,
        object_id: &str,
        declaration: &str,
        arguments: Vec<Value>,
    ) -> Result<Value> {
        let arguments: Vec<Value> = arguments.into_iter().map(|v| json!({ "value": v })).collect();
        let resp = self
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "functionDeclaration": declaration,
                    "objectId": object_id,
                    "arguments": arguments,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        unwrap_remote_object(resp)
    }

    /// Release a remote object handle, best effort.
    pub async fn release_object(&self, object_id: &str) {
        let _ = self
            .send("Runtime.releaseObject", json!({ "objectId": object_id }))
            .await;
    }
}

/// Extract the by-value payload of a `Runtime` evaluation response, turning
/// a thrown exception into [`CdpError::ScriptError`].
fn unwrap_remote_object(resp: Value) -> Result<Value> {
    if let Some(details) = resp.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("uncaught exception");
        return Err(CdpError::ScriptError(text.to_string()));
    }
    Ok(resp
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// The receiver half of one event subscription.
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl EventSubscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { rx }
    }
}

impl Stream for EventSubscription {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().rx).poll_next(cx)
    }
}

/// Service loop owning the websocket: routes responses to waiting oneshots,
/// fans events out to subscribers, and poisons the channel on a crash.
async fn run(
    mut conn: Connection,
    mut rx: mpsc::UnboundedReceiver<ChannelMessage>,
    crashed: Arc<AtomicBool>,
) {
    let mut pending: HashMap<CallId, oneshot::Sender<Result<Value>>> = HashMap::new();
    let mut listeners: HashMap<MethodId, Vec<mpsc::UnboundedSender<Value>>> = HashMap::new();

    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(ChannelMessage::Command { method, params, tx }) => {
                    if crashed.load(Ordering::SeqCst) {
                        let _ = tx.send(Err(CdpError::PageCrashed));
                        continue;
                    }
                    let id = conn.submit_command(method, params);
                    pending.insert(id, tx);
                }
                Some(ChannelMessage::Subscribe { method, tx }) => {
                    listeners.entry(method).or_default().push(tx);
                }
                Some(ChannelMessage::Close) | None => break,
            },
            item = conn.next() => match item {
                Some(Ok(Message::Response(resp))) => {
                    if let Some(tx) = pending.remove(&resp.id) {
                        let result = match (resp.result, resp.error) {
                            (_, Some(err)) => Err(CdpError::Chrome(err)),
                            (Some(result), None) => Ok(result),
                            (None, None) => Err(CdpError::NoResponse),
                        };
                        let _ = tx.send(result);
                    }
                }
                Some(Ok(Message::Event(event))) => {
                    if event.method == "Inspector.targetCrashed" {
                        tracing::error!("debugging target crashed");
                        crashed.store(true, Ordering::SeqCst);
                        for (_, tx) in pending.drain() {
                            let _ = tx.send(Err(CdpError::PageCrashed));
                        }
                    }
                    let mut emptied = false;
                    if let Some(subs) = listeners.get_mut(&event.method) {
                        // housekeeping: drop senders whose receiver is gone
                        subs.retain(|tx| tx.unbounded_send(event.params.clone()).is_ok());
                        emptied = subs.is_empty();
                    }
                    if emptied {
                        listeners.remove(&event.method);
                    }
                }
                Some(Err(CdpError::Serde(err))) => {
                    tracing::debug!("skipping undecodable frame: {err}");
                }
                Some(Err(err)) => {
                    tracing::error!("websocket failure: {err}");
                    break;
                }
                None => {
                    tracing::debug!("websocket closed by the browser");
                    break;
                }
            },
        }
    }

    let crashed_now = crashed.load(Ordering::SeqCst);
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(if crashed_now {
            CdpError::PageCrashed
        } else {
            CdpError::Disconnected
        }));
    }
}
