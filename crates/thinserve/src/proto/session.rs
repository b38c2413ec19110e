//! Per-session call/reply state: dispatching inbound calls to the root
//! object, routing inbound replies back to pending outbound calls, and
//! queuing outbound traffic on the session's [`Shuttle`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::error::ProtocolError;
use crate::proto::lazyparser::{LazyParser, StructShape, TypeTag, TypeValue, VariantArm, VariantCase};
use crate::proto::shuttle::Shuttle;
use crate::referenceable::Referenceable;

type SessionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProtocolError>> + Send + 'a>>;

/// The decoded `["error", payload]` branch of an inbound reply: an opaque
/// error reported by the peer. Unlike [`ProtocolError`], its template and
/// params are the remote side's own vocabulary, not ours, so it is carried
/// as raw JSON rather than re-parsed into our taxonomy.
#[derive(Debug, Clone)]
pub struct RemoteCallError {
    pub payload: Value,
}

impl fmt::Display for RemoteCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote call failed: {}", self.payload)
    }
}

impl std::error::Error for RemoteCallError {}

/// A bidirectional call/reply session bound to one root [`Referenceable`].
pub struct Session {
    root: Arc<dyn Referenceable>,
    shuttle: Shuttle,
    pending_calls: Mutex<HashMap<u64, oneshot::Sender<Result<Value, RemoteCallError>>>>,
    next_call_id: Mutex<u64>,
}

impl Session {
    pub fn new(root: Arc<dyn Referenceable>) -> Self {
        Self {
            root,
            shuttle: Shuttle::new(),
            pending_calls: Mutex::new(HashMap::new()),
            next_call_id: Mutex::new(0),
        }
    }

    /// Collect whatever outbound messages are ready, or park until one
    /// arrives. See [`Shuttle::gather_messages`] for the long-poll/bump
    /// semantics.
    pub async fn gather_outgoing_messages(&self) -> Vec<Value> {
        self.shuttle.gather_messages().await
    }

    /// Decode and dispatch one inbound `Call` or `Reply` message.
    ///
    /// Errors here mean either the message's own envelope (the `call`/
    /// `reply` tag, or its `id`/`target`/`method`/`result` keys) was
    /// malformed, or an inbound reply named a call id this session never
    /// issued (or already resolved) -- these are the caller's
    /// responsibility to surface as an HTTP 400. A failure while invoking a
    /// dispatched method, by contrast, is caught and reported back to the
    /// peer as an `["error", ...]` reply; it never reaches this return
    /// value.
    pub async fn receive_message(&self, msg: Value) -> Result<(), ProtocolError> {
        self.receive_message_with_lifetime(msg).await
    }

    async fn receive_message_with_lifetime<'s>(&'s self, msg: Value) -> Result<(), ProtocolError> {
        let lp = LazyParser::new(msg);
        let cases: Vec<VariantCase<'s, SessionFuture<'s>>> = vec![
            VariantCase {
                tag: "call",
                shape: StructShape::required(&["id", "target", "method"]),
                handler: Box::new(move |children| {
                    let id = parse_call_id(&children["id"])?;
                    // A non-null target names a server-managed reference other
                    // than the session's root, which this revision does not
                    // support. Resolving it fails the POST itself (a 400),
                    // not the call's own reply -- mirroring the original's
                    // `_resolve_sref` raising synchronously in `_receive_call`
                    // before the `maybeDeferred` dispatch.
                    if !children["target"].raw().is_null() {
                        return Err(ProtocolError::InternalError);
                    }
                    let method = children["method"].clone();
                    let fut: SessionFuture<'s> = Box::pin(async move { self.handle_call(id, method).await });
                    Ok(fut)
                }),
            },
            VariantCase {
                tag: "reply",
                shape: StructShape::required(&["id", "result"]),
                handler: Box::new(move |children| {
                    let id = parse_call_id(&children["id"])?;
                    let result = children["result"].clone();
                    let fut: SessionFuture<'s> = Box::pin(async move { self.handle_reply(id, result).await });
                    Ok(fut)
                }),
            },
        ];
        let fut: SessionFuture<'s> = lp.apply_variant_struct(cases)?;
        fut.await
    }

    async fn handle_call(&self, id: u64, method: LazyParser) -> Result<(), ProtocolError> {
        let result_value = match self.root.dispatch(method).await {
            Ok(value) => Value::Array(vec![Value::String("data".to_owned()), value]),
            Err(err) => {
                let protocol_err = ProtocolError::coerce_anyhow(err);
                let payload = serde_json::to_value(protocol_err.to_payload()).expect("ErrorPayload always serializes");
                Value::Array(vec![Value::String("error".to_owned()), payload])
            }
        };

        self.shuttle.send_message(json!(["reply", {"id": id, "result": result_value}]));
        Ok(())
    }

    async fn handle_reply(&self, id: u64, result: LazyParser) -> Result<(), ProtocolError> {
        let outcome: Result<Value, RemoteCallError> = result.apply_variant(&[
            VariantArm {
                tag: "data",
                handler: Box::new(|body: LazyParser| Ok(Ok(body.raw().clone()))),
            },
            VariantArm {
                tag: "error",
                handler: Box::new(|body: LazyParser| Ok(Err(RemoteCallError { payload: body.raw().clone() }))),
            },
        ])?;

        let sender = self.pending_calls.lock().expect("pending_calls mutex poisoned").remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
                Ok(())
            }
            // A reply for an id we never sent, or one we already resolved.
            None => Err(ProtocolError::InvalidParameter { name: "id".to_owned() }),
        }
    }

    /// Issue an outbound call against the peer's root object and await its
    /// reply.
    pub async fn send_call(&self, method: &str, params: Value) -> Result<Value, RemoteCallError> {
        let (id, rx) = self.register_call();

        self.shuttle.send_message(json!(["call", {
            "id": id,
            "target": Value::Null,
            "method": [method, params],
        }]));

        rx.await.unwrap_or_else(|_| {
            Err(RemoteCallError {
                payload: json!({"template": "session closed before a reply arrived", "params": {}}),
            })
        })
    }

    /// Allocate a call id and register its reply waiter, without sending
    /// anything. Split out of `send_call` so the waiter can be observed
    /// independently of the future that awaits it.
    fn register_call(&self) -> (u64, oneshot::Receiver<Result<Value, RemoteCallError>>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending_calls.lock().expect("pending_calls mutex poisoned").insert(id, tx);
        (id, rx)
    }

    fn next_id(&self) -> u64 {
        let mut counter = self.next_call_id.lock().expect("next_call_id mutex poisoned");
        let id = *counter;
        *counter += 1;
        id
    }
}

impl Drop for Session {
    /// Reject every call still awaiting a reply rather than leaving its
    /// waiter parked forever.
    fn drop(&mut self) {
        let mut pending = self.pending_calls.lock().expect("pending_calls mutex poisoned");
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(RemoteCallError {
                payload: json!({"template": "session closed", "params": {}}),
            }));
        }
    }
}

fn parse_call_id(lp: &LazyParser) -> Result<u64, ProtocolError> {
    let TypeValue::Number(n) = lp.parse_type(TypeTag::Number)? else {
        unreachable!("parse_type(Number) always yields TypeValue::Number");
    };
    n.as_u64().ok_or_else(|| ProtocolError::FailedPredicate {
        path: lp.path().to_owned(),
        fragment: lp.raw().clone(),
        description: "non-negative integer call id".to_owned(),
    })
}
