//! The HTTP surface: three routes over a table of sessions.
//!
//! `POST /` creates a session. `POST /<sid>` delivers one inbound message.
//! `GET /<sid>` long-polls for outbound messages. Every protocol failure --
//! malformed JSON, an unsupported method, a session id nobody recognizes --
//! renders as an HTTP 400 with a `{template, params, path?, message?}` body,
//! pretty-printed the way the original implementation's resource renders
//! its error responses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use rand::RngCore;
use serde_json::{Value, json};

use crate::config::ServerConfig;
use crate::error::ProtocolError;
use crate::proto::session::Session;
use crate::proto::{LazyParser, StructShape, VariantCase};
use crate::referenceable::Referenceable;

/// Builds a fresh root object for each newly created session.
pub type RootFactory = Arc<dyn Fn() -> Arc<dyn Referenceable> + Send + Sync>;

struct AppState {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    root_factory: RootFactory,
    long_poll_warn: std::time::Duration,
}

/// Build the router without binding a listener; used directly by
/// integration tests via `tower::ServiceExt::oneshot`.
pub fn build_router(root_factory: RootFactory) -> Router {
    build_router_with_config(root_factory, std::time::Duration::from_secs(60))
}

/// As [`build_router`], but with an explicit long-poll warning threshold
/// (see [`ServerConfig::long_poll_warn`]).
pub fn build_router_with_config(root_factory: RootFactory, long_poll_warn: std::time::Duration) -> Router {
    let state = Arc::new(AppState {
        sessions: Mutex::new(HashMap::new()),
        root_factory,
        long_poll_warn,
    });
    Router::new()
        .route("/", any(create_session))
        .route("/{session_id}", any(session_endpoint))
        .fallback(invalid_postpath)
        .with_state(state)
}

/// Any URL path after the API root other than empty or exactly one session
/// id segment (e.g. `/<sid>/extra`) is a bad address, not a 404 -- the whole
/// surface is three routes, so anything else names a malformed `session`
/// parameter.
async fn invalid_postpath() -> Response {
    error_response(&ProtocolError::InvalidParameter { name: "session".to_owned() })
}

/// Bind and serve forever (until the process is killed). The long-poll GETs
/// this protocol relies on mean there is no natural "idle" shutdown point;
/// callers that need graceful shutdown should run this inside a task and
/// cancel it externally.
pub async fn serve(config: ServerConfig, root_factory: RootFactory) -> anyhow::Result<()> {
    let router = build_router_with_config(root_factory, config.long_poll_warn);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    tracing::info!(addr = %config.bind_address, "thinserve listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn create_session(State(state): State<Arc<AppState>>, method: Method, body: Bytes) -> Response {
    if method != Method::POST {
        return error_response(&ProtocolError::UnsupportedHttpMethod { method: method.to_string() });
    }

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return error_response(&ProtocolError::MalformedJson),
    };
    let cases = vec![VariantCase {
        tag: "create_session",
        shape: StructShape::required(&[]),
        handler: Box::new(|_: std::collections::BTreeMap<String, LazyParser>| Ok(())),
    }];
    if let Err(err) = LazyParser::new(parsed).apply_variant_struct(cases) {
        return error_response(&err);
    }

    let session_id = generate_session_id();
    let session = Arc::new(Session::new((state.root_factory)()));
    state.sessions.lock().expect("sessions mutex poisoned").insert(session_id.clone(), session);

    tracing::debug!(session = %session_id, "created session");
    json_ok(StatusCode::OK, &json!({"session": session_id}))
}

async fn session_endpoint(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    method: Method,
    body: Bytes,
) -> Response {
    match method {
        Method::POST => deliver_message(&state, &session_id, body).await,
        Method::GET => long_poll(&state, &session_id, body).await,
        other => error_response(&ProtocolError::UnsupportedHttpMethod { method: other.to_string() }),
    }
}

/// Await `gather`, logging a warning (without cutting the wait short -- the
/// shuttle has no timeout of its own, see [`crate::proto::shuttle::Shuttle`])
/// if it's still parked past `warn_after`.
async fn gather_with_warning(
    session_id: &str,
    warn_after: std::time::Duration,
    gather: impl std::future::Future<Output = Vec<Value>>,
) -> Vec<Value> {
    tokio::pin!(gather);
    loop {
        tokio::select! {
            messages = &mut gather => return messages,
            _ = tokio::time::sleep(warn_after) => {
                tracing::warn!(session = %session_id, "long-poll GET parked past the warning threshold");
            }
        }
    }
}

async fn deliver_message(state: &AppState, session_id: &str, body: Bytes) -> Response {
    let session = match resolve_session(state, session_id) {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return error_response(&ProtocolError::MalformedJson),
    };

    match session.receive_message(parsed).await {
        Ok(()) => json_ok(StatusCode::OK, &json!("ok")),
        Err(err) => error_response(&err),
    }
}

async fn long_poll(state: &AppState, session_id: &str, body: Bytes) -> Response {
    if !body.is_empty() {
        return error_response(&ProtocolError::UnexpectedHttpBody);
    }
    let session = match resolve_session(state, session_id) {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };

    let messages = gather_with_warning(session_id, state.long_poll_warn, session.gather_outgoing_messages()).await;
    json_ok(StatusCode::OK, &Value::Array(messages))
}

fn resolve_session(state: &AppState, session_id: &str) -> Result<Arc<Session>, ProtocolError> {
    state
        .sessions
        .lock()
        .expect("sessions mutex poisoned")
        .get(session_id)
        .cloned()
        .ok_or_else(|| ProtocolError::InvalidParameter { name: "session".to_owned() })
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn json_ok(status: StatusCode, value: &Value) -> Response {
    let body = serde_json::to_string_pretty(value).expect("serde_json::Value always serializes");
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn error_response(err: &ProtocolError) -> Response {
    let payload = err.to_payload();
    let body = serde_json::to_string_pretty(&payload).expect("ErrorPayload always serializes");
    tracing::warn!(template = payload.template, "rejecting request");
    (StatusCode::BAD_REQUEST, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
