//! Axum-based command server.
//!
//! `POST /invoke` runs one command. `GET /events` upgrades to a WebSocket
//! that streams the request events addressed to the caller.

use std::sync::Arc;
use std::time::Instant;

use accord_rights::RightsRegistry;
use accord_types::{IdentityError, ParticipantId};
use accord_workflow::{Coordinator, RequestEvent, SharedLedger};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, RpcError};
use crate::handlers::{execute, Command};
use crate::identity::{with_caller, PARTICIPANT_HEADER};
use crate::metrics::{RpcMetrics, UNKNOWN_COMMAND};

/// Shared state for every handler.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// Local service registry. Rights themselves are reached through the
    /// coordinator, which may be backed by a remote registry.
    pub registry: Arc<RightsRegistry<SharedLedger>>,
    pub metrics: Arc<RpcMetrics>,
}

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/invoke", post(handle_invoke))
        .route("/events", get(handle_events))
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .with_state(state)
}

pub struct RpcServer {
    pub bind: String,
    pub port: u16,
    state: Arc<AppState>,
}

impl RpcServer {
    pub fn new(bind: impl Into<String>, port: u16, state: Arc<AppState>) -> Self {
        Self {
            bind: bind.into(),
            port,
            state,
        }
    }

    /// Bind and serve until the process exits.
    pub async fn start(&self) -> Result<(), RpcError> {
        let addr = format!("{}:{}", self.bind, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RpcError::Server(format!("binding {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RpcError> {
        if let Ok(addr) = listener.local_addr() {
            info!("RPC server listening on {}", addr);
        }
        axum::serve(listener, router(Arc::clone(&self.state)))
            .await
            .map_err(|e| RpcError::Server(e.to_string()))
    }
}

async fn handle_invoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let started = Instant::now();
    let (name, result) = match parse_invocation(&headers, &body) {
        Ok((caller, command)) => {
            let name = command.name();
            let result = with_caller(
                caller.clone(),
                execute(&state.coordinator, &state.registry, &caller, command),
            )
            .await;
            (name, result)
        }
        Err(e) => (UNKNOWN_COMMAND, Err(e)),
    };

    let elapsed = started.elapsed().as_secs_f64();
    match result {
        Ok(value) => {
            state.metrics.observe(name, "ok", elapsed);
            (StatusCode::OK, Json(json!({ "result": value }))).into_response()
        }
        Err(e) => {
            let kind = e.kind();
            state.metrics.observe(name, kind.as_str(), elapsed);
            if kind == ErrorKind::Internal || kind == ErrorKind::Unavailable {
                warn!(command = name, error = %e, "command failed");
            } else {
                debug!(command = name, error = %e, "command refused");
            }
            e.into_response()
        }
    }
}

fn caller_from(headers: &HeaderMap) -> Result<ParticipantId, RpcError> {
    let raw = headers
        .get(PARTICIPANT_HEADER)
        .ok_or_else(|| IdentityError::Unavailable(format!("missing {PARTICIPANT_HEADER} header")))?
        .to_str()
        .map_err(|e| IdentityError::Malformed(e.to_string()))?;
    Ok(ParticipantId::parse(raw).map_err(|e| IdentityError::Malformed(format!("{raw:?}: {e}")))?)
}

fn parse_invocation(headers: &HeaderMap, body: &str) -> Result<(ParticipantId, Command), RpcError> {
    let caller = caller_from(headers)?;
    let request: InvokeRequest = serde_json::from_str(body)
        .map_err(|e| RpcError::InvalidRequest(format!("parse error: {e}")))?;
    let command = Command::parse(&request.command, &request.args)?;
    Ok((caller, command))
}

/// Upgrade to a WebSocket carrying the caller's request events.
///
/// The subscription is taken before the upgrade so nothing published after
/// the handshake is missed.
async fn handle_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let caller = match caller_from(&headers) {
        Ok(caller) => caller,
        Err(e) => return e.into_response(),
    };
    let events = state.coordinator.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, caller, events))
}

async fn stream_events(
    socket: WebSocket,
    caller: ParticipantId,
    mut events: broadcast::Receiver<RequestEvent>,
) {
    let (mut sender, mut receiver) = socket.split();
    debug!(%caller, "event subscriber connected");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.concerns(&caller) => {
                    let text = match serde_json::to_value(&event) {
                        Ok(data) => json!({ "topic": "request", "data": data }).to_string(),
                        Err(e) => {
                            warn!(request_id = %event.request_id, error = %e, "cannot encode event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%caller, skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(data))) => {
                    let _ = sender.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%caller, error = %e, "event socket receive error");
                    break;
                }
            },
        }
    }
    debug!(%caller, "event subscriber disconnected");
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
