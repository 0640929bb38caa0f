//! Cross-service invocation transport.
//!
//! A call names a command and passes positional string arguments:
//! `POST {address}/invoke` with `{"command": ..., "args": [...]}` and the
//! caller in the `x-accord-participant` header. The service answers
//! `{"result": ...}` or `{"error": {"kind": ..., "message": ...}}`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use accord_types::ParticipantId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::TransportError;

/// Header carrying the caller's participant id.
pub const PARTICIPANT_HEADER: &str = "x-accord-participant";

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke `command` on the service at `address`, returning the JSON
    /// encoding of its result.
    async fn call(
        &self,
        address: &str,
        caller: &ParticipantId,
        command: &str,
        args: &[String],
    ) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    command: &'a str,
    args: &'a [String],
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    kind: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

// ── HTTP ────────────────────────────────────────────────────────────────────

/// [`Transport`] over HTTP with explicit request and connect timeouts.
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| TransportError::RequestFailed(format!("building HTTP client: {e}")))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(
        &self,
        address: &str,
        caller: &ParticipantId,
        command: &str,
        args: &[String],
    ) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/invoke", address.trim_end_matches('/'));
        debug!(%url, command, "invoking remote command");

        let response = self
            .http_client
            .post(&url)
            .header(PARTICIPANT_HEADER, caller.as_str())
            .json(&InvokeRequest { command, args })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else if e.is_connect() {
                    TransportError::Unreachable(format!("connection failed: {e}"))
                } else {
                    TransportError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else {
                TransportError::InvalidResponse(format!("reading body: {e}"))
            }
        })?;

        if !status.is_success() {
            return Err(match serde_json::from_slice::<ErrorResponse>(&body) {
                // The peer's own dependencies are down; retry like a dead peer.
                Ok(err) if err.error.kind == "unavailable" => {
                    TransportError::Unreachable(err.error.message)
                }
                Ok(err) => TransportError::Remote {
                    kind: err.error.kind,
                    message: err.error.message,
                },
                Err(_) if status.is_server_error() => {
                    TransportError::Unreachable(format!("HTTP status {status}"))
                }
                Err(_) => TransportError::RequestFailed(format!("HTTP status {status}")),
            });
        }

        let parsed: InvokeResponse = serde_json::from_slice(&body)
            .map_err(|e| TransportError::InvalidResponse(format!("parsing result: {e}")))?;
        serde_json::to_vec(&parsed.result)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

// ── Null ────────────────────────────────────────────────────────────────────

/// One recorded call made through a [`NullTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub address: String,
    pub caller: ParticipantId,
    pub command: String,
    pub args: Vec<String>,
}

/// In-process transport with scripted responses, for tests.
///
/// Responses are queued per command and consumed in order. A command with
/// nothing queued is unreachable.
#[derive(Default)]
pub struct NullTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, TransportError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response for `command`.
    pub fn respond(&self, command: &str, response: Result<Value, TransportError>) {
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(command.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn call(
        &self,
        address: &str,
        caller: &ParticipantId,
        command: &str,
        args: &[String],
    ) -> Result<Vec<u8>, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedCall {
                address: address.to_string(),
                caller: caller.clone(),
                command: command.to_string(),
                args: args.to_vec(),
            });
        let next = self
            .responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(command)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(value)) => serde_json::to_vec(&value)
                .map_err(|e| TransportError::InvalidResponse(e.to_string())),
            Some(Err(e)) => Err(e),
            None => Err(TransportError::Unreachable(format!(
                "no response scripted for {command}"
            ))),
        }
    }
}
