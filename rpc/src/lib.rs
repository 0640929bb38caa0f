//! Command surface for the negotiation engine.
//!
//! `POST /invoke` takes `{"command": ..., "args": [...]}` with the caller in
//! the `x-accord-participant` header and answers `{"result": ...}` or
//! `{"error": {"kind": ..., "message": ...}}`. `GET /events` streams the
//! caller's request events over a WebSocket. `GET /metrics` serves
//! Prometheus text and `GET /health` answers while the server is up.

pub mod error;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod server;

pub use error::{ErrorKind, RpcError};
pub use handlers::Command;
pub use identity::{with_caller, RequestIdentity, PARTICIPANT_HEADER};
pub use metrics::RpcMetrics;
pub use server::{router, AppState, RpcServer};
