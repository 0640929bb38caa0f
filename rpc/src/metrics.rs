//! Prometheus metrics for the command surface.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, Encoder,
    HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::RpcError;

/// Label used for commands that failed to parse.
pub const UNKNOWN_COMMAND: &str = "unknown";

pub struct RpcMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,
    /// Commands handled, by command name and outcome (`ok` or an error kind).
    pub commands_total: IntCounterVec,
    /// Time spent handling a command, in seconds.
    pub command_duration_seconds: HistogramVec,
}

impl RpcMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let commands_total = register_int_counter_vec_with_registry!(
            Opts::new("accord_commands_total", "Commands handled by this service"),
            &["command", "outcome"],
            registry
        )
        .expect("failed to register accord_commands_total");

        let command_duration_seconds = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "accord_command_duration_seconds",
                "Time spent handling one command"
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["command"],
            registry
        )
        .expect("failed to register accord_command_duration_seconds");

        Self {
            registry,
            commands_total,
            command_duration_seconds,
        }
    }

    pub fn observe(&self, command: &str, outcome: &str, seconds: f64) {
        self.commands_total
            .with_label_values(&[command, outcome])
            .inc();
        self.command_duration_seconds
            .with_label_values(&[command])
            .observe(seconds);
    }

    /// Encode every metric in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, RpcError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| RpcError::Server(format!("encoding metrics: {e}")))?;
        String::from_utf8(buffer).map_err(|e| RpcError::Server(format!("encoding metrics: {e}")))
    }
}

impl Default for RpcMetrics {
    fn default() -> Self {
        Self::new()
    }
}
