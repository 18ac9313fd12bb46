//! Tool-call telemetry.
//!
//! Every logical tool call emits one `Start` followed by exactly one
//! `Success` or `Failure`, all sharing a call id.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// A point in the life of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Approval passed; the first attempt is about to be sent
    Start {
        /// Logical call id
        call_id: Uuid,
        /// Tool name as sent to the server
        tool: String,
        /// Server the tool belongs to, when known
        server: Option<String>,
    },
    /// The call produced a result
    Success {
        /// Logical call id
        call_id: Uuid,
        /// Tool name
        tool: String,
        /// Attempt that succeeded, 1-based
        attempt: u32,
        /// Time since `Start`
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
    /// The call failed after its last attempt
    Failure {
        /// Logical call id
        call_id: Uuid,
        /// Tool name
        tool: String,
        /// Attempts made
        attempt: u32,
        /// Time since `Start`
        #[serde(with = "humantime_serde")]
        duration: Duration,
        /// Error category
        error: String,
        /// Rendered error
        message: String,
    },
}

impl TelemetryEvent {
    /// Call id shared by all events of one call.
    pub fn call_id(&self) -> Uuid {
        match self {
            Self::Start { call_id, .. }
            | Self::Success { call_id, .. }
            | Self::Failure { call_id, .. } => *call_id,
        }
    }
}

/// Receives telemetry events.
pub trait TelemetrySink: Send + Sync {
    /// Record one event.
    fn record(&self, event: TelemetryEvent);
}

/// Logs telemetry through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Start {
                call_id,
                tool,
                server,
            } => info!(
                call_id = %call_id,
                tool = %tool,
                server = server.as_deref().unwrap_or("-"),
                "Tool call started"
            ),
            TelemetryEvent::Success {
                call_id,
                tool,
                attempt,
                duration,
            } => info!(
                call_id = %call_id,
                tool = %tool,
                attempt,
                duration_ms = duration.as_millis() as u64,
                "Tool call succeeded"
            ),
            TelemetryEvent::Failure {
                call_id,
                tool,
                attempt,
                duration,
                error,
                message,
            } => warn!(
                call_id = %call_id,
                tool = %tool,
                attempt,
                duration_ms = duration.as_millis() as u64,
                error = %error,
                "Tool call failed: {}",
                message
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
