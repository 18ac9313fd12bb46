//! Tool invocation with approval, retry and telemetry.
//!
//! [`call_tool`] wraps a single `tools/call` request:
//!
//! 1. the approval hook, if any, runs once before anything is sent
//! 2. a `Start` event is emitted
//! 3. the request runs under the retry policy, each attempt with a fresh
//!    timeout window
//! 4. exactly one `Success` or `Failure` event is emitted
//!
//! A result with `isError: true` is a tool-level failure reported by the
//! server and counts as a successful call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::{ProtocolError, WireError, WireResult};
use crate::messages::{CallToolParams, CallToolResult};
use crate::retry::{run_with_rate_limit_retry, BackoffPolicy, RetryPredicate};
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetry};

/// Verdict of an approval hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Proceed with the call
    Allow,
    /// Refuse the call; nothing is sent
    Deny {
        /// Why the call was refused
        reason: String,
    },
}

impl ApprovalDecision {
    /// Deny with a reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }
}

/// Gate consulted before a tool call is sent.
#[async_trait]
pub trait ApprovalHook: Send + Sync {
    /// Decide whether `tool` may run with `arguments`.
    ///
    /// `context` is whatever the caller put in [`CallToolOptions::context`].
    async fn approve(&self, tool: &str, arguments: &Value, context: &Value) -> ApprovalDecision;
}

/// Adapts a synchronous closure into an [`ApprovalHook`].
pub struct FnApproval<F>(F);

impl<F> fmt::Debug for FnApproval<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnApproval(..)")
    }
}

#[async_trait]
impl<F> ApprovalHook for FnApproval<F>
where
    F: Fn(&str, &Value, &Value) -> ApprovalDecision + Send + Sync,
{
    async fn approve(&self, tool: &str, arguments: &Value, context: &Value) -> ApprovalDecision {
        (self.0)(tool, arguments, context)
    }
}

/// Build an approval hook from a closure.
pub fn approval_fn<F>(decide: F) -> Arc<dyn ApprovalHook>
where
    F: Fn(&str, &Value, &Value) -> ApprovalDecision + Send + Sync + 'static,
{
    Arc::new(FnApproval(decide))
}

/// Per-call behaviour.
#[derive(Clone)]
pub struct CallToolOptions {
    /// Timeout for each attempt; the connection default when `None`
    pub timeout: Option<Duration>,
    /// Retry schedule
    pub retry: BackoffPolicy,
    /// Which errors are retried
    pub retry_if: RetryPredicate,
    /// Optional approval gate
    pub approval: Option<Arc<dyn ApprovalHook>>,
    /// Opaque data handed to the approval hook
    pub context: Value,
    /// Where telemetry goes
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Server label attached to telemetry
    pub server: Option<String>,
}

impl Default for CallToolOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retry: BackoffPolicy::default(),
            retry_if: RetryPredicate::Default,
            approval: None,
            context: Value::Null,
            telemetry: Arc::new(TracingTelemetry),
            server: None,
        }
    }
}

impl fmt::Debug for CallToolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallToolOptions")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("retry_if", &self.retry_if)
            .field("approval", &self.approval.is_some())
            .field("server", &self.server)
            .finish()
    }
}

impl CallToolOptions {
    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: BackoffPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the retry predicate.
    pub fn with_retry_if(mut self, retry_if: RetryPredicate) -> Self {
        self.retry_if = retry_if;
        self
    }

    /// Install an approval hook.
    pub fn with_approval(mut self, approval: Arc<dyn ApprovalHook>) -> Self {
        self.approval = Some(approval);
        self
    }

    /// Set the approval context.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Set the telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Label telemetry with a server name.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }
}

/// Call a tool on the server.
///
/// Failed attempts are retried under `options.retry`, waiting for the
/// server's `Retry-After` hint when a rate-limited response carries one.
///
/// # Errors
///
/// - [`WireError::ApprovalDenied`] when the hook refuses; nothing is sent
/// - the last attempt's error once retries are exhausted or the error is not
///   retryable
/// - [`ProtocolError::InvalidResponse`] when the result does not parse
pub async fn call_tool(
    connection: &Connection,
    name: &str,
    arguments: Value,
    options: &CallToolOptions,
) -> WireResult<CallToolResult> {
    if let Some(approval) = &options.approval {
        if let ApprovalDecision::Deny { reason } =
            approval.approve(name, &arguments, &options.context).await
        {
            warn!(tool = %name, "Tool call denied: {}", reason);
            return Err(WireError::ApprovalDenied { reason });
        }
    }

    let call_id = Uuid::new_v4();
    options.telemetry.record(TelemetryEvent::Start {
        call_id,
        tool: name.to_string(),
        server: options.server.clone(),
    });

    let params = serde_json::to_value(CallToolParams {
        name: name.to_string(),
        arguments: Some(arguments),
    })?;

    let started = Instant::now();
    let retried = run_with_rate_limit_retry(&options.retry, &options.retry_if, |attempt| {
        let params = params.clone();
        async move {
            debug!(call_id = %call_id, tool = %name, attempt, "Sending tool call");
            let raw = connection
                .request("tools/call", Some(params), options.timeout)
                .await?;
            serde_json::from_value::<CallToolResult>(raw).map_err(|e| {
                WireError::from(ProtocolError::InvalidResponse {
                    method: "tools/call".to_string(),
                    reason: e.to_string(),
                })
            })
        }
    })
    .await;
    let duration = started.elapsed();

    match &retried.result {
        Ok(_) => options.telemetry.record(TelemetryEvent::Success {
            call_id,
            tool: name.to_string(),
            attempt: retried.attempts,
            duration,
        }),
        Err(error) => options.telemetry.record(TelemetryEvent::Failure {
            call_id,
            tool: name.to_string(),
            attempt: retried.attempts,
            duration,
            error: error.category().to_string(),
            message: error.to_string(),
        }),
    }

    retried.result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_approval() {
        let hook = approval_fn(|tool, arguments, _context| {
            if tool == "delete_file" && arguments["path"] == "/" {
                ApprovalDecision::deny("refusing to delete root")
            } else {
                ApprovalDecision::Allow
            }
        });

        assert_eq!(
            hook.approve("read_file", &json!({"path": "/"}), &Value::Null)
                .await,
            ApprovalDecision::Allow
        );
        assert_eq!(
            hook.approve("delete_file", &json!({"path": "/"}), &Value::Null)
                .await,
            ApprovalDecision::deny("refusing to delete root")
        );
    }

    #[test]
    fn test_default_options() {
        let options = CallToolOptions::default();
        assert_eq!(options.retry.max_attempts - 1, 3, "three retries after the first attempt");
        assert_eq!(options.retry.base_delay, Duration::from_millis(100));
        assert_eq!(options.retry.max_delay, Duration::from_millis(5000));
        assert!(options.approval.is_none());
        assert!(options.timeout.is_none());
    }
}
