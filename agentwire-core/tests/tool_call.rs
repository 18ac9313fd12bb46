//! Tool calls: approval gating, retry and telemetry.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentwire_core::connection::ClientConfig;
use agentwire_core::error::{TransportError, WireError};
use agentwire_core::messages::RequestId;
use agentwire_core::retry::BackoffPolicy;
use agentwire_core::telemetry::{RecordingTelemetry, TelemetryEvent};
use agentwire_core::tool_call::{approval_fn, call_tool, ApprovalDecision, CallToolOptions};
use agentwire_core::transport::TransportEvent;
use assert_matches::assert_matches;
use common::{connected, Reply};
use serde_json::{json, Value};

fn recording_options() -> (CallToolOptions, Arc<RecordingTelemetry>) {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let options = CallToolOptions::default().with_telemetry(telemetry.clone());
    (options, telemetry)
}

#[tokio::test]
async fn test_denied_call_sends_nothing() {
    let (connection, server) = connected(ClientConfig::default()).await;
    let sends_after_handshake = server.send_count();

    let (options, telemetry) = recording_options();
    let options = options.with_approval(approval_fn(|_, _, _| {
        ApprovalDecision::deny("writes are disabled")
    }));

    let result = call_tool(&connection, "write_file", json!({"path": "a.txt"}), &options).await;

    assert_matches!(
        result,
        Err(WireError::ApprovalDenied { ref reason }) if reason == "writes are disabled"
    );
    assert_eq!(server.send_count(), sends_after_handshake);
    assert!(telemetry.events().is_empty());
}

#[tokio::test]
async fn test_approval_runs_once_with_context() {
    let (connection, server) = connected(ClientConfig::default()).await;
    let _server = server.serve(|_, _| Reply::Result(json!({"content": []})));

    let seen: Arc<Mutex<Vec<(String, Value, Value)>>> = Arc::default();
    let recorder = seen.clone();
    let options = CallToolOptions::default()
        .with_context(json!({"session": "s-42"}))
        .with_approval(approval_fn(move |tool, arguments, context| {
            recorder
                .lock()
                .unwrap()
                .push((tool.to_string(), arguments.clone(), context.clone()));
            ApprovalDecision::Allow
        }));

    call_tool(&connection, "search", json!({"q": "rust"}), &options)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0],
        (
            "search".to_string(),
            json!({"q": "rust"}),
            json!({"session": "s-42"})
        )
    );
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_then_success() {
    let (connection, server) = connected(ClientConfig::default()).await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let _server = server.serve(move |server, request| {
        assert_eq!(request["method"], "tools/call");
        assert_eq!(request["params"]["name"], "search");
        assert_eq!(request["params"]["arguments"], json!({"q": "tokio"}));

        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            server.push_event(TransportEvent::RequestFailed {
                id: Some(RequestId::Number(request["id"].as_i64().unwrap())),
                error: TransportError::ConnectionReset {
                    transport_type: "http".to_string(),
                    reason: "connection reset by peer".to_string(),
                }
                .into(),
            });
            Reply::Silent
        } else {
            Reply::Result(json!({"content": [{"type": "text", "text": "found it"}]}))
        }
    });

    let (options, telemetry) = recording_options();
    let result = call_tool(&connection, "search", json!({"q": "tokio"}), &options)
        .await
        .unwrap();

    assert_eq!(result.text(), "found it");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let events = telemetry.events();
    assert_eq!(events.len(), 2);
    assert_matches!(events[0], TelemetryEvent::Start { ref tool, .. } if tool == "search");
    assert_matches!(
        events[1],
        TelemetryEvent::Success { attempt: 2, duration, .. }
            if duration >= Duration::from_millis(100) && duration < Duration::from_millis(150)
    );
    assert_eq!(events[0].call_id(), events[1].call_id());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_call_waits_for_retry_after() {
    let (connection, server) = connected(ClientConfig::default()).await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let _server = server.serve(move |server, request| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            server.push_event(TransportEvent::RequestFailed {
                id: Some(RequestId::Number(request["id"].as_i64().unwrap())),
                error: TransportError::HttpError {
                    status_code: 429,
                    reason: "Too Many Requests".to_string(),
                    retry_after: Some(Duration::from_secs(3)),
                }
                .into(),
            });
            Reply::Silent
        } else {
            Reply::Result(json!({"content": [{"type": "text", "text": "ok"}]}))
        }
    });

    let (options, telemetry) = recording_options();
    let result = call_tool(&connection, "search", json!({}), &options)
        .await
        .unwrap();

    assert_eq!(result.text(), "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_matches!(
        telemetry.events()[1],
        TelemetryEvent::Success { attempt: 2, duration, .. }
            if duration >= Duration::from_secs(3) && duration < Duration::from_millis(3050)
    );
}

#[tokio::test]
async fn test_tool_level_error_is_a_success() {
    let (connection, server) = connected(ClientConfig::default()).await;
    let _server = server.serve(|_, _| {
        Reply::Result(json!({
            "content": [{"type": "text", "text": "file not found"}],
            "isError": true
        }))
    });

    let (options, telemetry) = recording_options();
    let result = call_tool(&connection, "read_file", json!({"path": "nope"}), &options)
        .await
        .unwrap();

    assert!(result.is_error());
    assert_eq!(result.text(), "file not found");
    assert_matches!(telemetry.events()[1], TelemetryEvent::Success { attempt: 1, .. });
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_emit_one_failure() {
    let (connection, server) = connected(ClientConfig::default()).await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let _server = server.serve(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Reply::Silent
    });

    let (options, telemetry) = recording_options();
    let options = options.with_timeout(Duration::from_secs(1));
    let result = call_tool(&connection, "slow_tool", json!({}), &options).await;

    assert_matches!(result, Err(WireError::Timeout { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 4, "first attempt plus three retries");

    // 4 x 1s timeouts plus 100ms, 200ms and 400ms of backoff.
    let events = telemetry.events();
    assert_eq!(events.len(), 2);
    assert_matches!(
        events[1],
        TelemetryEvent::Failure { attempt: 4, ref error, duration, .. }
            if error == "timeout" && duration >= Duration::from_millis(4700) && duration < Duration::from_millis(4800)
    );
}

#[tokio::test]
async fn test_remote_errors_are_not_retried_by_default() {
    let (connection, server) = connected(ClientConfig::default()).await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let _server = server.serve(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Reply::Error(-32602, "Unknown tool: nope".to_string())
    });

    let (options, telemetry) = recording_options();
    let options = options.with_retry(BackoffPolicy::default().with_max_attempts(5));
    let result = call_tool(&connection, "nope", json!({}), &options).await;

    assert_matches!(result, Err(WireError::Remote(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_matches!(
        telemetry.events()[1],
        TelemetryEvent::Failure { attempt: 1, ref error, .. } if error == "remote"
    );
}
