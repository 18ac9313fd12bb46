//! App-server sessions over the in-memory transport.

mod common;

use agentwire_core::app_server::{AppServerClient, ReviewDecision};
use agentwire_core::connection::{ClientConfig, ConnectionState};
use agentwire_core::error::{ProtocolError, WireError};
use agentwire_core::messages::{KnownNotification, RequestId, ServerMessage, ServerNotification};
use assert_matches::assert_matches;
use common::{channel_transport, FakeServer};
use serde_json::{json, Value};

async fn started() -> (AppServerClient, FakeServer) {
    let (transport, events, mut server) = channel_transport();
    let (client, initialize) = tokio::join!(
        AppServerClient::connect(transport, events, ClientConfig::default()),
        server.handshake()
    );
    assert!(initialize.get("jsonrpc").is_none());
    (client.unwrap(), server)
}

async fn expect_request(server: &mut FakeServer, method: &str) -> Value {
    let request = server.recv().await;
    assert_eq!(request["method"], method);
    assert!(request.get("jsonrpc").is_none(), "app-server frames carry no jsonrpc");
    request
}

#[tokio::test]
async fn test_thread_and_turn_lifecycle() {
    let (client, mut server) = started().await;

    let (thread_id, _) = tokio::join!(client.thread_start(json!({"cwd": "/work"})), async {
        let request = expect_request(&mut server, "thread/start").await;
        assert_eq!(request["params"]["cwd"], "/work");
        server.push(json!({"id": request["id"], "result": {"thread": {"id": "thr_1"}}}));
    });
    assert_eq!(thread_id.unwrap(), "thr_1");

    let mut events = client.subscribe().await.unwrap();

    let (turn_id, _) = tokio::join!(client.turn_start_text("thr_1", "list the files"), async {
        let request = expect_request(&mut server, "turn/start").await;
        assert_eq!(request["params"]["threadId"], "thr_1");
        assert_eq!(
            request["params"]["input"],
            json!([{"type": "text", "text": "list the files"}])
        );
        server.push(json!({"id": request["id"], "result": {"turn": {"id": "turn_1", "status": "inProgress"}}}));
    });
    assert_eq!(turn_id.unwrap(), "turn_1");

    server.push(json!({
        "method": "turn/completed",
        "params": {"threadId": "thr_1", "turn": {"id": "turn_1", "status": "completed"}}
    }));
    let message = events.recv().await.unwrap();
    assert_matches!(
        message,
        ServerMessage::Notification(ServerNotification::Known(KnownNotification::TurnCompleted(ref params)))
            if params.turn_id() == Some("turn_1")
    );
}

#[tokio::test]
async fn test_missing_thread_id_is_an_invalid_response() {
    let (client, mut server) = started().await;

    let (result, _) = tokio::join!(client.thread_start(json!({})), async {
        let request = expect_request(&mut server, "thread/start").await;
        server.push(json!({"id": request["id"], "result": {"thread": {}}}));
    });

    assert_matches!(
        result,
        Err(WireError::Protocol(ProtocolError::InvalidResponse { ref method, .. })) if method == "thread/start"
    );
}

#[tokio::test]
async fn test_interrupt_falls_back_to_legacy_method() {
    let (client, mut server) = started().await;

    let (result, _) = tokio::join!(client.turn_interrupt("thr_1", "turn_1"), async {
        let current = expect_request(&mut server, "turn/interrupt").await;
        server.push(json!({
            "id": current["id"],
            "error": {"code": -32600, "message": "Invalid request: unknown variant `turn/interrupt`"}
        }));

        let legacy = expect_request(&mut server, "interruptConversation").await;
        assert_eq!(legacy["params"], current["params"]);
        assert_ne!(legacy["id"], current["id"]);
        server.push(json!({"id": legacy["id"], "result": {}}));
    });

    result.unwrap();
}

#[tokio::test]
async fn test_resume_reports_error_after_last_fallback() {
    let (client, mut server) = started().await;

    let (result, _) = tokio::join!(client.thread_resume("thr_9"), async {
        for method in ["thread/resume", "resumeConversation"] {
            let request = expect_request(&mut server, method).await;
            assert_eq!(request["params"]["threadId"], "thr_9");
            server.push(json!({
                "id": request["id"],
                "error": {"code": -32601, "message": "Method not found"}
            }));
        }
    });

    assert_matches!(result, Err(WireError::Remote(ref error)) if error.code == -32601);
}

#[tokio::test]
async fn test_approval_request_round_trip() {
    let (client, mut server) = started().await;
    let mut events = client.subscribe().await.unwrap();

    server.push(json!({
        "id": "appr-7",
        "method": "item/commandExecution/requestApproval",
        "params": {"threadId": "thr_1", "turnId": "turn_1", "command": "rm -rf build"}
    }));

    let request = match events.recv().await.unwrap() {
        ServerMessage::Request(request) => request,
        other => panic!("expected an approval request, got {:?}", other),
    };
    assert_eq!(request.id, RequestId::String("appr-7".to_string()));
    assert_eq!(request.params.as_ref().unwrap()["command"], "rm -rf build");

    client
        .respond_to_approval(request.id, ReviewDecision::AcceptForSession)
        .await
        .unwrap();

    let response = server.recv().await;
    assert_eq!(
        response,
        json!({"id": "appr-7", "result": {"decision": "acceptForSession"}})
    );
}

#[tokio::test]
async fn test_shutdown_stops_the_transport() {
    let (client, _server) = started().await;
    let mut state = client.connection().watch_state();

    client.shutdown().await.unwrap();
    client.connection().closed().await;

    assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
    assert_matches!(
        client.thread_start(json!({})).await,
        Err(WireError::Closed { .. })
    );
}
