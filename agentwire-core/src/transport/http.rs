//! Streamable HTTP transport for remote MCP servers.
//!
//! Every outbound line is POSTed to a single endpoint:
//! - the `mcp-session-id` header returned by the server is replayed on every
//!   later request and used to `DELETE` the session on stop
//! - `application/json` bodies (one message or an array) and
//!   `text/event-stream` bodies are turned into `Line` events
//! - a failed exchange becomes a `RequestFailed` event carrying the id of the
//!   request it was sending, so the waiting caller fails without a timeout

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    EventReceiver, EventSender, ExitReason, HttpConfig, Transport, TransportEvent, TransportInfo,
    TransportStats,
};
use crate::auth::CredentialManager;
use crate::error::{TransportError, WireResult};
use crate::messages::RequestId;

const TRANSPORT_TYPE: &str = "http";

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Where the bearer token for each POST comes from.
#[derive(Clone)]
pub enum BearerSource {
    /// A fixed token from configuration
    Static(String),

    /// A stored OAuth credential, refreshed before it expires
    Managed(Arc<CredentialManager>),
}

impl std::fmt::Debug for BearerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static(..)"),
            Self::Managed(_) => f.write_str("Managed(..)"),
        }
    }
}

/// Streamable HTTP transport.
pub struct HttpTransport {
    exchange: Exchange,
    info: TransportInfo,
}

/// Everything one POST needs, cloned into its task.
#[derive(Clone)]
struct Exchange {
    client: Client,
    url: Url,
    headers: HeaderMap,
    server_name: String,
    bearer: Option<BearerSource>,
    session_id: Arc<RwLock<Option<String>>>,
    events: EventSender,
    stats: Arc<TransportStats>,
    stopped: Arc<AtomicBool>,
}

impl HttpTransport {
    /// Create the transport. No request is made until the first `send`.
    pub fn start(
        config: HttpConfig,
        server_name: impl Into<String>,
        bearer: Option<BearerSource>,
    ) -> WireResult<(Self, EventReceiver)> {
        config.validate()?;

        let client = Client::builder().timeout(config.timeout).build()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                crate::error::ConfigError::InvalidValue {
                    parameter: "headers".to_string(),
                    value: name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                crate::error::ConfigError::InvalidValue {
                    parameter: "headers".to_string(),
                    value: name.to_string(),
                    reason: e.to_string(),
                }
            })?;
            headers.insert(name, value);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut info = TransportInfo::new(TRANSPORT_TYPE);
        info.mark_connected();
        info.add_metadata("url", serde_json::json!(config.url.as_str()));
        info.add_metadata("has_auth", serde_json::json!(bearer.is_some()));

        info!("HTTP transport ready for {}", config.url);

        let exchange = Exchange {
            client,
            url: config.url,
            headers,
            server_name: server_name.into(),
            bearer,
            session_id: Arc::new(RwLock::new(None)),
            events: events_tx,
            stats: Arc::new(TransportStats::default()),
            stopped: Arc::new(AtomicBool::new(false)),
        };

        Ok((Self { exchange, info }, events_rx))
    }

    /// Session id assigned by the server, once known.
    pub fn session_id(&self) -> Option<String> {
        self.exchange.session()
    }
}

impl Exchange {
    fn session(&self) -> Option<String> {
        self.session_id.read().ok().and_then(|guard| guard.clone())
    }

    fn set_session(&self, session: &str) {
        if let Ok(mut guard) = self.session_id.write() {
            if guard.as_deref() != Some(session) {
                debug!("Session established with ID: {}", session);
                *guard = Some(session.to_string());
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        if !self.stopped.load(Ordering::SeqCst) {
            let _ = self.events.send(event);
        }
    }

    fn emit_line(&self, line: String) {
        self.stats.record_received();
        self.emit(TransportEvent::Line(line));
    }

    async fn bearer_token(&self) -> WireResult<Option<String>> {
        match &self.bearer {
            None => Ok(None),
            Some(BearerSource::Static(token)) => Ok(Some(token.clone())),
            Some(BearerSource::Managed(manager)) => manager
                .bearer_token(&self.server_name, self.url.as_str())
                .await
                .map(Some),
        }
    }

    async fn post(self, body: Bytes, id: Option<RequestId>) {
        if let Err(error) = self.exchange(body).await {
            self.stats.record_error();
            warn!(id = ?id, "HTTP exchange failed: {}", error);
            self.emit(TransportEvent::RequestFailed { id, error });
        }
    }

    async fn exchange(&self, body: Bytes) -> WireResult<()> {
        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body);

        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }
        if let Some(session) = self.session() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            self.set_session(session);
        }

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let reason = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            };
            return Err(TransportError::HttpError {
                status_code: status.as_u16(),
                reason,
                retry_after,
            }
            .into());
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| {
                value.to_ascii_lowercase().starts_with("text/event-stream")
            });

        if is_event_stream {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| TransportError::ConnectionReset {
                    transport_type: TRANSPORT_TYPE.to_string(),
                    reason: e.to_string(),
                })?;
                if !event.data.trim().is_empty() {
                    self.emit_line(event.data);
                }
            }
        } else {
            let body = response.bytes().await?;
            for line in split_json_body(&body) {
                self.emit_line(line);
            }
        }

        Ok(())
    }
}

/// Lines carried by a JSON response body; a top-level array is a batch.
fn split_json_body(body: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(text) {
        return items.iter().map(|item| item.to_string()).collect();
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// The `id` of an outbound request, so a failed POST can be routed back.
fn peek_request_id(line: &[u8]) -> Option<RequestId> {
    let value: serde_json::Value = serde_json::from_slice(line).ok()?;
    if value.get("method").is_none() {
        return None;
    }
    serde_json::from_value(value.get("id")?.clone()).ok()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, line: Bytes) -> WireResult<()> {
        if self.exchange.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected {
                transport_type: TRANSPORT_TYPE.to_string(),
                reason: "transport stopped".to_string(),
            }
            .into());
        }

        let id = peek_request_id(&line);
        self.exchange.stats.record_sent(line.len());
        tokio::spawn(self.exchange.clone().post(line, id));
        Ok(())
    }

    async fn stop(&mut self) -> WireResult<()> {
        if self.exchange.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping HTTP transport");

        if let Some(session) = self.exchange.session() {
            let result = self
                .exchange
                .client
                .delete(self.exchange.url.clone())
                .header(SESSION_HEADER, session)
                .send()
                .await;
            if let Err(e) = result {
                debug!("Session DELETE failed: {}", e);
            }
        }

        self.info.mark_disconnected();
        let _ = self
            .exchange
            .events
            .send(TransportEvent::Exit(ExitReason::Stopped));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.exchange.stopped.load(Ordering::SeqCst)
    }

    fn get_info(&self) -> TransportInfo {
        let mut info = self.info.clone();
        info.connected = self.is_connected();
        self.exchange.stats.fill(&mut info);
        info.add_metadata("has_session", serde_json::json!(self.session_id().is_some()));
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WireError;
    use assert_matches::assert_matches;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn start(server: &MockServer, bearer: Option<BearerSource>) -> (HttpTransport, EventReceiver) {
        let url: Url = format!("{}/mcp", server.uri()).parse().unwrap();
        HttpTransport::start(HttpConfig::new(url), "remote", bearer).unwrap()
    }

    #[test]
    fn test_peek_request_id() {
        assert_eq!(
            peek_request_id(b"{\"id\":4,\"method\":\"tools/list\"}\n"),
            Some(RequestId::Number(4))
        );
        assert_eq!(peek_request_id(b"{\"method\":\"initialized\"}\n"), None);
        assert_eq!(peek_request_id(b"{\"id\":4,\"result\":{}}\n"), None);
    }

    #[test]
    fn test_split_json_body() {
        assert!(split_json_body(b"  ").is_empty());
        assert_eq!(split_json_body(b"[{\"id\":1,\"result\":1},{\"method\":\"x\"}]").len(), 2);
        assert_eq!(split_json_body(b"{\"id\":1,\"result\":1}\n"), vec!["{\"id\":1,\"result\":1}"]);
    }

    #[tokio::test]
    async fn test_json_response_and_session_capture() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(header("authorization", "Bearer static-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SESSION_HEADER, "session-1")
                    .set_body_raw(r#"{"id":0,"result":{"capabilities":{}}}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let (mut transport, mut events) =
            start(&server, Some(BearerSource::Static("static-token".to_string()))).await;

        transport
            .send(Bytes::from_static(b"{\"id\":0,\"method\":\"initialize\",\"params\":{}}\n"))
            .await
            .unwrap();

        match events.recv().await {
            Some(TransportEvent::Line(line)) => {
                assert_eq!(line, r#"{"id":0,"result":{"capabilities":{}}}"#)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(transport.session_id().as_deref(), Some("session-1"));
    }

    #[tokio::test]
    async fn test_event_stream_response() {
        let server = MockServer::start().await;
        let body = "event: message\ndata: {\"method\":\"notifications/progress\",\"params\":{\"progressToken\":1,\"progress\":0.5}}\n\n\
                    data: {\"id\":2,\"result\":{\"tools\":[]}}\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let (mut transport, mut events) = start(&server, None).await;
        transport
            .send(Bytes::from_static(b"{\"id\":2,\"method\":\"tools/list\"}\n"))
            .await
            .unwrap();

        let mut lines = Vec::new();
        while lines.len() < 2 {
            match events.recv().await {
                Some(TransportEvent::Line(line)) => lines.push(line),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(lines[0].contains("notifications/progress"));
        assert!(lines[1].contains("\"id\":2"));
    }

    #[tokio::test]
    async fn test_http_error_routed_to_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let (mut transport, mut events) = start(&server, None).await;
        transport
            .send(Bytes::from_static(b"{\"id\":9,\"method\":\"tools/call\"}\n"))
            .await
            .unwrap();

        match events.recv().await {
            Some(TransportEvent::RequestFailed { id, error }) => {
                assert_eq!(id, Some(RequestId::Number(9)));
                assert!(error.is_retryable());
                assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_deletes_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(202).insert_header(SESSION_HEADER, "session-9"),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(header(SESSION_HEADER, "session-9"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (mut transport, mut events) = start(&server, None).await;
        transport
            .send(Bytes::from_static(b"{\"method\":\"initialized\"}\n"))
            .await
            .unwrap();

        // Wait for the POST to land before stopping.
        for _ in 0..50 {
            if transport.session_id().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        transport.stop().await.unwrap();
        assert_matches!(events.recv().await, Some(TransportEvent::Exit(ExitReason::Stopped)));
        assert_matches!(
            transport.send(Bytes::from_static(b"{}\n")).await,
            Err(WireError::Transport(TransportError::NotConnected { .. }))
        );
    }
}
