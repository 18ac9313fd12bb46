//! Newline-delimited JSON framing.
//!
//! Every message on the wire is one compact JSON object followed by `\n`.
//! The pure functions here ([`encode`], [`decode`], [`parse_line`],
//! [`classify`]) hold no state; the stateful side lives in [`LineCodec`],
//! which the stdio transport plugs into `FramedRead`.
//!
//! Splitting is eager and strict: a line ends at `\n` and nowhere else, a
//! trailing `\r` is trimmed, blank lines are skipped, and whatever follows the
//! last `\n` stays buffered until more bytes arrive. Because of that, the
//! result of decoding a byte stream does not depend on how it was chunked.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::{ProtocolError, WireError, WireResult};
use crate::messages::{JsonRpcMessage, MessageKind};

/// Output of [`decode`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Messages from every complete line, in order
    pub messages: Vec<JsonRpcMessage>,
    /// Bytes after the last newline, to be passed back in on the next call
    pub buffer: Vec<u8>,
    /// Complete lines that were not JSON-RPC messages
    pub non_json_lines: Vec<String>,
}

/// Serialize a message as one line.
///
/// # Examples
///
/// ```rust
/// use agentwire_core::codec::encode;
/// use agentwire_core::messages::{JsonRpcMessage, JsonRpcNotification};
///
/// let line = encode(&JsonRpcNotification::without_params("initialized").into()).unwrap();
/// assert_eq!(&line[..], b"{\"method\":\"initialized\"}\n");
/// ```
pub fn encode(message: &JsonRpcMessage) -> WireResult<Bytes> {
    let mut dst = BytesMut::new();
    write_line(message, &mut dst)?;
    Ok(dst.freeze())
}

fn write_line(message: &JsonRpcMessage, dst: &mut BytesMut) -> WireResult<()> {
    let json = serde_json::to_vec(message)?;
    dst.reserve(json.len() + 1);
    dst.put_slice(&json);
    dst.put_u8(b'\n');
    Ok(())
}

/// Append `incoming` to `buffer` and decode every complete line.
pub fn decode(buffer: &[u8], incoming: &[u8]) -> Decoded {
    let mut pending = Vec::with_capacity(buffer.len() + incoming.len());
    pending.extend_from_slice(buffer);
    pending.extend_from_slice(incoming);

    let mut decoded = Decoded::default();
    let mut start = 0;

    while let Some(offset) = pending[start..].iter().position(|&b| b == b'\n') {
        let end = start + offset;
        if let Some(line) = line_text(&pending[start..end]) {
            match parse_line(&line) {
                Ok(message) => decoded.messages.push(message),
                Err(_) => decoded.non_json_lines.push(line),
            }
        }
        start = end + 1;
    }

    decoded.buffer = pending.split_off(start);
    decoded
}

/// Decode one line (without its terminator) into a message.
pub fn parse_line(line: &str) -> WireResult<JsonRpcMessage> {
    let value: Value =
        serde_json::from_str(line).map_err(|err| ProtocolError::InvalidMessage {
            reason: err.to_string(),
        })?;

    JsonRpcMessage::try_from(value)
        .map_err(|reason| WireError::Protocol(ProtocolError::InvalidMessage { reason }))
}

/// Classify a decoded JSON value by shape.
pub fn classify(value: &Value) -> Option<MessageKind> {
    MessageKind::of(value)
}

/// Strip the `\r` of a CRLF terminator; `None` for blank lines.
fn line_text(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(String::from_utf8_lossy(raw).into_owned())
}

/// Line splitter for `tokio_util` framed I/O.
///
/// Decodes to raw line text; JSON parsing is left to the connection so that a
/// malformed line is logged and skipped instead of ending the stream.
#[derive(Debug, Clone, Default)]
pub struct LineCodec {
    // Bytes already scanned for a newline
    next_index: usize,
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, WireError> {
        loop {
            let found = src[self.next_index..].iter().position(|&b| b == b'\n');
            let Some(offset) = found else {
                self.next_index = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if let Some(text) = line_text(&line[..line.len() - 1]) {
                return Ok(Some(text));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, WireError> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "Dropping partial line at end of stream");
            src.clear();
            self.next_index = 0;
        }
        Ok(None)
    }
}

impl Encoder<&JsonRpcMessage> for LineCodec {
    type Error = WireError;

    fn encode(&mut self, item: &JsonRpcMessage, dst: &mut BytesMut) -> Result<(), WireError> {
        write_line(item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
    use serde_json::json;

    fn sample_stream() -> Vec<u8> {
        let messages: Vec<JsonRpcMessage> = vec![
            JsonRpcResponse::success(0, json!({"serverInfo": {"name": "codex"}})).into(),
            JsonRpcNotification::new("turn/started", json!({"threadId": "t", "turn": {"id": "u"}}))
                .into(),
            JsonRpcRequest::new(5, "item/commandExecution/requestApproval", json!({"command": "ls"}))
                .into(),
        ];

        let mut stream = Vec::new();
        for message in &messages {
            stream.extend_from_slice(&encode(message).unwrap());
        }
        stream.extend_from_slice(b"not json at all\n");
        stream
    }

    #[test]
    fn test_decode_chunk_boundary_independence() {
        let stream = sample_stream();
        let whole = decode(&[], &stream);
        assert_eq!(whole.messages.len(), 3);
        assert_eq!(whole.non_json_lines, vec!["not json at all".to_string()]);
        assert!(whole.buffer.is_empty());

        for chunk_size in [1, 2, 3, 7, 13, 64] {
            let mut buffer = Vec::new();
            let mut messages = Vec::new();
            let mut non_json = Vec::new();

            for chunk in stream.chunks(chunk_size) {
                let step = decode(&buffer, chunk);
                messages.extend(step.messages);
                non_json.extend(step.non_json_lines);
                buffer = step.buffer;
            }

            assert_eq!(messages, whole.messages, "chunk size {chunk_size}");
            assert_eq!(non_json, whole.non_json_lines, "chunk size {chunk_size}");
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_decode_retains_partial_line() {
        let step = decode(b"", b"{\"id\":1,\"result\":{}}\n{\"id\":2,");
        assert_eq!(step.messages.len(), 1);
        assert_eq!(step.buffer, b"{\"id\":2,".to_vec());

        let step = decode(&step.buffer, b"\"result\":7}\n");
        assert_eq!(
            step.messages,
            vec![JsonRpcMessage::Response(JsonRpcResponse::success(2, json!(7)))]
        );
    }

    #[test]
    fn test_decode_trims_crlf_and_skips_blank_lines() {
        let step = decode(b"", b"\r\n\n{\"method\":\"initialized\"}\r\n   \n");
        assert_eq!(step.messages.len(), 1);
        assert!(step.non_json_lines.is_empty());
    }

    #[test]
    fn test_decode_routes_non_messages() {
        let step = decode(b"", b"[1,2]\n42\n{\"id\":3}\n{broken\n");
        assert!(step.messages.is_empty());
        assert_eq!(step.non_json_lines.len(), 4);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let message: JsonRpcMessage =
            JsonRpcRequest::new(9, "tools/call", json!({"name": "echo", "arguments": {"x": "a\nb"}}))
                .with_version()
                .into();

        let line = encode(&message).unwrap();
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
        assert!(line.ends_with(b"\n"));

        let decoded = decode(&[], &line);
        assert_eq!(decoded.messages, vec![message]);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&json!({"id": 1, "method": "x"})), Some(MessageKind::Request));
        assert_eq!(classify(&json!("x")), None);
    }

    #[test]
    fn test_line_codec_split() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\":1}\r\n\n{\"b\""[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"a\":1}".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b":2}\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"b\":2}".to_string()));
    }

    #[test]
    fn test_line_codec_drops_partial_line_at_eof() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\":1}\n{\"trunc"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("{\"a\":1}".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_codec_encoder() {
        let mut codec = LineCodec::new();
        let mut dst = BytesMut::new();
        let message: JsonRpcMessage = JsonRpcNotification::without_params("initialized").into();

        codec.encode(&message, &mut dst).unwrap();
        assert_eq!(&dst[..], b"{\"method\":\"initialized\"}\n");
    }
}
