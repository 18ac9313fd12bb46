//! Stdio transport for local subprocess communication.
//!
//! The transport spawns the configured command and runs four tasks:
//!
//! - a **writer** draining an outbound queue into stdin; dropping the queue
//!   closes stdin
//! - a **reader** splitting stdout into lines with [`LineCodec`]
//! - a **stderr pump** forwarding diagnostic output
//! - a **supervisor** owning the child, which waits for it to exit (or for a
//!   stop request), waits for the reader to drain, then emits `Exit`
//!
//! Because the supervisor only emits `Exit` after the reader has finished,
//! every line the process wrote is delivered first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{BytesCodec, FramedRead};

use super::{
    EventReceiver, EventSender, ExitReason, StdioConfig, Transport, TransportEvent, TransportInfo,
    TransportStats,
};
use crate::codec::LineCodec;
use crate::error::{TransportError, WireResult};

const TRANSPORT_TYPE: &str = "stdio";

/// Stdio transport for a local process.
#[derive(Debug)]
pub struct StdioTransport {
    config: StdioConfig,
    info: TransportInfo,
    stats: Arc<TransportStats>,
    exited: Arc<AtomicBool>,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    shutdown: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl StdioTransport {
    /// Spawn the process and start its I/O tasks.
    ///
    /// Returns the transport together with the receiver of its events.
    pub async fn spawn(config: StdioConfig) -> WireResult<(Self, EventReceiver)> {
        config.validate()?;

        tracing::debug!("Spawning process: {} {:?}", config.command, config.args);

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref working_dir) = config.working_dir {
            command.current_dir(working_dir);
        }

        for (key, value) in &config.environment {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| spawn_failed(format!(
            "Failed to spawn '{}': {}",
            config.command, e
        )))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_failed("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_failed("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_failed("Failed to get stderr".to_string()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let stats = Arc::new(TransportStats::default());
        let exited = Arc::new(AtomicBool::new(false));

        let mut info = TransportInfo::new(TRANSPORT_TYPE);
        info.mark_connected();
        info.add_metadata("command", serde_json::json!(config.command));
        info.add_metadata("args", serde_json::json!(config.args));
        info.add_metadata("process_id", serde_json::json!(child.id()));

        tokio::spawn(write_stdin(stdin, outbound_rx, stats.clone()));
        tokio::spawn(pump_stderr(stderr, events_tx.clone()));
        let reader = tokio::spawn(read_stdout(stdout, events_tx.clone(), stats.clone()));
        let supervisor = tokio::spawn(supervise(
            child,
            reader,
            shutdown_rx,
            config.shutdown_grace,
            events_tx,
            exited.clone(),
        ));

        tracing::info!(pid = ?info.metadata.get("process_id"), "Stdio transport started");

        Ok((
            Self {
                config,
                info,
                stats,
                exited,
                outbound: Some(outbound_tx),
                shutdown: Some(shutdown_tx),
                supervisor: Some(supervisor),
            },
            events_rx,
        ))
    }
}

fn spawn_failed(reason: String) -> TransportError {
    TransportError::SpawnFailed {
        transport_type: TRANSPORT_TYPE.to_string(),
        reason,
    }
}

async fn write_stdin(
    mut stdin: ChildStdin,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    stats: Arc<TransportStats>,
) {
    while let Some(line) = outbound.recv().await {
        tracing::debug!("Sending to stdin: {}", String::from_utf8_lossy(&line).trim_end());

        if let Err(e) = stdin.write_all(&line).await {
            tracing::warn!("Failed to write to stdin: {}", e);
            stats.record_error();
            break;
        }
        if let Err(e) = stdin.flush().await {
            tracing::warn!("Failed to flush stdin: {}", e);
            stats.record_error();
            break;
        }
    }
    tracing::debug!("Stdin writer task finished");
}

async fn read_stdout(stdout: ChildStdout, events: EventSender, stats: Arc<TransportStats>) {
    let mut lines = FramedRead::new(stdout, LineCodec::new());

    while let Some(next) = lines.next().await {
        match next {
            Ok(line) => {
                stats.record_received();
                if events.send(TransportEvent::Line(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Error reading from stdout: {}", e);
                stats.record_error();
                break;
            }
        }
    }
    tracing::debug!("Stdout reader task finished");
}

async fn pump_stderr(stderr: ChildStderr, events: EventSender) {
    let mut chunks = FramedRead::new(stderr, BytesCodec::new());

    while let Some(Ok(chunk)) = chunks.next().await {
        tracing::debug!("process stderr: {}", String::from_utf8_lossy(&chunk).trim_end());
        if events.send(TransportEvent::Stderr(chunk.freeze())).is_err() {
            break;
        }
    }
}

async fn supervise(
    mut child: Child,
    reader: JoinHandle<()>,
    mut shutdown: oneshot::Receiver<()>,
    grace: Duration,
    events: EventSender,
    exited: Arc<AtomicBool>,
) {
    // Fires on an explicit stop or when the transport is dropped; stdin is
    // already closed at that point.
    let exited_early = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut shutdown => None,
    };

    let stopped = exited_early.is_none();
    let status = match exited_early {
        Some(status) => status,
        None => match timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!("Process did not exit within {:?}, killing it", grace);
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to kill child process: {}", e);
                }
                child.wait().await
            }
        },
    };

    // A grandchild may still hold stdout open; do not wait on it forever.
    if timeout(grace, reader).await.is_err() {
        tracing::debug!("Stdout still open after process exit, abandoning reader");
    }

    exited.store(true, Ordering::SeqCst);

    let reason = match status {
        _ if stopped => ExitReason::Stopped,
        Ok(status) => ExitReason::Exited {
            code: status.code(),
        },
        Err(e) => ExitReason::Failed {
            reason: e.to_string(),
        },
    };

    tracing::info!("Stdio transport ended: {}", reason);
    let _ = events.send(TransportEvent::Exit(reason));
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, line: Bytes) -> WireResult<()> {
        let not_connected = |reason: &str| TransportError::NotConnected {
            transport_type: TRANSPORT_TYPE.to_string(),
            reason: reason.to_string(),
        };

        if self.exited.load(Ordering::SeqCst) {
            return Err(not_connected("process has exited").into());
        }

        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| not_connected("transport stopped"))?;

        let len = line.len();
        outbound
            .send(line)
            .map_err(|_| not_connected("stdin is closed"))?;
        self.stats.record_sent(len);
        Ok(())
    }

    async fn stop(&mut self) -> WireResult<()> {
        let Some(supervisor) = self.supervisor.take() else {
            return Ok(());
        };

        tracing::info!("Stopping stdio transport");

        // Closing the queue ends the writer, which closes stdin.
        self.outbound = None;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Err(e) = supervisor.await {
            tracing::warn!("Stdio supervisor task failed: {}", e);
        }

        self.info.mark_disconnected();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.outbound.is_some() && !self.exited.load(Ordering::SeqCst)
    }

    fn get_info(&self) -> TransportInfo {
        let mut info = self.info.clone();
        info.connected = self.is_connected();
        self.stats.fill(&mut info);
        info.add_metadata("timeout", serde_json::json!(self.config.timeout.as_secs()));
        info.add_metadata(
            "environment_vars",
            serde_json::json!(self.config.environment.len()),
        );
        info
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::WireError;
    use assert_matches::assert_matches;

    fn shell(script: &str) -> StdioConfig {
        StdioConfig::new("sh")
            .arg("-c")
            .arg(script)
            .shutdown_grace(Duration::from_secs(2))
    }

    async fn collect(events: &mut EventReceiver) -> (Vec<String>, ExitReason) {
        let mut lines = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Line(line) => lines.push(line),
                TransportEvent::Exit(reason) => return (lines, reason),
                _ => {}
            }
        }
        panic!("event stream ended without Exit");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = StdioTransport::spawn(StdioConfig::new("nonexistent_command_12345")).await;
        assert_matches!(
            result,
            Err(WireError::Transport(TransportError::SpawnFailed { .. }))
        );
    }

    #[tokio::test]
    async fn test_lines_delivered_before_exit() {
        let (_transport, mut events) =
            StdioTransport::spawn(shell("printf 'one\\ntwo\\npartial'; exit 3"))
                .await
                .unwrap();

        let (lines, reason) = collect(&mut events).await;
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(reason, ExitReason::Exited { code: Some(3) });
    }

    #[tokio::test]
    async fn test_echo_round_trip_and_stop() {
        let (mut transport, mut events) = StdioTransport::spawn(shell("cat")).await.unwrap();
        assert!(transport.is_connected());

        transport
            .send(Bytes::from_static(b"{\"method\":\"ping\"}\n"))
            .await
            .unwrap();

        match events.recv().await {
            Some(TransportEvent::Line(line)) => assert_eq!(line, "{\"method\":\"ping\"}"),
            other => panic!("unexpected event: {other:?}"),
        }

        transport.stop().await.unwrap();
        let (_, reason) = collect(&mut events).await;
        assert_eq!(reason, ExitReason::Stopped);

        assert!(!transport.is_connected());
        assert_matches!(
            transport.send(Bytes::from_static(b"{}\n")).await,
            Err(WireError::Transport(TransportError::NotConnected { .. }))
        );

        // Idempotent
        transport.stop().await.unwrap();
        assert_eq!(transport.get_info().lines_sent, 1);
    }

    #[tokio::test]
    async fn test_send_fails_fast_after_exit() {
        let (mut transport, mut events) = StdioTransport::spawn(shell("exit 0")).await.unwrap();
        let (_, reason) = collect(&mut events).await;
        assert_eq!(reason, ExitReason::Exited { code: Some(0) });

        assert_matches!(
            transport.send(Bytes::from_static(b"{}\n")).await,
            Err(WireError::Transport(TransportError::NotConnected { .. }))
        );
    }

    #[tokio::test]
    async fn test_stop_kills_process_ignoring_stdin() {
        let config = shell("trap '' TERM; sleep 30").shutdown_grace(Duration::from_millis(100));
        let (mut transport, mut events) = StdioTransport::spawn(config).await.unwrap();

        transport.stop().await.unwrap();
        let (_, reason) = collect(&mut events).await;
        assert_eq!(reason, ExitReason::Stopped);
    }
}
