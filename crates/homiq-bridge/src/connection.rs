//! Per-connection I/O tasks
//!
//! Every accepted socket is split into two tasks. The reader de-frames
//! inbound bytes and forwards complete lines to the bridge actor in arrival
//! order, then hands the actor's responses to the writer. The writer drains
//! a queue of outbound wire frames, holding each one until it is due. The
//! actor owns all bookkeeping; the tasks only move bytes.

use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use chrono::{DateTime, Utc};
use homiq_protocol::FrameBuffer;
use serde::{Serialize, Serializer};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actor::BridgeCommand;

const READ_CHUNK: usize = 1024;

/// Connection identifier, unique for the life of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Snapshot of one open connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection id
    pub id: ConnectionId,
    /// Peer address
    pub remote_addr: String,
    /// Accept time
    pub connected_at: DateTime<Utc>,
    /// Last inbound data
    pub last_activity_at: DateTime<Utc>,
    /// Candidate frame lines received
    pub rx_count: u64,
    /// Frames written
    pub tx_count: u64,
}

impl ConnectionInfo {
    /// Fresh record for a just-accepted connection
    pub fn new(id: ConnectionId, remote_addr: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            remote_addr: remote_addr.into(),
            connected_at: now,
            last_activity_at: now,
            rx_count: 0,
            tx_count: 0,
        }
    }
}

/// Control messages for a connection's reader task
#[derive(Debug)]
pub enum ConnectionTaskCommand {
    /// Stop reading and close the connection
    Close,
}

/// One frame queued for writing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Wire bytes, CRLF terminated
    pub data: Vec<u8>,
    /// Earliest time the frame may be written
    pub due: Option<Instant>,
}

impl Outbound {
    /// Write as soon as possible
    pub fn immediate(data: Vec<u8>) -> Self {
        Self { data, due: None }
    }

    /// Write no earlier than `delay` from now
    pub fn delayed(data: Vec<u8>, delay: Option<Duration>) -> Self {
        Self {
            data,
            due: delay.map(|d| Instant::now() + d),
        }
    }
}

/// Enable TCP keepalive on an accepted socket
pub fn configure_keepalive(stream: &TcpStream, interval: Duration) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(interval);
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    let keepalive = keepalive.with_interval(interval);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Read loop for one connection
///
/// Runs until the peer closes, a read fails, the connection sits idle for
/// `idle_timeout`, the actor asks it to close, or the actor goes away.
/// Writes reported on `written_rx` count as activity too. Responses to each
/// chunk are handed to the writer before the next read, so a slow writer
/// holds back the peer rather than the actor. Always ends by unregistering
/// the connection.
pub async fn run_reader<R>(
    id: ConnectionId,
    mut reader: R,
    idle_timeout: Duration,
    actor_tx: mpsc::Sender<BridgeCommand>,
    writer_tx: mpsc::Sender<Outbound>,
    mut control_rx: mpsc::Receiver<ConnectionTaskCommand>,
    written_rx: watch::Receiver<Instant>,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut last_read = Instant::now();

    let reason = loop {
        let idle_deadline = last_read.max(*written_rx.borrow()) + idle_timeout;

        tokio::select! {
            cmd = control_rx.recv() => {
                match cmd {
                    Some(ConnectionTaskCommand::Close) | None => break "closed by server",
                }
            }

            _ = tokio::time::sleep_until(idle_deadline) => {
                if *written_rx.borrow() + idle_timeout > Instant::now() {
                    continue;
                }
                info!("Connection {} idle for {:?}, closing", id, idle_timeout);
                break "idle timeout";
            }

            result = reader.read(&mut chunk) => {
                match result {
                    Ok(0) => break "closed by peer",
                    Ok(n) => {
                        last_read = Instant::now();
                        let before = buffer.discarded();
                        let lines = buffer.push(&chunk[..n]);
                        let noise = buffer.discarded() - before;

                        let delivered = tokio::select! {
                            result = deliver(id, lines, noise, &actor_tx, &writer_tx) => result,
                            _ = control_rx.recv() => Err("closed by server"),
                        };
                        if let Err(reason) = delivered {
                            break reason;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::ConnectionReset => break "reset by peer",
                    Err(e) => {
                        warn!("Socket error on {}: {}", id, e);
                        break "socket error";
                    }
                }
            }
        }
    };

    debug!("Reader for {} stopped: {}", id, reason);
    let _ = actor_tx
        .send(BridgeCommand::UnregisterConnection { id, reason })
        .await;
}

/// Pass one chunk's lines to the actor and its responses to the writer
async fn deliver(
    id: ConnectionId,
    lines: Vec<String>,
    noise: u64,
    actor_tx: &mpsc::Sender<BridgeCommand>,
    writer_tx: &mpsc::Sender<Outbound>,
) -> Result<(), &'static str> {
    let (response, replies) = oneshot::channel();
    actor_tx
        .send(BridgeCommand::Inbound {
            id,
            lines,
            noise,
            response,
        })
        .await
        .map_err(|_| "bridge stopped")?;
    let replies = replies.await.map_err(|_| "bridge stopped")?;

    for outbound in replies {
        writer_tx
            .send(outbound)
            .await
            .map_err(|_| "writer stopped")?;
    }
    Ok(())
}

/// Write loop for one connection
///
/// Holds each frame until it is due, then writes it and reports the write
/// time on `written_tx`. Ends when every sender of `outbound_rx` is gone or
/// a write fails; then shuts down the write side so the peer sees EOF.
pub async fn run_writer<W>(
    id: ConnectionId,
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    written_tx: watch::Sender<Instant>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = outbound_rx.recv().await {
        if let Some(due) = outbound.due {
            tokio::time::sleep_until(due).await;
        }
        if let Err(e) = writer.write_all(&outbound.data).await {
            warn!("Write to {} failed: {}", id, e);
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!("Flush to {} failed: {}", id, e);
            break;
        }
        written_tx.send_replace(Instant::now());
    }

    let _ = writer.shutdown().await;
    debug!("Writer for {} stopped", id);
}
