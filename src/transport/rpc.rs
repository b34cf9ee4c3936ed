//! Lightweight RPC transport.
//!
//! JSON-RPC 1.0 over a persistent TCP connection, one JSON object per line:
//!
//! ```text
//! -> {"method":"RPCServer.LogInfo","params":[{"name":"event","data":"hello"}],"id":7}
//! <- {"id":7,"result":"Processed payload via RPC: event","error":null}
//! ```
//!
//! One connection is shared by all callers. Writes are serialized; a reader
//! task routes each reply to its caller by `id`, so interleaved calls are
//! never confused.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Outcome, Payload, Result, Transport, TransportError, TransportKind};
use crate::envelope::LogPayload;

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: [&'a LogPayload; 1],
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Value,
}

type Reply = std::result::Result<Value, TransportError>;

/// Calls awaiting a reply on one connection.
#[derive(Default)]
struct Pending {
    calls: HashMap<u64, oneshot::Sender<Reply>>,
    closed: bool,
}

type SharedPending = Arc<Mutex<Pending>>;

fn lock(pending: &SharedPending) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Lines waiting for the writer task.
const OUTBOX_CAPACITY: usize = 64;

/// One live TCP connection and its reply router.
///
/// Callers hand whole lines to a writer task, so a caller that is cancelled
/// mid-call can never leave a partial line on the shared stream.
struct Connection {
    outbox: mpsc::Sender<Vec<u8>>,
    pending: SharedPending,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn open(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        let pending = SharedPending::default();
        let (outbox, lines) = mpsc::channel(OUTBOX_CAPACITY);
        let reader = tokio::spawn(read_replies(read, pending.clone()));
        let writer = tokio::spawn(write_requests(write, lines, pending.clone()));
        Self {
            outbox,
            pending,
            reader,
            writer,
        }
    }

    fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }

    fn register(&self, id: u64) -> Result<oneshot::Receiver<Reply>> {
        let mut pending = lock(&self.pending);
        if pending.closed {
            return Err(TransportError::Unreachable("connection closed".to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.calls.insert(id, tx);
        Ok(rx)
    }

    /// Queue a line for the writer. Once queued the line is written whole,
    /// whether or not the caller is still waiting.
    async fn send(&self, line: Vec<u8>) -> Result<()> {
        self.outbox
            .send(line)
            .await
            .map_err(|_| TransportError::Unreachable("connection closed".to_string()))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_requests(
    mut write: OwnedWriteHalf,
    mut lines: mpsc::Receiver<Vec<u8>>,
    pending: SharedPending,
) {
    while let Some(line) = lines.recv().await {
        let written = match write.write_all(&line).await {
            Ok(()) => write.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let reason = format!("write failed: {}", e);
            warn!(error = %e, "RPC write failed");
            fail_all(&pending, &reason);
            return;
        }
    }
}

/// Removes a call's pending entry if the caller gives up (timeout or
/// cancellation) before its reply arrives.
struct PendingGuard<'a> {
    pending: &'a SharedPending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).calls.remove(&self.id);
    }
}

async fn read_replies(read: OwnedReadHalf, pending: SharedPending) {
    let mut lines = BufReader::new(read).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RpcResponse>(&line) {
                    Ok(response) => route_reply(&pending, response),
                    Err(e) => {
                        // Without an id the reply cannot be routed; the stream
                        // is no longer trustworthy.
                        warn!(error = %e, "Undecodable RPC reply");
                        break format!("undecodable reply: {}", e);
                    }
                }
            }
            Ok(None) => break "connection closed by peer".to_string(),
            Err(e) => break format!("read failed: {}", e),
        }
    };
    debug!(reason = %reason, "RPC reader stopped");
    fail_all(&pending, &reason);
}

fn route_reply(pending: &SharedPending, response: RpcResponse) {
    let Some(tx) = lock(pending).calls.remove(&response.id) else {
        debug!(id = response.id, "Reply for abandoned call");
        return;
    };
    let reply = match response.error {
        Value::Null => Ok(response.result),
        Value::String(message) => Err(TransportError::Application {
            message,
            status: None,
        }),
        other => Err(TransportError::Application {
            message: other.to_string(),
            status: None,
        }),
    };
    let _ = tx.send(reply);
}

fn fail_all(pending: &SharedPending, reason: &str) {
    let calls = {
        let mut pending = lock(pending);
        pending.closed = true;
        std::mem::take(&mut pending.calls)
    };
    for (_, tx) in calls {
        let _ = tx.send(Err(TransportError::Unreachable(reason.to_string())));
    }
}

/// JSON-RPC client for the logging capability.
pub struct RpcTransport {
    address: String,
    method: String,
    connect_timeout: Duration,
    next_id: AtomicU64,
    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
    /// Set once any connection has been established.
    connected_once: AtomicBool,
}

impl RpcTransport {
    pub fn new(address: &str, method: &str, connect_timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            method: method.to_string(),
            connect_timeout,
            next_id: AtomicU64::new(1),
            connection: tokio::sync::Mutex::new(None),
            connected_once: AtomicBool::new(false),
        }
    }

    /// Current connection, establishing one if there is none or the last
    /// one broke.
    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
        }
        *slot = None;

        let reconnecting = self.connected_once.load(Ordering::SeqCst);
        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(&self.address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.connect_error(reconnecting, e.to_string())),
            Err(_) => {
                return Err(self.connect_error(
                    reconnecting,
                    format!("connect timed out after {:?}", self.connect_timeout),
                ))
            }
        };
        let _ = stream.set_nodelay(true);

        if reconnecting {
            info!(address = %self.address, "Reconnected to RPC backend");
        } else {
            info!(address = %self.address, "Connected to RPC backend");
        }
        self.connected_once.store(true, Ordering::SeqCst);

        let conn = Arc::new(Connection::open(stream));
        *slot = Some(conn.clone());
        Ok(conn)
    }

    fn connect_error(&self, reconnecting: bool, detail: String) -> TransportError {
        let detail = format!("{}: {}", self.address, detail);
        if reconnecting {
            TransportError::Reconnect(detail)
        } else {
            TransportError::Unreachable(detail)
        }
    }

    async fn call(&self, entry: &LogPayload) -> Result<Value> {
        let conn = self.connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut line = serde_json::to_vec(&RpcRequest {
            method: &self.method,
            params: [entry],
            id,
        })
        .map_err(|e| TransportError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let reply = conn.register(id)?;
        let _guard = PendingGuard {
            pending: &conn.pending,
            id,
        };

        conn.send(line).await?;

        reply
            .await
            .map_err(|_| TransportError::Unreachable("connection closed".to_string()))?
    }
}

#[async_trait]
impl Transport for RpcTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rpc
    }

    async fn submit(&self, payload: Payload) -> Result<Outcome> {
        let entry = match payload {
            Payload::WriteLog(entry) => entry,
            other => {
                return Err(TransportError::Unsupported {
                    transport: TransportKind::Rpc,
                    payload: other.label(),
                })
            }
        };

        let result = self.call(&entry).await?;
        let message = match result {
            Value::String(s) if !s.is_empty() => s,
            _ => "logged".to_string(),
        };
        Ok(Outcome::message(message))
    }
}
