use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use thrum_runtime::Daemon;
use thrum_types::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::methods::{ConnState, MethodError, dispatch, on_disconnect};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Default per-request deadline. `wait` manages its own timeout and is
/// exempt.
const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// The daemon's RPC front: a unix socket for local clients, plus an
/// optional loopback WebSocket listener for remote/browser clients.
pub struct RpcServer {
    daemon: Arc<Daemon>,
    unix: UnixListener,
    ws: Option<TcpListener>,
}

impl RpcServer {
    pub async fn bind(daemon: Arc<Daemon>) -> Result<Self> {
        let socket_path = daemon.paths().socket_path();
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A stale socket from a dead daemon blocks bind.
        let _ = std::fs::remove_file(&socket_path);
        let unix = UnixListener::bind(&socket_path)?;
        info!(path = %socket_path.display(), "rpc: unix socket listening");

        let ws = match daemon.config().listen_port {
            Some(port) => {
                let listener = TcpListener::bind(("127.0.0.1", port)).await?;
                info!(addr = %listener.local_addr()?, "rpc: websocket listening");
                Some(listener)
            }
            None => None,
        };

        Ok(Self { daemon, unix, ws })
    }

    /// Actual WebSocket address (useful when the configured port is 0).
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Accept loop; runs until the process shuts down.
    pub async fn run(self) -> Result<()> {
        let RpcServer { daemon, unix, ws } = self;

        match ws {
            Some(ws) => loop {
                tokio::select! {
                    accepted = unix.accept() => {
                        let (stream, _) = accepted?;
                        tokio::spawn(handle_unix(daemon.clone(), stream));
                    }
                    accepted = ws.accept() => {
                        let (stream, _) = accepted?;
                        tokio::spawn(handle_ws(daemon.clone(), stream));
                    }
                }
            },
            None => loop {
                let (stream, _) = unix.accept().await?;
                tokio::spawn(handle_unix(daemon.clone(), stream));
            },
        }
    }
}

/// One frame in, at most one response frame out. Notifications (no id)
/// are processed but never answered.
async fn process_frame(
    daemon: &Arc<Daemon>,
    conn: &mut ConnState,
    outgoing: &mpsc::UnboundedSender<String>,
    text: &str,
) -> Option<String> {
    let request: JsonRpcRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            return Some(
                JsonRpcResponse::err(Value::Null, -32700, format!("Parse error: {}", err))
                    .to_frame(),
            );
        }
    };

    if request.jsonrpc != "2.0" {
        let id = request.id.unwrap_or(Value::Null);
        return Some(
            JsonRpcResponse::err(id, -32600, "Invalid request: jsonrpc must be \"2.0\"")
                .to_frame(),
        );
    }

    let is_wait = request.method == "wait";
    let outcome = if is_wait {
        dispatch(daemon, conn, outgoing, &request.method, request.params).await
    } else {
        match tokio::time::timeout(
            REQUEST_DEADLINE,
            dispatch(daemon, conn, outgoing, &request.method, request.params),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(MethodError::App(Error::Timeout(format!(
                "{} exceeded the {}s deadline",
                request.method,
                REQUEST_DEADLINE.as_secs()
            )))),
        }
    };

    let id = request.id?;
    Some(match outcome {
        Ok(result) => JsonRpcResponse::ok(id, result).to_frame(),
        Err(err) => JsonRpcResponse::err(id, err.code(), err.message()).to_frame(),
    })
}

async fn handle_unix(daemon: Arc<Daemon>, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Single writer per connection; responses and subscription pushes
    // interleave here, one object per line.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_half.write_all(frame.as_bytes()).await.is_err()
                || write_half.write_all(b"\n").await.is_err()
            {
                break;
            }
        }
    });

    let mut conn = ConnState::default();
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(frame) = process_frame(&daemon, &mut conn, &tx, &line).await {
                    let _ = tx.send(frame);
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "rpc: unix read error");
                break;
            }
        }
    }

    on_disconnect(&daemon, &mut conn).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_ws(daemon: Arc<Daemon>, stream: TcpStream) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(%err, "rpc: websocket handshake failed");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnState::default();
    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(frame) = process_frame(&daemon, &mut conn, &tx, &text).await {
                    let _ = tx.send(frame);
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    on_disconnect(&daemon, &mut conn).await;
    drop(tx);
    let _ = writer.await;
}
