//! End-to-end RPC tests: a real daemon on a temp repository, served over
//! the unix socket and the loopback WebSocket.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use thrum_rpc::RpcServer;
use thrum_runtime::{Config, Daemon, ThrumPaths};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio_tungstenite::tungstenite::Message;

struct TestServer {
    _dir: TempDir,
    daemon: Arc<Daemon>,
    socket_path: std::path::PathBuf,
    ws_addr: std::net::SocketAddr,
}

async fn start_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let status = Command::new("git")
        .current_dir(dir.path())
        .args(["init", "--quiet"])
        .status()
        .unwrap();
    assert!(status.success());

    // Port 0: the OS picks, the server reports.
    let paths = ThrumPaths::resolve(dir.path()).unwrap();
    let config = Config {
        listen_port: Some(0),
        ..Default::default()
    };
    config.save_to(&paths.config_path()).unwrap();

    let daemon = Daemon::open(dir.path()).unwrap();
    let server = RpcServer::bind(daemon.clone()).await.unwrap();
    let ws_addr = server.ws_addr().unwrap();
    let socket_path = daemon.paths().socket_path();
    tokio::spawn(server.run());

    TestServer {
        _dir: dir,
        daemon,
        socket_path,
        ws_addr,
    }
}

struct UnixClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
    next_id: u64,
}

impl UnixClient {
    async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
            next_id: 0,
        }
    }

    /// Send one request and read frames until its response arrives,
    /// ignoring interleaved notifications.
    async fn call(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id;
        let frame = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.write
            .write_all(format!("{}\n", frame).as_bytes())
            .await
            .unwrap();

        loop {
            let line = self.lines.next_line().await.unwrap().expect("connection open");
            let value: Value = serde_json::from_str(&line).unwrap();
            if value.get("id").and_then(Value::as_u64) == Some(id) {
                return value;
            }
        }
    }

    /// Read frames until a server push (no id) arrives.
    async fn next_notification(&mut self) -> Value {
        loop {
            let line = self.lines.next_line().await.unwrap().expect("connection open");
            let value: Value = serde_json::from_str(&line).unwrap();
            if value.get("id").is_none() {
                return value;
            }
        }
    }

    async fn send_raw(&mut self, raw: &str) -> Value {
        self.write
            .write_all(format!("{}\n", raw).as_bytes())
            .await
            .unwrap();
        let line = self.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

fn register_params(agent_id: &str, role: &str) -> Value {
    json!({"agent_id": agent_id, "role": role, "module": "main"})
}

#[tokio::test]
async fn test_register_send_list_over_unix_socket() {
    let server = start_server().await;
    let mut alice = UnixClient::connect(&server.socket_path).await;
    let mut bob = UnixClient::connect(&server.socket_path).await;

    let response = alice
        .call("agent.register", register_params("alice", "implementer"))
        .await;
    assert_eq!(response["result"]["agent"]["agent_id"], "alice");
    assert!(response["result"]["session_id"].is_string());

    bob.call("agent.register", register_params("bob", "reviewer"))
        .await;

    let response = alice
        .call(
            "message.send",
            json!({
                "content": "hi",
                "scopes": [{"type": "project", "value": "thrum"}],
                "refs": [{"type": "agent", "value": "bob"}],
            }),
        )
        .await;
    let message_id = response["result"]["message_id"].as_str().unwrap().to_string();
    assert_eq!(response["result"]["thread_id"], message_id.as_str());

    let response = bob.call("message.list", json!({"agent_id": "bob"})).await;
    let messages = response["result"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "hi");
    assert_eq!(messages[0]["scopes"][0]["value"], "thrum");

    // Read receipt drops bob's unread count to zero.
    bob.call("message.mark_read", json!({"message_id": message_id}))
        .await;
    let response = bob.call("team.list", json!({})).await;
    let members = response["result"]["members"].as_array().unwrap();
    let bob_row = members
        .iter()
        .find(|m| m["agent"]["agent_id"] == "bob")
        .unwrap();
    assert_eq!(bob_row["unread_count"], 0);
}

#[tokio::test]
async fn test_subscription_push_reaches_live_client() {
    let server = start_server().await;
    let mut alice = UnixClient::connect(&server.socket_path).await;
    let mut bob = UnixClient::connect(&server.socket_path).await;

    alice
        .call("agent.register", register_params("alice", "implementer"))
        .await;
    bob.call("agent.register", register_params("bob", "reviewer"))
        .await;
    let response = bob
        .call("subscribe.create", json!({"filter_type": "all"}))
        .await;
    assert!(response["result"]["subscription_id"].is_string());

    alice
        .call("message.send", json!({"content": "@bob heads up"}))
        .await;

    let push = bob.next_notification().await;
    assert_eq!(push["method"], "subscription.event");
    assert_eq!(push["params"]["event"]["actor_id"], "alice");
    assert_eq!(push["params"]["event"]["kind"], "message.create");
}

#[tokio::test]
async fn test_websocket_transport() {
    let server = start_server().await;
    let url = format!("ws://{}", server.ws_addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    ws.send(Message::Text(
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "agent.register",
            "params": register_params("carol", "coordinator"),
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let response: Value = loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => break serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    };
    assert_eq!(response["result"]["agent"]["agent_id"], "carol");

    ws.send(Message::Text(
        json!({"jsonrpc": "2.0", "id": 2, "method": "health.get"}).to_string(),
    ))
    .await
    .unwrap();
    let response: Value = loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => break serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    };
    assert_eq!(response["result"]["status"], "ok");
}

#[tokio::test]
async fn test_error_codes() {
    let server = start_server().await;
    let mut client = UnixClient::connect(&server.socket_path).await;

    // Unbound connection may not send.
    let response = client.call("message.send", json!({"content": "x"})).await;
    assert_eq!(response["error"]["code"], -32005);

    // Unknown method.
    let response = client.call("no.such.method", json!({})).await;
    assert_eq!(response["error"]["code"], -32601);

    // Parse error.
    let response = client.send_raw("{this is not json").await;
    assert_eq!(response["error"]["code"], -32700);

    // Wrong jsonrpc version.
    let response = client
        .send_raw(r#"{"jsonrpc":"1.0","id":9,"method":"health.get"}"#)
        .await;
    assert_eq!(response["error"]["code"], -32600);

    // Invalid params.
    client
        .call("agent.register", register_params("dave", "implementer"))
        .await;
    let response = client.call("message.edit", json!({"content": 7})).await;
    assert_eq!(response["error"]["code"], -32602);

    // Application error: editing a missing message.
    let response = client
        .call(
            "message.edit",
            json!({"message_id": "01ARZ3NDEKTSV4RRFFQ69G5FAV", "content": "x"}),
        )
        .await;
    assert_eq!(response["error"]["code"], -32002);
}

#[tokio::test]
async fn test_disconnect_ends_bound_session() {
    let server = start_server().await;

    {
        let mut alice = UnixClient::connect(&server.socket_path).await;
        alice
            .call("agent.register", register_params("alice", "implementer"))
            .await;
        // Dropping the client closes the connection.
    }

    // Give the server a moment to run disconnect cleanup.
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let team = server.daemon.team_list().unwrap();
        let alice = team.iter().find(|m| m.agent.agent_id == "alice");
        if alice.is_some_and(|m| m.session.is_none()) {
            return;
        }
    }
    panic!("session was not ended on disconnect");
}

#[tokio::test]
async fn test_wait_over_rpc_times_out_with_sentinel() {
    let server = start_server().await;
    let mut client = UnixClient::connect(&server.socket_path).await;
    client
        .call("agent.register", register_params("alice", "implementer"))
        .await;

    let response = client
        .call(
            "wait",
            json!({"filter_type": "mention", "selector": "alice", "timeout_ms": 200}),
        )
        .await;
    assert_eq!(response["result"]["timed_out"], true);
}
