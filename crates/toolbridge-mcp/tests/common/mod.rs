//! In-memory tool server for driving a session from the other end of a pipe.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use toolbridge_mcp::{BridgeSession, SessionConfig, StdioTransport};

pub struct FakeServer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    /// Next message the bridge wrote, parsed.
    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("bridge wrote nothing")
            .expect("read failed")
            .expect("bridge closed its output");
        serde_json::from_str(&line).expect("bridge wrote invalid JSON")
    }

    /// True when nothing arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.lines.next_line()).await.is_err()
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    pub async fn reply(&mut self, id: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await;
    }

    pub async fn reply_error(&mut self, id: &Value, code: i32, message: &str) {
        let error = json!({"code": code, "message": message});
        self.send(json!({"jsonrpc": "2.0", "id": id, "error": error}))
            .await;
    }

    /// Answer `initialize`, swallow `notifications/initialized`, answer `tools/list`.
    pub async fn serve_handshake(&mut self, tools: Value) {
        let init = self.recv().await;
        assert_eq!(init["method"], "initialize");
        self.reply(
            &init["id"],
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fake", "version": "0.0.1"}
            }),
        )
        .await;

        let initialized = self.recv().await;
        assert_eq!(initialized["method"], "notifications/initialized");
        assert!(initialized.get("id").is_none());

        let list = self.recv().await;
        assert_eq!(list["method"], "tools/list");
        self.reply(&list["id"], json!({ "tools": tools })).await;
    }

    /// Close both directions, as if the server exited.
    pub async fn hang_up(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

pub fn subnet_tools() -> Value {
    json!([
        {
            "name": "subnet_calculator",
            "description": "Calculate subnet details for a given CIDR",
            "inputSchema": {
                "type": "object",
                "properties": {"cidr": {"type": "string"}},
                "required": ["cidr"]
            }
        },
        {"name": "pyats_list_devices", "description": "List testbed devices"}
    ])
}

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        handshake_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        tool_call_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    }
}

/// A session wired to a [`FakeServer`], still in `Handshaking`.
pub fn connect(config: SessionConfig) -> (BridgeSession, FakeServer) {
    let (bridge_side, server_side) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(bridge_side);
    let transport = StdioTransport::from_streams("fake", reader, writer);
    let session = BridgeSession::from_transport(Arc::new(transport), "fake", config);

    let (server_reader, server_writer) = tokio::io::split(server_side);
    let server = FakeServer {
        lines: BufReader::new(server_reader).lines(),
        writer: server_writer,
    };
    (session, server)
}

/// A session that has completed the handshake and discovered [`subnet_tools`].
pub async fn ready(config: SessionConfig) -> (BridgeSession, FakeServer) {
    let (mut session, mut server) = connect(config);
    let (init, ()) = tokio::join!(
        async {
            session.initialize().await?;
            session.list_tools().await.map(|_| ())
        },
        server.serve_handshake(subnet_tools())
    );
    init.expect("handshake failed");
    (session, server)
}
