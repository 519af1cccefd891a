//! End-to-end tests over a real socket.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blitz_core::{
    CommandExecutor, ExecutionError, Invocation, MediaSnapshot, PlaybackStatus, ServerMessage,
    Snapshot, SnapshotKind, SnapshotSource, SourceError,
};
use blitz_server::config::ServerConfig;
use blitz_server::dispatch::{CommandDispatcher, CommandTable};
use blitz_server::server::BlitzServer;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<Invocation>>,
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<(), ExecutionError> {
        self.calls.lock().push(invocation.clone());
        Ok(())
    }
}

struct StaticMedia;

#[async_trait]
impl SnapshotSource for StaticMedia {
    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Media
    }

    async fn poll(&self) -> Result<Snapshot, SourceError> {
        Ok(Snapshot::Media(MediaSnapshot {
            title: "Integration".into(),
            status: PlaybackStatus::Playing,
            ..MediaSnapshot::default()
        }))
    }
}

struct Harness {
    server: BlitzServer,
    addr: SocketAddr,
    executor: Arc<RecordingExecutor>,
}

async fn start() -> Harness {
    start_with(ServerConfig::default().max_connections).await
}

async fn start_with(max_connections: usize) -> Harness {
    let executor = Arc::new(RecordingExecutor::default());
    let apps = BTreeMap::from([("open_firefox".to_owned(), vec!["firefox".to_owned()])]);
    let dispatcher = CommandDispatcher::new(
        CommandTable::new(&apps),
        Arc::clone(&executor) as Arc<dyn CommandExecutor>,
        Duration::from_secs(5),
    )
    .with_media_source(Arc::new(StaticMedia));
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        static_dir: None,
        max_connections,
        ..ServerConfig::default()
    };
    let server = BlitzServer::new(config, dispatcher);
    let (addr, _handle) = server.listen().await.unwrap();
    Harness {
        server,
        addr,
        executor,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _resp) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("transport error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(ws: &mut Client, text: &str) {
    ws.send(Message::text(text.to_owned())).await.unwrap();
}

async fn connect_welcomed(addr: SocketAddr) -> (Client, String) {
    let mut ws = connect(addr).await;
    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["status"], "success");
    assert_eq!(welcome["message"], "connected");
    let id = welcome["data"]["clientId"].as_str().unwrap().to_owned();
    (ws, id)
}

// ── Lifecycle ──

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_upgrades_respect_connection_limit() {
    let h = start_with(2).await;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let url = format!("ws://{}/ws", h.addr);
            tokio::spawn(async move { connect_async(url).await })
        })
        .collect();

    let mut open = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok((ws, _resp)) => open.push(ws),
            Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
                assert_eq!(resp.status().as_u16(), 503);
                rejected += 1;
            }
            Err(e) => panic!("unexpected handshake error: {e}"),
        }
    }
    assert_eq!(open.len(), 2);
    assert_eq!(rejected, 6);

    for ws in &mut open {
        let _ = next_json(ws).await;
    }
    assert_eq!(h.server.hub().count().await, 2);
    assert_eq!(h.server.connection_slots().in_use(), 2);
}

#[tokio::test]
async fn welcome_carries_client_id() {
    let h = start().await;
    let (_ws, id) = connect_welcomed(h.addr).await;
    assert!(id.starts_with("127.0.0.1:"), "{id}");
    assert_eq!(h.server.hub().count().await, 1);
}

#[tokio::test]
async fn client_ids_are_unique() {
    let h = start().await;
    let (_a, id_a) = connect_welcomed(h.addr).await;
    let (_b, id_b) = connect_welcomed(h.addr).await;
    assert_ne!(id_a, id_b);
    assert_eq!(h.server.hub().count().await, 2);
}

#[tokio::test]
async fn close_unregisters_session() {
    let h = start().await;
    let (mut ws, _id) = connect_welcomed(h.addr).await;
    ws.close(None).await.unwrap();

    let hub = Arc::clone(h.server.hub());
    tokio::time::timeout(Duration::from_secs(5), async move {
        while hub.count().await != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

// ── Commands ──

#[tokio::test]
async fn ping_gets_pong() {
    let h = start().await;
    let (mut ws, _id) = connect_welcomed(h.addr).await;
    send(&mut ws, r#"{"command":"ping"}"#).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["message"], "pong");
    assert_eq!(reply["data"]["server"], "Blitz WebSocket");
}

#[tokio::test]
async fn unknown_command_is_rejected() {
    let h = start().await;
    let (mut ws, _id) = connect_welcomed(h.addr).await;
    send(&mut ws, r#"{"command":"rm -rf /"}"#).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], "unknown command: rm -rf /");
    assert!(h.executor.calls.lock().is_empty());
}

#[tokio::test]
async fn malformed_frame_keeps_session_open() {
    let h = start().await;
    let (mut ws, _id) = connect_welcomed(h.addr).await;
    send(&mut ws, "{not json").await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["status"], "error");

    send(&mut ws, r#"{"command":"ping"}"#).await;
    assert_eq!(next_json(&mut ws).await["message"], "pong");
}

#[tokio::test]
async fn player_command_runs_executor() {
    let h = start().await;
    let (mut ws, _id) = connect_welcomed(h.addr).await;
    send(&mut ws, r#"{"command":"play-pause"}"#).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["command"], "play-pause");
    assert_eq!(
        *h.executor.calls.lock(),
        vec![Invocation::wait("playerctl", ["play-pause"])]
    );
}

#[tokio::test]
async fn binary_utf8_frames_are_commands() {
    let h = start().await;
    let (mut ws, _id) = connect_welcomed(h.addr).await;
    ws.send(Message::binary(br#"{"command":"ping"}"#.to_vec()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["message"], "pong");
}

#[tokio::test]
async fn player_info_replies_only_to_requester() {
    let h = start().await;
    let (mut a, _) = connect_welcomed(h.addr).await;
    let (mut b, _) = connect_welcomed(h.addr).await;

    send(&mut a, r#"{"command":"player_info"}"#).await;
    let reply = next_json(&mut a).await;
    assert_eq!(reply["status"], "player");
    assert_eq!(reply["data"]["title"], "Integration");

    // b sees nothing until a broadcast arrives.
    let _ = h
        .server
        .hub()
        .broadcast(ServerMessage::success("marker"))
        .await;
    assert_eq!(next_json(&mut b).await["command"], "marker");
}

// ── Broadcast ──

#[tokio::test]
async fn broadcast_reaches_every_client() {
    let h = start().await;
    let (mut a, _) = connect_welcomed(h.addr).await;
    let (mut b, _) = connect_welcomed(h.addr).await;

    let snapshot = Snapshot::Media(MediaSnapshot {
        title: "Shared".into(),
        ..MediaSnapshot::default()
    });
    let delivered = h.server.hub().broadcast(snapshot.to_message()).await;
    assert_eq!(delivered, 2);

    for ws in [&mut a, &mut b] {
        let msg = next_json(ws).await;
        assert_eq!(msg["status"], "player");
        assert_eq!(msg["data"]["title"], "Shared");
    }
}

// ── HTTP ──

#[tokio::test]
async fn health_over_http() {
    let h = start().await;
    let (_ws, _id) = connect_welcomed(h.addr).await;

    let resp = reqwest::get(format!("http://{}/health", h.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let h = start().await;
    let (mut ws, _id) = connect_welcomed(h.addr).await;
    h.server.shutdown().shutdown();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());
    assert_eq!(h.server.hub().count().await, 0);
}
