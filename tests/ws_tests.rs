//! Live-channel tests: initial snapshot and change broadcasts.

use futures_util::StreamExt;
use llmix::config::Config;
use llmix::server::{pump_updates, router, AppState};
use llmix::watcher::FileWatcher;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start a full server (HTTP + watcher + broadcast pump) on an ephemeral
/// port. The watcher is returned so it stays alive for the test's duration.
async fn start_server(tmp: &TempDir) -> (SocketAddr, FileWatcher) {
    let state = AppState::new(Config::default(), tmp.path()).await.unwrap();
    let watcher = FileWatcher::start(tmp.path().to_path_buf(), state.matcher()).unwrap();
    tokio::spawn(pump_updates(watcher.subscribe(), state.hub()));

    let app = router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, watcher)
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (stream, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    stream
}

/// Next JSON text frame, skipping protocol frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Wait for a `files` message carrying the given event and path, skipping
/// everything else.
async fn next_file_event(ws: &mut WsStream, event: &str, path: &str) -> Value {
    loop {
        let msg = next_json(ws).await;
        if msg["type"] == "files" && msg["event"] == event && msg["path"] == path {
            return msg;
        }
    }
}

#[tokio::test]
async fn connect_pushes_files_and_groups() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("readme.md"), "x").unwrap();
    let (addr, _watcher) = start_server(&tmp).await;

    let mut ws = connect(addr).await;
    let first = next_json(&mut ws).await;
    let second = next_json(&mut ws).await;

    // Both snapshots arrive as discrete messages; order is not part of the
    // contract.
    let (files_msg, groups_msg) = if first["type"] == "files" {
        (first, second)
    } else {
        (second, first)
    };

    assert_eq!(files_msg["type"], "files");
    assert_eq!(files_msg["files"], serde_json::json!(["readme.md"]));
    assert!(files_msg.get("event").is_none());

    assert_eq!(groups_msg["type"], "groups");
    assert_eq!(groups_msg["groups"][0]["id"], "content-group-1");
}

#[tokio::test]
async fn file_addition_reaches_every_client() {
    let tmp = TempDir::new().unwrap();
    let (addr, _watcher) = start_server(&tmp).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    // Drain the connect-time snapshots.
    for ws in [&mut first, &mut second] {
        next_json(ws).await;
        next_json(ws).await;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(tmp.path().join("notes.md"), "hello").unwrap();

    for ws in [&mut first, &mut second] {
        let msg = next_file_event(ws, "add", "notes.md").await;
        assert!(msg["files"]
            .as_array()
            .unwrap()
            .contains(&Value::from("notes.md")));
    }
}

#[tokio::test]
async fn ignored_changes_are_not_broadcast() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("node_modules")).unwrap();
    let (addr, _watcher) = start_server(&tmp).await;

    let mut ws = connect(addr).await;
    next_json(&mut ws).await;
    next_json(&mut ws).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(tmp.path().join("node_modules/pkg.js"), "x").unwrap();

    // Nothing qualifying happened, so no text frame should arrive.
    let quiet = tokio::time::timeout(Duration::from_millis(800), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(_))) => break,
                Some(Ok(_)) => continue,
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(quiet.is_err(), "ignored change produced a broadcast");
}
