//! Shared harness for server integration tests.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use wayfare_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use wayfare_server::config::ChatConfig;
use wayfare_server::registry::RoomRegistry;
use wayfare_server::{app, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub pool: DbPool,
    pub registry: RoomRegistry,
    _db: tempfile::NamedTempFile,
}

/// Creates a pool over a fresh temporary database with migrations applied.
pub fn test_pool() -> (DbPool, tempfile::NamedTempFile) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let pool = create_pool(db_file.path().to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }
    (pool, db_file)
}

/// Starts a server on an ephemeral port.
pub async fn spawn_server(chat: ChatConfig) -> TestServer {
    let (pool, db_file) = test_pool();
    let state = AppState::new(pool.clone(), chat);
    let registry = state.registry.clone();

    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        pool,
        registry,
        _db: db_file,
    }
}

pub fn create_user(pool: &DbPool, name: &str) -> i64 {
    let conn = pool.get().unwrap();
    conn.execute(
        "INSERT INTO users (name, avatar_url) VALUES (?1, ?2)",
        rusqlite::params![name, format!("/avatars/{name}.png")],
    )
    .unwrap();
    conn.last_insert_rowid()
}

pub fn create_trip(pool: &DbPool, owner_id: i64, title: &str) -> i64 {
    let conn = pool.get().unwrap();
    conn.execute(
        "INSERT INTO trips (owner_id, title) VALUES (?1, ?2)",
        rusqlite::params![owner_id, title],
    )
    .unwrap();
    conn.last_insert_rowid()
}

pub fn add_attendee(pool: &DbPool, trip_id: i64, user_id: i64, status: &str) {
    let conn = pool.get().unwrap();
    conn.execute(
        "INSERT INTO trip_attendees (trip_id, user_id, status) VALUES (?1, ?2, ?3)
         ON CONFLICT(trip_id, user_id) DO UPDATE SET status = excluded.status",
        rusqlite::params![trip_id, user_id, status],
    )
    .unwrap();
}

pub fn message_count(pool: &DbPool, trip_id: i64) -> i64 {
    let conn = pool.get().unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM chat_messages WHERE trip_id = ?1",
        [trip_id],
        |row| row.get(0),
    )
    .unwrap()
}

pub async fn connect(addr: SocketAddr, user_id: i64) -> WsClient {
    let url = format!("ws://{}/ws?userId={}", addr, user_id);
    let (ws, _) = connect_async(url).await.expect("failed to connect");
    ws
}

pub async fn send_event(ws: &mut WsClient, event: Value) {
    ws.send(Message::Text(event.to_string().into()))
        .await
        .expect("failed to send frame");
}

/// Next JSON event, skipping control frames.
pub async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(EVENT_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("event is JSON");
        }
    }
}

/// Next event of the given type, discarding others.
pub async fn next_event_of(ws: &mut WsClient, event_type: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["type"] == event_type {
            return event;
        }
    }
}

/// Asserts that no event arrives within `window`.
pub async fn expect_silence(ws: &mut WsClient, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected event: {}", text.as_str()),
            Ok(Some(Ok(_))) => continue,
            Ok(other) => panic!("connection ended unexpectedly: {:?}", other),
        }
    }
}

/// Sends `join-trip-chat` and waits for the acknowledgement.
pub async fn join(ws: &mut WsClient, trip_id: i64) -> Value {
    send_event(
        ws,
        serde_json::json!({"type": "join-trip-chat", "payload": {"tripId": trip_id}}),
    )
    .await;
    next_event_of(ws, "joined-trip-chat").await
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
