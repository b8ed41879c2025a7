//! End-to-end trip chat scenarios over real WebSocket connections.

mod common;

use common::*;
use futures_util::SinkExt;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite};
use wayfare_server::config::ChatConfig;

struct Trip {
    server: TestServer,
    trip_id: i64,
    owner: i64,
    attendee: i64,
}

async fn trip_with_attendee() -> Trip {
    let server = spawn_server(ChatConfig::default()).await;
    let owner = create_user(&server.pool, "olga");
    let attendee = create_user(&server.pool, "umar");
    let trip_id = create_trip(&server.pool, owner, "Dolomites");
    add_attendee(&server.pool, trip_id, attendee, "approved");
    Trip {
        server,
        trip_id,
        owner,
        attendee,
    }
}

#[tokio::test]
async fn owner_and_approved_attendee_exchange_messages() {
    let t = trip_with_attendee().await;
    let mut owner_ws = connect(t.server.addr, t.owner).await;
    let mut attendee_ws = connect(t.server.addr, t.attendee).await;

    let ack = join(&mut owner_ws, t.trip_id).await;
    assert_eq!(ack["payload"]["tripId"], t.trip_id);
    assert_eq!(ack["payload"]["onlineUsers"][0]["userName"], "olga");

    let ack = join(&mut attendee_ws, t.trip_id).await;
    assert_eq!(ack["payload"]["onlineUsers"].as_array().unwrap().len(), 2);

    let joined = next_event_of(&mut owner_ws, "user-joined").await;
    assert_eq!(joined["payload"]["userId"], t.attendee);
    assert_eq!(joined["payload"]["userName"], "umar");

    send_event(
        &mut attendee_ws,
        json!({"type": "send-message", "payload": {"tripId": t.trip_id, "content": " hello "}}),
    )
    .await;

    for ws in [&mut owner_ws, &mut attendee_ws] {
        let message = next_event_of(ws, "message").await;
        assert_eq!(message["payload"]["content"], "hello");
        assert_eq!(message["payload"]["tripId"], t.trip_id);
        assert_eq!(message["payload"]["user"]["id"], t.attendee);
        assert_eq!(message["payload"]["user"]["name"], "umar");
        assert_eq!(message["payload"]["user"]["avatarUrl"], "/avatars/umar.png");
    }
    assert_eq!(message_count(&t.server.pool, t.trip_id), 1);
}

#[tokio::test]
async fn pending_attendee_is_denied_and_registry_unchanged() {
    let t = trip_with_attendee().await;
    let pending = create_user(&t.server.pool, "pia");
    add_attendee(&t.server.pool, t.trip_id, pending, "pending");

    let mut owner_ws = connect(t.server.addr, t.owner).await;
    join(&mut owner_ws, t.trip_id).await;
    let before = t.server.registry.list_online(t.trip_id);

    let mut pending_ws = connect(t.server.addr, pending).await;
    send_event(
        &mut pending_ws,
        json!({"type": "join-trip-chat", "payload": {"tripId": t.trip_id}}),
    )
    .await;

    let error = next_event(&mut pending_ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "access_denied");
    assert_eq!(error["payload"]["retryable"], false);

    assert_eq!(t.server.registry.list_online(t.trip_id), before);
    expect_silence(&mut owner_ws, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn overlong_message_is_rejected_without_persisting_or_broadcasting() {
    let t = trip_with_attendee().await;
    let mut owner_ws = connect(t.server.addr, t.owner).await;
    let mut attendee_ws = connect(t.server.addr, t.attendee).await;
    join(&mut owner_ws, t.trip_id).await;
    join(&mut attendee_ws, t.trip_id).await;
    next_event_of(&mut owner_ws, "user-joined").await;

    send_event(
        &mut attendee_ws,
        json!({"type": "send-message", "payload": {"tripId": t.trip_id, "content": "x".repeat(1001)}}),
    )
    .await;

    let error = next_event(&mut attendee_ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "validation");
    assert_eq!(message_count(&t.server.pool, t.trip_id), 0);
    expect_silence(&mut owner_ws, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn revoked_attendee_cannot_send_after_joining() {
    let t = trip_with_attendee().await;
    let mut owner_ws = connect(t.server.addr, t.owner).await;
    let mut attendee_ws = connect(t.server.addr, t.attendee).await;
    join(&mut owner_ws, t.trip_id).await;
    join(&mut attendee_ws, t.trip_id).await;
    next_event_of(&mut owner_ws, "user-joined").await;

    // Approval is withdrawn while the attendee is still in the room.
    add_attendee(&t.server.pool, t.trip_id, t.attendee, "rejected");

    send_event(
        &mut attendee_ws,
        json!({"type": "send-message", "payload": {"tripId": t.trip_id, "content": "still here?"}}),
    )
    .await;

    let error = next_event(&mut attendee_ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "access_denied");
    assert_eq!(error["payload"]["retryable"], false);
    assert_eq!(message_count(&t.server.pool, t.trip_id), 0);

    expect_silence(&mut owner_ws, Duration::from_millis(300)).await;
    expect_silence(&mut attendee_ws, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn abrupt_disconnect_announces_user_left_and_last_leave_removes_room() {
    let t = trip_with_attendee().await;
    let mut owner_ws = connect(t.server.addr, t.owner).await;
    let mut attendee_ws = connect(t.server.addr, t.attendee).await;
    join(&mut owner_ws, t.trip_id).await;
    join(&mut attendee_ws, t.trip_id).await;
    next_event_of(&mut owner_ws, "user-joined").await;

    // No close frame: the TCP stream just goes away.
    drop(attendee_ws);

    let left = next_event_of(&mut owner_ws, "user-left").await;
    assert_eq!(left["payload"]["userId"], t.attendee);
    let online = left["payload"]["onlineUsers"].as_array().unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0]["userId"], t.owner);

    owner_ws.close(None).await.unwrap();
    let registry = t.server.registry.clone();
    assert!(eventually(|| registry.room_count() == 0).await);
}

#[tokio::test]
async fn storage_failure_is_reported_as_retryable() {
    let t = trip_with_attendee().await;
    let mut owner_ws = connect(t.server.addr, t.owner).await;
    let mut attendee_ws = connect(t.server.addr, t.attendee).await;
    join(&mut owner_ws, t.trip_id).await;
    join(&mut attendee_ws, t.trip_id).await;
    next_event_of(&mut owner_ws, "user-joined").await;

    t.server
        .pool
        .get()
        .unwrap()
        .execute_batch("DROP TABLE chat_messages;")
        .unwrap();

    send_event(
        &mut attendee_ws,
        json!({"type": "send-message", "payload": {"tripId": t.trip_id, "content": "lost"}}),
    )
    .await;

    let error = next_event(&mut attendee_ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "storage");
    assert_eq!(error["payload"]["retryable"], true);
    expect_silence(&mut owner_ws, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn typing_indicator_is_broadcast_and_expires() {
    let server = spawn_server(ChatConfig {
        typing_timeout_secs: 1,
        ..ChatConfig::default()
    })
    .await;
    let owner = create_user(&server.pool, "olga");
    let attendee = create_user(&server.pool, "umar");
    let trip_id = create_trip(&server.pool, owner, "Dolomites");
    add_attendee(&server.pool, trip_id, attendee, "approved");

    let mut owner_ws = connect(server.addr, owner).await;
    let mut attendee_ws = connect(server.addr, attendee).await;
    join(&mut owner_ws, trip_id).await;
    join(&mut attendee_ws, trip_id).await;
    next_event_of(&mut owner_ws, "user-joined").await;

    send_event(
        &mut attendee_ws,
        json!({"type": "typing", "payload": {"tripId": trip_id, "isTyping": true}}),
    )
    .await;

    let started = next_event(&mut owner_ws).await;
    assert_eq!(started["type"], "user-typing");
    assert_eq!(started["payload"]["userId"], attendee);
    assert_eq!(started["payload"]["isTyping"], true);

    // Nobody sends `typing: false`; the deadline does.
    let stopped = next_event(&mut owner_ws).await;
    assert_eq!(stopped["type"], "user-typing");
    assert_eq!(stopped["payload"]["isTyping"], false);

    // The typist never sees its own indicator.
    expect_silence(&mut attendee_ws, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn leaving_stops_typing_and_further_typing_is_a_protocol_error() {
    let t = trip_with_attendee().await;
    let mut owner_ws = connect(t.server.addr, t.owner).await;
    let mut attendee_ws = connect(t.server.addr, t.attendee).await;
    join(&mut owner_ws, t.trip_id).await;
    join(&mut attendee_ws, t.trip_id).await;
    next_event_of(&mut owner_ws, "user-joined").await;

    send_event(
        &mut attendee_ws,
        json!({"type": "typing", "payload": {"tripId": t.trip_id, "isTyping": true}}),
    )
    .await;
    next_event_of(&mut owner_ws, "user-typing").await;

    send_event(
        &mut attendee_ws,
        json!({"type": "leave-trip-chat", "payload": {"tripId": t.trip_id}}),
    )
    .await;

    let stopped = next_event(&mut owner_ws).await;
    assert_eq!(stopped["type"], "user-typing");
    assert_eq!(stopped["payload"]["isTyping"], false);
    let left = next_event(&mut owner_ws).await;
    assert_eq!(left["type"], "user-left");
    assert_eq!(left["payload"]["userId"], t.attendee);

    send_event(
        &mut attendee_ws,
        json!({"type": "typing", "payload": {"tripId": t.trip_id, "isTyping": true}}),
    )
    .await;
    let error = next_event(&mut attendee_ws).await;
    assert_eq!(error["payload"]["code"], "protocol");
}

#[tokio::test]
async fn joining_another_trip_leaves_the_first() {
    let t = trip_with_attendee().await;
    let second = create_trip(&t.server.pool, t.attendee, "Attendee's own trip");

    let mut owner_ws = connect(t.server.addr, t.owner).await;
    let mut attendee_ws = connect(t.server.addr, t.attendee).await;
    join(&mut owner_ws, t.trip_id).await;
    join(&mut attendee_ws, t.trip_id).await;
    next_event_of(&mut owner_ws, "user-joined").await;

    let ack = join(&mut attendee_ws, second).await;
    assert_eq!(ack["payload"]["tripId"], second);

    let left = next_event_of(&mut owner_ws, "user-left").await;
    assert_eq!(left["payload"]["userId"], t.attendee);
    assert!(!t.server.registry.is_online(t.trip_id, t.attendee));
    assert!(t.server.registry.is_online(second, t.attendee));
}

#[tokio::test]
async fn rejoining_the_same_trip_only_reacknowledges() {
    let t = trip_with_attendee().await;
    let mut owner_ws = connect(t.server.addr, t.owner).await;
    let mut attendee_ws = connect(t.server.addr, t.attendee).await;
    join(&mut owner_ws, t.trip_id).await;
    join(&mut attendee_ws, t.trip_id).await;
    next_event_of(&mut owner_ws, "user-joined").await;

    let ack = join(&mut attendee_ws, t.trip_id).await;
    assert_eq!(ack["payload"]["onlineUsers"].as_array().unwrap().len(), 2);
    assert_eq!(t.server.registry.connection_count(), 2);
    expect_silence(&mut owner_ws, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn two_tabs_of_one_user_are_listed_once() {
    let t = trip_with_attendee().await;
    let mut tab1 = connect(t.server.addr, t.owner).await;
    let mut tab2 = connect(t.server.addr, t.owner).await;
    join(&mut tab1, t.trip_id).await;
    let ack = join(&mut tab2, t.trip_id).await;

    assert_eq!(ack["payload"]["onlineUsers"].as_array().unwrap().len(), 1);
    assert_eq!(t.server.registry.connection_count(), 2);

    drop(tab2);
    let left = next_event_of(&mut tab1, "user-left").await;
    // The user is still online through the first tab.
    assert_eq!(left["payload"]["onlineUsers"][0]["userId"], t.owner);
}

#[tokio::test]
async fn malformed_frames_are_protocol_errors_and_not_fatal() {
    let t = trip_with_attendee().await;
    let mut ws = connect(t.server.addr, t.owner).await;

    send_event(&mut ws, json!({"type": "dance", "payload": {}})).await;
    let error = next_event(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "protocol");

    ws.send(tungstenite::protocol::Message::Binary(vec![1u8, 2, 3].into()))
        .await
        .unwrap();
    let error = next_event(&mut ws).await;
    assert_eq!(error["payload"]["code"], "protocol");

    let ack = join(&mut ws, t.trip_id).await;
    assert_eq!(ack["type"], "joined-trip-chat");
}

#[tokio::test]
async fn handshake_requires_a_known_user() {
    let server = spawn_server(ChatConfig::default()).await;

    for url in [
        format!("ws://{}/ws", server.addr),
        format!("ws://{}/ws?userId=abc", server.addr),
        format!("ws://{}/ws?userId=4242", server.addr),
    ] {
        match connect_async(url.clone()).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), 401, "{url}");
            }
            other => panic!("expected 401 for {url}, got {:?}", other.map(|_| ())),
        }
    }
}
