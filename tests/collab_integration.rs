//! Integration tests for the collabd WebSocket server.
//! Spins up a real daemon on a free port and drives it with WebSocket
//! clients through the full handshake → command → broadcast flow.

use collabd::{collab::CollabHub, config::CollabConfig, tasks::StaticTaskDirectory, ws, AppContext};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::frame::coding::CloseCode, tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a daemon on a random port and return its base URL.
async fn start_test_daemon() -> (String, Arc<AppContext>) {
    let data_dir = tempfile::tempdir().unwrap().keep();
    let port = get_free_port();

    let config = Arc::new(CollabConfig::new(
        Some(port),
        Some(data_dir),
        Some("warn".to_string()),
        None,
    ));
    let tasks = StaticTaskDirectory::new()
        .insert("t42", "Migrate billing exports", Some("u3"), Some("u4"))
        .insert("t7", "Self-assigned cleanup", Some("u3"), Some("u3"));
    let hub = Arc::new(CollabHub::new(Arc::new(tasks), config.outbox_capacity));

    let ctx = Arc::new(AppContext {
        config,
        hub,
        started_at: std::time::Instant::now(),
    });

    let ctx_server = ctx.clone();
    tokio::spawn(async move {
        ws::run(ctx_server).await.ok();
    });

    // Give the server a moment to bind
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("127.0.0.1:{port}"), ctx)
}

fn get_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn connect_user(base: &str, user_id: &str, user_name: &str) -> WsClient {
    let url = format!("ws://{base}/collab?userId={user_id}&userName={user_name}");
    let (ws, _) = connect_async(&url).await.expect("ws connect failed");
    ws
}

/// Next JSON event frame from the server, panicking on close or timeout.
async fn next_event(ws: &mut WsClient) -> Value {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(&text).expect("invalid event JSON");
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for event: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn send_command(ws: &mut WsClient, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

// ─── Handshake ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_without_identity_is_closed_with_policy_violation() {
    let (base, ctx) = start_test_daemon().await;

    let url = format!("ws://{base}/collab");
    let (mut ws, _) = connect_async(&url).await.expect("upgrade should complete");

    match ws.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::Policy);
        }
        other => panic!("expected policy close, got {other:?}"),
    }
    // No state was created.
    assert_eq!(ctx.hub.stats().await.online_users, 0);
}

#[tokio::test]
async fn handshake_with_identity_yields_roster() {
    let (base, _ctx) = start_test_daemon().await;

    let mut alice = connect_user(&base, "u1", "Alice").await;
    let event = next_event(&mut alice).await;
    assert_eq!(event["type"], "connection_established");
    assert!(event["data"]["sessionId"].as_str().is_some());
    let roster = event["data"]["onlineUsers"].as_array().unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0]["userId"], "u1");
    assert_eq!(roster[0]["userName"], "Alice");
}

#[tokio::test]
async fn handshake_decodes_url_encoded_names() {
    let (base, ctx) = start_test_daemon().await;

    let mut ws = connect_user(&base, "u1", "Alice%20del%20Rey").await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["data"]["onlineUsers"][0]["userName"], "Alice del Rey");
    assert!(ctx.hub.is_online("u1").await);
}

// ─── The channel scenario ────────────────────────────────────────────────────

#[tokio::test]
async fn alice_and_bob_share_a_channel() {
    let (base, _ctx) = start_test_daemon().await;

    let mut alice = connect_user(&base, "u1", "Alice").await;
    let _ = next_event(&mut alice).await; // connection_established

    send_command(
        &mut alice,
        json!({"type": "join_channel", "data": {"channelId": "proj_1"}}),
    )
    .await;
    let replay = next_event(&mut alice).await;
    assert_eq!(replay["type"], "channel_messages");
    assert_eq!(replay["data"]["messages"].as_array().unwrap().len(), 0);

    let mut bob = connect_user(&base, "u2", "Bob").await;
    let _ = next_event(&mut bob).await; // connection_established
    let joined = next_event(&mut alice).await;
    assert_eq!(joined["type"], "user_joined");
    assert_eq!(joined["data"]["userId"], "u2");

    send_command(
        &mut bob,
        json!({"type": "join_channel", "data": {"channelId": "proj_1"}}),
    )
    .await;
    let _ = next_event(&mut bob).await; // replay
    let channel_joined = next_event(&mut alice).await;
    assert_eq!(channel_joined["type"], "user_joined_channel");
    assert_eq!(channel_joined["data"]["userId"], "u2");
    assert_eq!(channel_joined["data"]["channelId"], "proj_1");

    send_command(
        &mut bob,
        json!({"type": "send_message", "data": {"channelId": "proj_1", "content": "hello"}}),
    )
    .await;
    let message = next_event(&mut alice).await;
    assert_eq!(message["type"], "new_message");
    assert_eq!(message["data"]["content"], "hello");
    assert_eq!(message["data"]["channelId"], "proj_1");
    assert_eq!(message["data"]["authorId"], "u2");

    // Alice disconnects — Bob hears about it once per surface.
    alice.close(None).await.unwrap();
    let left_channel = next_event(&mut bob).await;
    assert_eq!(left_channel["type"], "user_left_channel");
    assert_eq!(left_channel["data"]["userId"], "u1");
    assert_eq!(left_channel["data"]["channelId"], "proj_1");
    let left = next_event(&mut bob).await;
    assert_eq!(left["type"], "user_left");
    assert_eq!(left["data"]["userId"], "u1");
}

#[tokio::test]
async fn join_replays_existing_history() {
    let (base, _ctx) = start_test_daemon().await;

    let mut alice = connect_user(&base, "u1", "Alice").await;
    let _ = next_event(&mut alice).await;
    send_command(
        &mut alice,
        json!({"type": "join_channel", "data": {"channelId": "proj_2"}}),
    )
    .await;
    let _ = next_event(&mut alice).await; // empty replay

    for n in 0..5 {
        send_command(
            &mut alice,
            json!({"type": "send_message", "data": {"channelId": "proj_2", "content": format!("m{n}")}}),
        )
        .await;
    }

    let mut bob = connect_user(&base, "u2", "Bob").await;
    let _ = next_event(&mut bob).await;
    send_command(
        &mut bob,
        json!({"type": "join_channel", "data": {"channelId": "proj_2"}}),
    )
    .await;
    let replay = next_event(&mut bob).await;
    assert_eq!(replay["type"], "channel_messages");
    let messages = replay["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 5);
    // Oldest first.
    assert_eq!(messages[0]["content"], "m0");
    assert_eq!(messages[4]["content"], "m4");
}

// ─── Error handling ──────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_frame_gets_error_event_and_connection_survives() {
    let (base, _ctx) = start_test_daemon().await;

    let mut alice = connect_user(&base, "u1", "Alice").await;
    let _ = next_event(&mut alice).await;

    send_command(&mut alice, json!({"type": "join_channel"})).await; // no data
    let error = next_event(&mut alice).await;
    assert_eq!(error["type"], "error");

    alice.send(Message::Text("{not json".into())).await.unwrap();
    let error = next_event(&mut alice).await;
    assert_eq!(error["type"], "error");

    // Still in business.
    send_command(
        &mut alice,
        json!({"type": "join_channel", "data": {"channelId": "c1"}}),
    )
    .await;
    assert_eq!(next_event(&mut alice).await["type"], "channel_messages");
}

#[tokio::test]
async fn unknown_command_type_is_silently_ignored() {
    let (base, _ctx) = start_test_daemon().await;

    let mut alice = connect_user(&base, "u1", "Alice").await;
    let _ = next_event(&mut alice).await;

    send_command(&mut alice, json!({"type": "frobnicate", "data": {}})).await;
    send_command(
        &mut alice,
        json!({"type": "join_channel", "data": {"channelId": "c1"}}),
    )
    .await;
    // The next event is the join replay — no error arrived in between.
    assert_eq!(next_event(&mut alice).await["type"], "channel_messages");
}

// ─── Task comments ───────────────────────────────────────────────────────────

#[tokio::test]
async fn task_comment_notifies_assignee_and_creator_only() {
    let (base, _ctx) = start_test_daemon().await;

    let mut cara = connect_user(&base, "u3", "Cara").await;
    let _ = next_event(&mut cara).await;
    let mut dan = connect_user(&base, "u4", "Dan").await;
    let _ = next_event(&mut dan).await;
    let _ = next_event(&mut cara).await; // user_joined(u4)
    let mut eve = connect_user(&base, "u5", "Eve").await;
    let _ = next_event(&mut eve).await;
    let _ = next_event(&mut cara).await; // user_joined(u5)
    let _ = next_event(&mut dan).await; // user_joined(u5)

    send_command(
        &mut eve,
        json!({"type": "task_comment", "data": {"taskId": "t42", "content": "ready for review"}}),
    )
    .await;

    // Author: confirmation echo only.
    let echo = next_event(&mut eve).await;
    assert_eq!(echo["type"], "task_comment");
    assert_eq!(echo["data"]["kind"], "task_comment");
    assert_eq!(echo["data"]["channelId"], "task:t42");
    assert_eq!(echo["data"]["taskId"], "t42");

    for ws in [&mut cara, &mut dan] {
        let notification = next_event(ws).await;
        assert_eq!(notification["type"], "task_comment_notification");
        assert_eq!(notification["data"]["taskId"], "t42");
        assert_eq!(notification["data"]["taskTitle"], "Migrate billing exports");
        assert_eq!(notification["data"]["message"]["content"], "ready for review");
    }
}

#[tokio::test]
async fn task_comment_on_unknown_task_still_broadcasts() {
    let (base, ctx) = start_test_daemon().await;

    let mut cara = connect_user(&base, "u3", "Cara").await;
    let _ = next_event(&mut cara).await;
    send_command(
        &mut cara,
        json!({"type": "join_channel", "data": {"channelId": "task:ghost"}}),
    )
    .await;
    let _ = next_event(&mut cara).await; // replay

    let mut eve = connect_user(&base, "u5", "Eve").await;
    let _ = next_event(&mut eve).await;
    let _ = next_event(&mut cara).await; // user_joined(u5)

    send_command(
        &mut eve,
        json!({"type": "task_comment", "data": {"taskId": "ghost", "content": "hello?"}}),
    )
    .await;

    // Channel broadcast still happens; only the notification step is skipped.
    let message = next_event(&mut cara).await;
    assert_eq!(message["type"], "new_message");
    assert_eq!(message["data"]["channelId"], "task:ghost");
    assert_eq!(ctx.hub.recent("task:ghost", 10).await.len(), 1);
}

#[tokio::test]
async fn self_assigned_task_yields_single_notification() {
    let (base, _ctx) = start_test_daemon().await;

    let mut cara = connect_user(&base, "u3", "Cara").await;
    let _ = next_event(&mut cara).await;
    let mut eve = connect_user(&base, "u5", "Eve").await;
    let _ = next_event(&mut eve).await;
    let _ = next_event(&mut cara).await; // user_joined(u5)

    // t7 has u3 as both assignee and creator.
    send_command(
        &mut eve,
        json!({"type": "task_comment", "data": {"taskId": "t7", "content": "ping"}}),
    )
    .await;
    let _ = next_event(&mut eve).await; // echo

    let notification = next_event(&mut cara).await;
    assert_eq!(notification["type"], "task_comment_notification");
    // Nothing else for Cara: one stakeholder entry, not two.
    send_command(
        &mut cara,
        json!({"type": "join_channel", "data": {"channelId": "probe"}}),
    )
    .await;
    assert_eq!(next_event(&mut cara).await["type"], "channel_messages");
}

// ─── Typing & status ─────────────────────────────────────────────────────────

#[tokio::test]
async fn typing_and_status_signals_flow() {
    let (base, _ctx) = start_test_daemon().await;

    let mut alice = connect_user(&base, "u1", "Alice").await;
    let _ = next_event(&mut alice).await;
    let mut bob = connect_user(&base, "u2", "Bob").await;
    let _ = next_event(&mut bob).await;
    let _ = next_event(&mut alice).await; // user_joined(u2)

    for ws in [&mut alice, &mut bob] {
        send_command(
            ws,
            json!({"type": "join_channel", "data": {"channelId": "c1"}}),
        )
        .await;
    }
    let _ = next_event(&mut alice).await; // replay
    let _ = next_event(&mut alice).await; // user_joined_channel(u2)
    let _ = next_event(&mut bob).await; // replay

    send_command(&mut bob, json!({"type": "typing_start", "data": {"channelId": "c1"}})).await;
    let typing = next_event(&mut alice).await;
    assert_eq!(typing["type"], "typing_start");
    assert_eq!(typing["data"]["userId"], "u2");

    send_command(&mut bob, json!({"type": "typing_stop", "data": {"channelId": "c1"}})).await;
    assert_eq!(next_event(&mut alice).await["type"], "typing_stop");

    send_command(
        &mut bob,
        json!({"type": "user_status", "data": {"context": "invoice_83"}}),
    )
    .await;
    let status = next_event(&mut alice).await;
    assert_eq!(status["type"], "user_status_update");
    assert_eq!(status["data"]["userId"], "u2");
    assert_eq!(status["data"]["context"], "invoice_83");
}

// ─── Reconnect ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconnect_replaces_previous_session() {
    let (base, ctx) = start_test_daemon().await;

    let mut first = connect_user(&base, "u1", "Alice").await;
    let _ = next_event(&mut first).await;

    let mut second = connect_user(&base, "u1", "Alice").await;
    let established = next_event(&mut second).await;
    assert_eq!(established["type"], "connection_established");
    assert_eq!(
        established["data"]["onlineUsers"].as_array().unwrap().len(),
        1
    );
    assert_eq!(ctx.hub.stats().await.online_users, 1);

    // The superseded socket's queue is gone; the server eventually closes it.
    // Its disconnect must not log the user out.
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(ctx.hub.is_online("u1").await);

    // The live session still works.
    send_command(
        &mut second,
        json!({"type": "join_channel", "data": {"channelId": "c1"}}),
    )
    .await;
    assert_eq!(next_event(&mut second).await["type"], "channel_messages");
}

// ─── HTTP peek endpoints ─────────────────────────────────────────────────────

async fn http_get(base: &str, path: &str) -> Value {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = TcpStream::connect(base).await.unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: {base}\r\nConnection: close\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    let body = response.split("\r\n\r\n").nth(1).expect("no body");
    serde_json::from_str(body).expect("invalid JSON body")
}

#[tokio::test]
async fn health_endpoint_reports_counts() {
    let (base, _ctx) = start_test_daemon().await;

    let mut alice = connect_user(&base, "u1", "Alice").await;
    let _ = next_event(&mut alice).await;
    send_command(
        &mut alice,
        json!({"type": "join_channel", "data": {"channelId": "c1"}}),
    )
    .await;
    let _ = next_event(&mut alice).await;

    let health = http_get(&base, "/health").await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["onlineUsers"], 1);
    assert_eq!(health["activeChannels"], 1);
    assert!(health["version"].is_string());
}

#[tokio::test]
async fn presence_endpoint_lists_roster() {
    let (base, _ctx) = start_test_daemon().await;

    let mut alice = connect_user(&base, "u1", "Alice").await;
    let _ = next_event(&mut alice).await;

    let presence = http_get(&base, "/presence").await;
    let roster = presence["onlineUsers"].as_array().unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0]["userId"], "u1");
}
