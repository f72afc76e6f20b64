#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    jsonwebtoken::{EncodingKey, Header, encode},
    murmur_gateway::{
        GatewayOptions, GatewayState,
        auth::{Claims, resolve_auth},
        broadcast::spawn_presence_broadcaster,
        build_gateway_app,
        directory::OpenDirectory,
    },
    murmur_protocol::{Conversation, Message, OutboundEvent},
    murmur_store::MemoryConversationStore,
    tokio::net::{TcpListener, TcpStream},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite},
};

const SECRET: &str = "integration-secret";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn token_for(user_id: &str) -> String {
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    encode(
        &Header::default(),
        &Claims {
            user_id: user_id.into(),
            exp,
            iat: None,
        },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn start_server() -> (SocketAddr, Arc<GatewayState>) {
    let options = GatewayOptions {
        presence_coalesce: Duration::ZERO,
        ..GatewayOptions::default()
    };
    let state = GatewayState::new(
        Arc::new(MemoryConversationStore::new()),
        Arc::new(OpenDirectory),
        resolve_auth(Some(SECRET.into()), "jwt"),
        options,
    );
    spawn_presence_broadcaster(Arc::clone(&state));

    let app = build_gateway_app(Arc::clone(&state));
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
    (addr, state)
}

async fn connect(addr: SocketAddr, user_id: &str) -> Socket {
    let url = format!("ws://{addr}/ws?token={}", token_for(user_id));
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Read frames until one matches, skipping everything else.
async fn wait_for<F>(ws: &mut Socket, mut pred: F) -> OutboundEvent
where
    F: FnMut(&OutboundEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = ws.next().await.expect("socket closed").unwrap();
            if let tungstenite::Message::Text(text) = frame {
                let event: OutboundEvent = serde_json::from_str(text.as_str()).unwrap();
                if pred(&event) {
                    return event;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn send_json(ws: &mut Socket, value: serde_json::Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn message_reaches_every_recipient_tab_and_history() {
    let (addr, _state) = start_server().await;
    let mut bob_1 = connect(addr, "bob").await;
    let mut bob_2 = connect(addr, "bob").await;
    let mut alice = connect(addr, "alice").await;

    send_json(
        &mut alice,
        serde_json::json!({
            "event": "send-message",
            "data": { "recipientId": "bob", "text": "hi", "ref": "1" }
        }),
    )
    .await;

    let ack = wait_for(&mut alice, |e| matches!(e, OutboundEvent::MessageSent(_))).await;
    let OutboundEvent::MessageSent(ack) = ack else {
        unreachable!()
    };
    assert_eq!(ack.reference.as_deref(), Some("1"));

    for tab in [&mut bob_1, &mut bob_2] {
        let event = wait_for(tab, |e| matches!(e, OutboundEvent::NewMessage(_))).await;
        let OutboundEvent::NewMessage(msg) = event else {
            unreachable!()
        };
        assert_eq!(msg.text, "hi");
        assert!(!msg.seen);
        assert_eq!(msg.id, ack.message.id);
    }

    let client = reqwest::Client::new();
    let history: Vec<Message> = client
        .get(format!("http://{addr}/api/messages/alice"))
        .bearer_auth(token_for("bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "hi");

    let conversations: Vec<Conversation> = client
        .get(format!("http://{addr}/api/messages/conversations"))
        .bearer_auth(token_for("bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].last_message.text, "hi");
    assert_eq!(conversations[0].last_message.sender_id, "alice");

    // Bob reads it on one tab; alice hears about it.
    send_json(
        &mut bob_1,
        serde_json::json!({
            "event": "mark-seen",
            "data": { "conversationId": ack.message.conversation_id }
        }),
    )
    .await;
    let seen = wait_for(&mut alice, |e| matches!(e, OutboundEvent::MessagesSeen(_))).await;
    let OutboundEvent::MessagesSeen(seen) = seen else {
        unreachable!()
    };
    assert_eq!(seen.conversation_id, ack.message.conversation_id);
}

#[tokio::test]
async fn rest_send_is_delivered_over_socket() {
    let (addr, _state) = start_server().await;
    let mut bob = connect(addr, "bob").await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/messages"))
        .bearer_auth(token_for("alice"))
        .json(&serde_json::json!({ "recipientId": "bob", "text": "via rest" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let sent: Message = resp.json().await.unwrap();

    let event = wait_for(&mut bob, |e| matches!(e, OutboundEvent::NewMessage(_))).await;
    assert_eq!(event, OutboundEvent::NewMessage(sent));
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let (addr, _state) = start_server().await;

    let resp = reqwest::get(format!("http://{addr}/api/messages/conversations"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
    assert!(
        connect_async(format!("ws://{addr}/ws?token=garbage"))
            .await
            .is_err()
    );

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn peers_see_user_go_offline() {
    let (addr, state) = start_server().await;
    let mut bob = connect(addr, "bob").await;
    let mut alice = connect(addr, "alice").await;

    wait_for(&mut bob, |e| {
        matches!(e, OutboundEvent::OnlineUsers(p) if p.user_ids == ["alice", "bob"])
    })
    .await;

    alice.close(None).await.unwrap();
    wait_for(&mut bob, |e| {
        matches!(e, OutboundEvent::OnlineUsers(p) if p.user_ids == ["bob"])
    })
    .await;
    assert!(!state.presence.is_online("alice").await);
}
