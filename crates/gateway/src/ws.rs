use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        body::Bytes,
        extract::ws::{Message, WebSocket},
    },
    futures::{SinkExt, StreamExt},
    tokio::{
        sync::mpsc,
        time::{MissedTickBehavior, interval_at, timeout},
    },
    tracing::{debug, info, warn},
};

use murmur_metrics::{INBOUND_DROPPED_TOTAL, counter};

use crate::{inbound::handle_inbound_frame, state::GatewayState};

/// How long the write loop gets to flush a close frame after the read side ends.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Drive one authenticated WebSocket connection until it closes.
///
/// The identity was verified before the upgrade; nothing the client sends
/// afterwards can change it.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    user_id: String,
    remote_addr: SocketAddr,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_token = state.shutdown.child_token();

    // Write loop: drain queued frames and keep the link warm with pings.
    let ping_every = state.options.ping_interval;
    let write_token = conn_token.clone();
    let mut write_task = tokio::spawn(async move {
        let mut ping = interval_at(tokio::time::Instant::now() + ping_every, ping_every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                },
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                },
                _ = write_token.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                },
            }
        }
        write_token.cancel();
    });

    let conn = state.on_connect(&user_id, tx).await;
    info!(conn_id = %conn.conn_id, user_id = %user_id, remote_ip = %remote_addr.ip(), "ws: connected");

    let idle = state.options.idle_timeout;
    loop {
        let next = tokio::select! {
            _ = conn_token.cancelled() => break,
            next = timeout(idle, ws_rx.next()) => next,
        };
        let msg = match next {
            Err(_) => {
                info!(conn_id = %conn.conn_id, "ws: idle timeout");
                break;
            },
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn.conn_id, error = %e, "ws: read error");
                break;
            },
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            Message::Text(text) => handle_inbound_frame(&state, &conn, text.as_str()).await,
            Message::Binary(data) => {
                counter!(INBOUND_DROPPED_TOTAL).increment(1);
                warn!(conn_id = %conn.conn_id, len = data.len(), "ws: binary frames are not supported");
            },
            Message::Close(_) => break,
            // Any traffic resets the idle timer; pings are answered by axum.
            Message::Ping(_) | Message::Pong(_) => {},
        }
    }

    conn_token.cancel();
    state.on_disconnect(&conn).await;
    if timeout(CLOSE_GRACE, &mut write_task).await.is_err() {
        write_task.abort();
    }
    info!(
        conn_id = %conn.conn_id,
        user_id = %conn.user_id,
        duration_secs = conn.connected_at.elapsed().as_secs(),
        "ws: connection closed"
    );
}
