//! Outbound delivery: single-connection pushes, per-user fan-out and the
//! presence broadcaster.

use std::sync::Arc;

use {
    tokio::task::JoinHandle,
    tracing::{debug, info, warn},
};

use {
    murmur_metrics::{PRESENCE_BROADCASTS_TOTAL, PUSH_FAILURES_TOTAL, counter},
    murmur_protocol::{OnlineUsersPayload, OutboundEvent},
};

use crate::{presence::ConnectionHandle, state::GatewayState};

/// Best-effort delivery of one event to one connection.
///
/// A connection whose write loop is gone is torn down here; the caller only
/// learns whether the frame was queued.
pub async fn push(state: &GatewayState, conn: &ConnectionHandle, event: &OutboundEvent) -> bool {
    match event.to_frame() {
        Ok(frame) => push_frame(state, conn, &frame, event.name()).await,
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to serialize outbound event");
            false
        },
    }
}

async fn push_frame(state: &GatewayState, conn: &ConnectionHandle, frame: &str, name: &str) -> bool {
    if conn.send(frame) {
        return true;
    }
    debug!(conn_id = %conn.conn_id, user_id = %conn.user_id, event = name, "push failed, dropping connection");
    counter!(PUSH_FAILURES_TOTAL).increment(1);
    state.on_disconnect(conn).await;
    false
}

/// Fan an event out to every live connection of `user_id`. Returns how many
/// connections accepted it.
pub async fn push_to_user(state: &GatewayState, user_id: &str, event: &OutboundEvent) -> usize {
    let conns = state.presence.connections_for(user_id).await;
    if conns.is_empty() {
        return 0;
    }
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to serialize outbound event");
            return 0;
        },
    };
    let mut delivered = 0;
    for conn in &conns {
        if push_frame(state, conn, &frame, event.name()).await {
            delivered += 1;
        }
    }
    delivered
}

/// Push the full online set to every live connection.
pub async fn broadcast_presence(state: &GatewayState) -> usize {
    let user_ids = state.presence.online_user_ids().await;
    let event = OutboundEvent::OnlineUsers(OnlineUsersPayload { user_ids });
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "failed to serialize presence snapshot");
            return 0;
        },
    };

    let conns = state.presence.all_connections().await;
    let mut delivered = 0;
    for conn in &conns {
        if push_frame(state, conn, &frame, event.name()).await {
            delivered += 1;
        }
    }
    counter!(PRESENCE_BROADCASTS_TOTAL).increment(1);
    debug!(connections = delivered, "presence broadcast");
    delivered
}

/// Run the presence broadcaster until shutdown.
///
/// Each signalled transition triggers one broadcast after the coalescing
/// window; transitions arriving inside the window are folded into it. A
/// disconnect caused by a failed push during the broadcast signals again, so
/// the survivors converge on the next round.
pub fn spawn_presence_broadcaster(state: Arc<GatewayState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let window = state.options.presence_coalesce;
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = state.presence_changed() => {},
            }
            if !window.is_zero() {
                tokio::select! {
                    _ = state.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(window) => {},
                }
            }
            broadcast_presence(&state).await;
        }
        info!("presence broadcaster stopped");
    })
}
