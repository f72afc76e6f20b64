//! Routing of client → gateway events.
//!
//! The sender identity always comes from the connection; identities carried in
//! payloads are only checked for agreement.

use std::{future::Future, sync::Arc};

use tracing::{debug, warn};

use {
    murmur_metrics::{INBOUND_DROPPED_TOTAL, counter},
    murmur_protocol::{
        ErrorPayload, InboundEvent, MarkSeenParams, MessageSentPayload, OutboundEvent,
        SendMessageParams, decode_inbound,
    },
};

use crate::{
    broadcast::push, dispatcher, error::DispatchError, presence::ConnectionHandle, seen,
    state::GatewayState,
};

/// Run `work` on its own task and wait for it.
///
/// Once a write has started it finishes even if the caller (a connection
/// task or an HTTP request) is dropped midway.
pub(crate) async fn run_detached<T, F>(work: F) -> Option<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(out) => Some(out),
        Err(e) => {
            warn!(error = %e, "detached dispatch task failed");
            None
        },
    }
}

/// Parse and route one text frame. Malformed frames are logged and dropped.
pub async fn handle_inbound_frame(state: &Arc<GatewayState>, conn: &ConnectionHandle, text: &str) {
    match decode_inbound(text) {
        Ok(event) => dispatch_inbound(state, conn, event).await,
        Err(e) => {
            counter!(INBOUND_DROPPED_TOTAL).increment(1);
            warn!(conn_id = %conn.conn_id, user_id = %conn.user_id, error = %e, "dropping inbound frame");
        },
    }
}

pub async fn dispatch_inbound(
    state: &Arc<GatewayState>,
    conn: &ConnectionHandle,
    event: InboundEvent,
) {
    match event {
        InboundEvent::SendMessage(params) => on_send_message(state, conn, params).await,
        InboundEvent::MarkSeen(params) => on_mark_seen(state, conn, params).await,
    }
}

async fn on_send_message(
    state: &Arc<GatewayState>,
    conn: &ConnectionHandle,
    params: SendMessageParams,
) {
    let reference = params.reference.clone();
    let task_state = Arc::clone(state);
    let sender_id = conn.user_id.clone();
    let Some(result) = run_detached(async move {
        dispatcher::send_message(&task_state, &sender_id, params).await
    })
    .await
    else {
        return;
    };

    let reply = match result {
        Ok(message) => OutboundEvent::MessageSent(MessageSentPayload { reference, message }),
        Err(e) => error_event(conn, reference, &e),
    };
    push(state, conn, &reply).await;
}

async fn on_mark_seen(state: &Arc<GatewayState>, conn: &ConnectionHandle, params: MarkSeenParams) {
    if let Some(viewer) = params.viewer_id.as_deref()
        && viewer != conn.user_id
    {
        counter!(INBOUND_DROPPED_TOTAL).increment(1);
        warn!(
            conn_id = %conn.conn_id,
            user_id = %conn.user_id,
            claimed = viewer,
            "mark-seen identity mismatch, dropping"
        );
        return;
    }

    let task_state = Arc::clone(state);
    let viewer_id = conn.user_id.clone();
    let conversation_id = params.conversation_id;
    let Some(result) = run_detached(async move {
        seen::mark_seen(&task_state, &conversation_id, &viewer_id).await
    })
    .await
    else {
        return;
    };

    if let Err(e) = result {
        let reply = error_event(conn, None, &e);
        push(state, conn, &reply).await;
    }
}

fn error_event(
    conn: &ConnectionHandle,
    reference: Option<String>,
    err: &DispatchError,
) -> OutboundEvent {
    debug!(conn_id = %conn.conn_id, code = err.code(), error = %err, "inbound event rejected");
    OutboundEvent::Error(ErrorPayload {
        reference,
        error: err.to_error_shape(),
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::state::tests::{connect, drain, test_state},
        murmur_protocol::{MessagesSeenPayload, error_codes},
        murmur_store::ConversationStore,
    };

    #[tokio::test]
    async fn send_message_acks_sender_with_persisted_message() {
        let (state, _) = test_state();
        let (a, mut a_rx) = connect(&state, "alice").await;
        let (_b, mut b_rx) = connect(&state, "bob").await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        handle_inbound_frame(
            &state,
            &a,
            r#"{"event":"send-message","data":{"recipientId":"bob","text":"hi","ref":"r1"}}"#,
        )
        .await;

        let acks = drain(&mut a_rx);
        let [OutboundEvent::MessageSent(ack)] = acks.as_slice() else {
            panic!("expected one ack, got {acks:?}");
        };
        assert_eq!(ack.reference.as_deref(), Some("r1"));
        assert_eq!(ack.message.sender_id, "alice");

        let delivered = drain(&mut b_rx);
        assert_eq!(delivered, vec![OutboundEvent::NewMessage(ack.message.clone())]);
    }

    #[tokio::test]
    async fn failed_send_reports_error_to_sender_only() {
        let (state, _) = test_state();
        let (a, mut a_rx) = connect(&state, "alice").await;
        drain(&mut a_rx);

        handle_inbound_frame(
            &state,
            &a,
            r#"{"event":"send-message","data":{"recipientId":"alice","text":"me","ref":"r2"}}"#,
        )
        .await;

        let events = drain(&mut a_rx);
        let [OutboundEvent::Error(err)] = events.as_slice() else {
            panic!("expected one error, got {events:?}");
        };
        assert_eq!(err.reference.as_deref(), Some("r2"));
        assert_eq!(err.error.code, error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_and_connection_survives() {
        let (state, _) = test_state();
        let (a, mut a_rx) = connect(&state, "alice").await;
        drain(&mut a_rx);

        handle_inbound_frame(&state, &a, "not json").await;
        handle_inbound_frame(&state, &a, r#"{"event":"typing","data":{}}"#).await;
        handle_inbound_frame(&state, &a, r#"{"event":"send-message","data":{}}"#).await;

        assert!(drain(&mut a_rx).is_empty());
        assert!(state.presence.is_online("alice").await);
    }

    #[tokio::test]
    async fn payload_identity_is_never_trusted() {
        let (state, store) = test_state();
        let (a, mut a_rx) = connect(&state, "alice").await;
        let (b, mut b_rx) = connect(&state, "bob").await;

        let sent = dispatcher::send_message(&state, "alice", SendMessageParams {
            recipient_id: "bob".into(),
            text: Some("hi".into()),
            image_ref: None,
            reference: None,
        })
        .await
        .unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        // Alice claims to be bob: dropped, nothing marked.
        let spoofed = format!(
            r#"{{"event":"mark-seen","data":{{"conversationId":"{}","viewerId":"bob"}}}}"#,
            sent.conversation_id
        );
        handle_inbound_frame(&state, &a, &spoofed).await;
        assert!(!store.list_messages(&sent.conversation_id).await.unwrap()[0].seen);
        assert!(drain(&mut a_rx).is_empty());

        // Bob marking it without a viewer id uses his bound identity.
        let honest = format!(
            r#"{{"event":"mark-seen","data":{{"conversationId":"{}"}}}}"#,
            sent.conversation_id
        );
        handle_inbound_frame(&state, &b, &honest).await;
        assert!(store.list_messages(&sent.conversation_id).await.unwrap()[0].seen);
        assert_eq!(
            drain(&mut a_rx),
            vec![OutboundEvent::MessagesSeen(MessagesSeenPayload {
                conversation_id: sent.conversation_id.clone(),
            })]
        );
    }
}
