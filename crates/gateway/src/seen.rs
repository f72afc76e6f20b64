//! Seen-Receipt Reconciler.

use tracing::debug;

use {
    murmur_metrics::{MESSAGES_SEEN_TOTAL, counter},
    murmur_protocol::{MessagesSeenPayload, OutboundEvent},
    murmur_store::SeenUpdate,
};

use crate::{broadcast::push_to_user, error::DispatchError, state::GatewayState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeenOutcome {
    pub update: SeenUpdate,
    /// Connections of the other participant that were told.
    pub notified: usize,
}

/// Mark everything the other participant sent in `conversation_id` as seen
/// by `viewer_id`, then tell the other participant's live connections.
///
/// Repeating the call with nothing new to mark writes nothing and pushes
/// nothing.
pub async fn mark_seen(
    state: &GatewayState,
    conversation_id: &str,
    viewer_id: &str,
) -> Result<SeenOutcome, DispatchError> {
    let conversation = state
        .store
        .get_conversation(conversation_id)
        .await?
        .ok_or_else(|| DispatchError::ConversationNotFound(conversation_id.to_string()))?;
    let Some(other) = conversation.other_participant(viewer_id) else {
        return Err(DispatchError::NotParticipant(conversation_id.to_string()));
    };

    let _turn = state.lock_conversation(conversation_id).await;
    let update = state.store.mark_seen(conversation_id, viewer_id).await?;
    if !update.changed() {
        debug!(conversation_id, viewer_id, "nothing new to mark seen");
        return Ok(SeenOutcome {
            update,
            notified: 0,
        });
    }
    counter!(MESSAGES_SEEN_TOTAL).increment(update.updated);

    let notified = push_to_user(
        state,
        other,
        &OutboundEvent::MessagesSeen(MessagesSeenPayload {
            conversation_id: conversation_id.to_string(),
        }),
    )
    .await;
    debug!(conversation_id, viewer_id, updated = update.updated, notified, "messages seen");
    Ok(SeenOutcome { update, notified })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            dispatcher::send_message,
            state::tests::{connect, drain, test_state},
        },
        murmur_protocol::SendMessageParams,
        murmur_store::ConversationStore,
    };

    fn text_to(recipient: &str, text: &str) -> SendMessageParams {
        SendMessageParams {
            recipient_id: recipient.into(),
            text: Some(text.into()),
            image_ref: None,
            reference: None,
        }
    }

    fn seen_events(events: Vec<OutboundEvent>) -> Vec<String> {
        events
            .into_iter()
            .filter_map(|e| match e {
                OutboundEvent::MessagesSeen(p) => Some(p.conversation_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn marks_and_notifies_sender_once() {
        let (state, store) = test_state();
        let (_a, mut a_rx) = connect(&state, "alice").await;
        let m1 = send_message(&state, "alice", text_to("bob", "one"))
            .await
            .unwrap();
        send_message(&state, "alice", text_to("bob", "two"))
            .await
            .unwrap();
        drain(&mut a_rx);

        let first = mark_seen(&state, &m1.conversation_id, "bob").await.unwrap();
        assert_eq!(first.update.updated, 2);
        assert_eq!(first.notified, 1);
        assert_eq!(seen_events(drain(&mut a_rx)), vec![
            m1.conversation_id.clone()
        ]);

        let history = store.list_messages(&m1.conversation_id).await.unwrap();
        assert!(history.iter().all(|m| m.seen));
        let conv = store
            .get_conversation(&m1.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert!(conv.last_message.seen);

        let second = mark_seen(&state, &m1.conversation_id, "bob").await.unwrap();
        assert!(!second.update.changed());
        assert_eq!(second.notified, 0);
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn viewer_own_messages_stay_unseen() {
        let (state, store) = test_state();
        let (_b, mut b_rx) = connect(&state, "bob").await;
        let m = send_message(&state, "alice", text_to("bob", "hi"))
            .await
            .unwrap();
        drain(&mut b_rx);

        // Alice viewing her own outgoing message marks nothing and tells nobody.
        let outcome = mark_seen(&state, &m.conversation_id, "alice").await.unwrap();
        assert!(!outcome.update.changed());
        assert!(seen_events(drain(&mut b_rx)).is_empty());
        assert!(
            !store.list_messages(&m.conversation_id).await.unwrap()[0].seen
        );
    }

    #[tokio::test]
    async fn outsider_cannot_mark_seen() {
        let (state, _) = test_state();
        let m = send_message(&state, "alice", text_to("bob", "hi"))
            .await
            .unwrap();
        let err = mark_seen(&state, &m.conversation_id, "mallory")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotParticipant(_)));
    }

    #[tokio::test]
    async fn unknown_conversation() {
        let (state, _) = test_state();
        let err = mark_seen(&state, "missing", "bob").await.unwrap_err();
        assert!(matches!(err, DispatchError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn offline_sender_still_gets_store_update() {
        let (state, store) = test_state();
        let m = send_message(&state, "alice", text_to("bob", "hi"))
            .await
            .unwrap();
        let outcome = mark_seen(&state, &m.conversation_id, "bob").await.unwrap();
        assert_eq!(outcome.update.updated, 1);
        assert_eq!(outcome.notified, 0);
        assert!(store.list_messages(&m.conversation_id).await.unwrap()[0].seen);
    }
}
