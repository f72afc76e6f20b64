//! Message Dispatcher: validate, persist, then fan out to the recipient.

use std::time::Instant;

use tracing::{debug, info};

use {
    murmur_metrics::{DISPATCH_DURATION_SECONDS, MESSAGES_SENT_TOTAL, counter, histogram},
    murmur_protocol::{Message, OutboundEvent, SendMessageParams},
    murmur_store::NewMessage,
};

use crate::{broadcast::push_to_user, error::DispatchError, state::GatewayState};

/// Validated message content.
#[derive(Debug)]
struct Content {
    text: String,
    image_path: Option<String>,
}

fn validate(
    state: &GatewayState,
    sender_id: &str,
    params: &SendMessageParams,
) -> Result<Content, DispatchError> {
    let recipient = params.recipient_id.trim();
    if recipient.is_empty() {
        return Err(DispatchError::Invalid("recipientId is required".into()));
    }
    if recipient == sender_id {
        return Err(DispatchError::Invalid("cannot message yourself".into()));
    }

    let text = params.text.clone().unwrap_or_default();
    let image_path = params
        .image_ref
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    if text.trim().is_empty() && image_path.is_none() {
        return Err(DispatchError::Invalid(
            "message needs text or an image".into(),
        ));
    }
    let max = state.options.max_text_chars;
    if text.chars().count() > max {
        return Err(DispatchError::Invalid(format!(
            "text exceeds {max} characters"
        )));
    }
    Ok(Content { text, image_path })
}

/// Persist a message from `sender_id` and push it to every live connection
/// of the recipient.
///
/// Persistence happens-before delivery: when the store fails nothing is
/// pushed and the error is returned. Sends within one conversation hold its
/// write turn through fan-out, so each recipient connection sees them in
/// persisted order.
pub async fn send_message(
    state: &GatewayState,
    sender_id: &str,
    params: SendMessageParams,
) -> Result<Message, DispatchError> {
    let content = validate(state, sender_id, &params)?;
    let recipient_id = params.recipient_id.trim();
    if !state.directory.contains(recipient_id).await {
        return Err(DispatchError::UnknownRecipient(recipient_id.to_string()));
    }

    let started = Instant::now();
    let conversation = state
        .store
        .find_or_create_conversation(sender_id, recipient_id)
        .await?;

    let _turn = state.lock_conversation(&conversation.id).await;
    let message = state
        .store
        .insert_message(NewMessage {
            conversation_id: conversation.id.clone(),
            sender_id: sender_id.to_string(),
            text: content.text,
            image_path: content.image_path,
        })
        .await?;
    counter!(MESSAGES_SENT_TOTAL).increment(1);

    let delivered =
        push_to_user(state, recipient_id, &OutboundEvent::NewMessage(message.clone())).await;
    histogram!(DISPATCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    if delivered == 0 {
        debug!(message_id = %message.id, recipient_id, "recipient offline, message stored");
    } else {
        info!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            delivered,
            "message delivered"
        );
    }
    Ok(message)
}
