use axum::http::StatusCode;

use {
    murmur_protocol::{ErrorShape, error_codes},
    murmur_store::StoreError,
};

/// Failures surfaced synchronously to whoever asked for a send or a seen
/// update. Delivery failures never show up here.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    Invalid(String),

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("not a participant of conversation {0}")]
    NotParticipant(String),

    #[error("persistence failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConversationNotFound(id) => Self::ConversationNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => error_codes::INVALID_REQUEST,
            Self::UnknownRecipient(_) | Self::ConversationNotFound(_) => error_codes::NOT_FOUND,
            Self::NotParticipant(_) => error_codes::FORBIDDEN,
            Self::Store(_) => error_codes::UNAVAILABLE,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::UnknownRecipient(_) | Self::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotParticipant(_) => StatusCode::FORBIDDEN,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn to_error_shape(&self) -> ErrorShape {
        ErrorShape::new(self.code(), self.to_string())
    }
}
