//! REST surface for clients that need history or a non-socket send path.
//!
//! Every route authenticates the same way as the WebSocket handshake and runs
//! writes through the same dispatcher and reconciler as socket events.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{FromRequestParts, Path, Query, State},
        http::{StatusCode, request::Parts},
        response::{IntoResponse, Response},
    },
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use {
    murmur_protocol::{
        Conversation, ErrorShape, Message, OnlineUsersPayload, SendMessageParams, error_codes,
    },
    murmur_store::StoreError,
};

use crate::{
    auth::{AuthError, extract_token, verify_token},
    dispatcher,
    error::DispatchError,
    inbound::run_detached,
    seen::{self, SeenOutcome},
    server::AppState,
};

// ── Errors ───────────────────────────────────────────────────────────────────

/// An error rendered as `{ "error": ErrorShape }` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    shape: ErrorShape,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            shape: ErrorShape::new(code, message),
        }
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::UNAVAILABLE,
            "request could not be completed",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.shape })),
        )
            .into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        Self {
            status: e.status(),
            shape: e.to_error_shape(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        DispatchError::from(e).into()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        debug!(error = %e, "rejecting unauthenticated request");
        Self::new(StatusCode::UNAUTHORIZED, error_codes::UNAUTHORIZED, e.to_string())
    }
}

// ── Identity extractor ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// The verified caller. Rejects with 401 before any handler (or WebSocket
/// upgrade) runs.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let query_token = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token);
        let auth = &state.gateway.auth;
        let token = extract_token(auth, &parts.headers, query_token.as_deref());
        let user_id = verify_token(auth, token.as_deref())?;
        Ok(Self(user_id))
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations = state.gateway.store.list_conversations(&user_id).await?;
    Ok(Json(conversations))
}

pub async fn message_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(other_user_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let store = &state.gateway.store;
    let Some(conversation) = store
        .find_conversation_between(&user_id, &other_user_id)
        .await?
    else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(store.list_messages(&conversation.id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub recipient_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let params = SendMessageParams {
        recipient_id: body.recipient_id,
        text: body.text,
        image_ref: body.image_ref,
        reference: None,
    };
    let gateway = Arc::clone(&state.gateway);
    let message = run_detached(async move {
        dispatcher::send_message(&gateway, &user_id, params).await
    })
    .await
    .ok_or_else(ApiError::internal)??;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSeenBody {
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSeenResponse {
    pub conversation_id: String,
    pub updated: u64,
}

pub async fn mark_seen(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<MarkSeenBody>,
) -> Result<Json<MarkSeenResponse>, ApiError> {
    let gateway = Arc::clone(&state.gateway);
    let conversation_id = body.conversation_id.clone();
    let SeenOutcome { update, .. } = run_detached(async move {
        seen::mark_seen(&gateway, &conversation_id, &user_id).await
    })
    .await
    .ok_or_else(ApiError::internal)??;
    Ok(Json(MarkSeenResponse {
        conversation_id: body.conversation_id,
        updated: update.updated,
    }))
}

pub async fn online_users(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> Json<OnlineUsersPayload> {
    Json(OnlineUsersPayload {
        user_ids: state.gateway.presence.online_user_ids().await,
    })
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let gateway = &state.gateway;
    Json(serde_json::json!({
        "status": "ok",
        "version": gateway.version,
        "protocol": murmur_protocol::PROTOCOL_VERSION,
        "connections": gateway.presence.connection_count().await,
        "online": gateway.presence.online_count().await,
        "auth": gateway.auth.is_configured(),
    }))
}

#[cfg(feature = "prometheus")]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => {
            debug!("metrics requested but no recorder is installed");
            StatusCode::NOT_FOUND.into_response()
        },
    }
}
