use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        response::IntoResponse,
        routing::{get, post},
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    murmur_config::MurmurConfig,
    murmur_protocol::{MAX_PAYLOAD_BYTES, PROTOCOL_VERSION},
    murmur_store::{ConversationStore, MemoryConversationStore, SqliteConversationStore},
};

use crate::{
    api::{self, AuthUser},
    auth,
    broadcast::spawn_presence_broadcaster,
    directory,
    state::{GatewayOptions, GatewayState},
    ws::handle_connection,
};

/// Frames above this size close the connection; frames between
/// `MAX_PAYLOAD_BYTES` and this are read, then dropped by the decoder.
const MAX_WS_MESSAGE_BYTES: usize = MAX_PAYLOAD_BYTES * 4;

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
    #[cfg(feature = "prometheus")]
    pub metrics: Option<murmur_metrics::PrometheusHandle>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    router(AppState {
        gateway: state,
        #[cfg(feature = "prometheus")]
        metrics: None,
    })
}

fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(api::health))
        .route("/ws", get(ws_upgrade_handler))
        .route("/api/messages", post(api::send_message))
        .route("/api/messages/conversations", get(api::list_conversations))
        .route("/api/messages/seen", post(api::mark_seen))
        .route("/api/messages/{other_user_id}", get(api::message_history))
        .route("/api/users/online", get(api::online_users));

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(api::metrics));

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open the configured Conversation Store. `in_memory` (or `store.in_memory`)
/// selects the volatile store used for development.
pub async fn open_store(
    config: &MurmurConfig,
    in_memory: bool,
) -> anyhow::Result<Arc<dyn ConversationStore>> {
    if in_memory || config.store.in_memory {
        info!("using in-memory conversation store");
        return Ok(Arc::new(MemoryConversationStore::new()));
    }

    let url = match &config.store.database_url {
        Some(url) => url.clone(),
        None => {
            let dir = murmur_config::data_dir();
            std::fs::create_dir_all(&dir)?;
            format!("sqlite://{}/murmur.db?mode=rwc", dir.display())
        },
    };
    let store = SqliteConversationStore::connect(&url).await?;
    info!(database = %url, "conversation store ready");
    Ok(Arc::new(store))
}

/// Start the gateway HTTP + WebSocket server and run until ctrl-c.
pub async fn start_gateway(config: MurmurConfig, in_memory: bool) -> anyhow::Result<()> {
    let resolved_auth = auth::resolve_auth(config.auth.resolve_secret(), &config.auth.cookie_name);
    if !resolved_auth.is_configured() {
        warn!("no jwt secret configured (auth.jwt_secret / MURMUR_JWT_SECRET); every client will be rejected");
    }

    let store = open_store(&config, in_memory).await?;
    let directory = directory::from_config(&config.users);
    let state = GatewayState::new(
        store,
        directory,
        resolved_auth,
        GatewayOptions::from_config(&config),
    );

    let broadcaster = spawn_presence_broadcaster(Arc::clone(&state));

    #[cfg(feature = "prometheus")]
    let metrics = match murmur_metrics::install_prometheus() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "prometheus recorder unavailable, /metrics disabled");
            None
        },
    };

    let app = router(AppState {
        gateway: Arc::clone(&state),
        #[cfg(feature = "prometheus")]
        metrics,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("murmur gateway v{}", state.version),
        format!("protocol v{PROTOCOL_VERSION}, listening on {addr}"),
        format!(
            "auth: {}",
            if state.auth.is_configured() {
                "jwt"
            } else {
                "not configured"
            }
        ),
        format!(
            "store: {}",
            if in_memory || config.store.in_memory {
                "memory"
            } else {
                "sqlite"
            }
        ),
    ];
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let shutdown = state.shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            shutdown.cancelled().await;
        }
        info!("shutting down");
        shutdown.cancel();
    })
    .await?;

    state.shutdown.cancel();
    if let Err(e) = broadcaster.await {
        warn!(error = %e, "presence broadcaster ended abnormally");
    }
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler(
    AuthUser(user_id): AuthUser,
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, state.gateway, user_id, addr))
}
