use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, Query, State, WebSocketUpgrade},
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    chatrelay_auth::TokenService,
    chatrelay_config::RelayConfig,
    chatrelay_protocol::{TOKEN_QUERY_PARAM, WS_PATH},
    chatrelay_store::SqliteStore,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{
    api::{self, ApiError},
    session::Session,
    state::GatewayState,
    ws::handle_connection,
};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route(WS_PATH, get(ws_upgrade_handler))
        .route("/ws/stats", get(api::ws_stats))
        .nest("/api", api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Token service from config, or a per-process random key if no secret is
/// configured.
pub fn token_service(config: &RelayConfig) -> TokenService {
    let ttl = config.auth.token_ttl_hours;
    match config.token_secret() {
        Some(secret) => TokenService::new(secret, ttl),
        None => {
            warn!("auth.token_secret is not set; tokens will not survive a restart");
            TokenService::ephemeral(ttl)
        },
    }
}

/// Start the HTTP + WebSocket server and run until ctrl-c / SIGTERM.
pub async fn start_gateway(config: &RelayConfig) -> anyhow::Result<()> {
    let store = SqliteStore::connect(&config.database.url).await?;
    let state = GatewayState::new(token_service(config), store);
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("chatrelay v{} on {}", state.version, state.hostname),
        format!("listening on {addr}"),
        format!("realtime: ws://{addr}{WS_PATH}?{TOKEN_QUERY_PARAM}=..."),
        format!("token ttl: {}h", config.auth.token_ttl_hours),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let shutdown_state = Arc::clone(&state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let closed = shutdown_state.registry.close_all().await;
        info!(closed, "shutting down");
    })
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let stats = state.stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "websocket": stats,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let mut session = Session::new(Arc::clone(&state.relay));
    let token = params.get(TOKEN_QUERY_PARAM).map(String::as_str);
    if let Err(e) = session.authenticate(&state.tokens, token) {
        info!(remote = %addr, error = %e, "ws: rejected upgrade");
        return ApiError::Unauthorized("invalid or expired token").into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, session, addr))
}
