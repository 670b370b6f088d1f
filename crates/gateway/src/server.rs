use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        http::{HeaderMap, Uri, header::SEC_WEBSOCKET_PROTOCOL},
        response::{IntoResponse, Json},
        routing::get,
    },
    tokio::net::TcpListener,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use chargegate_config::ChargegateConfig;

use crate::{
    auth::{AdmissionRequest, StaticCredentialStore},
    state::GatewayState,
    ws::handle_connection,
};

/// Environment variable with extra comma-separated tokens.
pub const TOKENS_ENV: &str = "CHARGEGATE_TOKENS";

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
///
/// Any path other than `/health` is a WebSocket endpoint; the final path
/// segment names the station. `/health` itself is reserved, so a station
/// called `health` must connect under a prefix such as `/ocpp/health`.
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(ws_upgrade_handler))
        .route("/{*path}", get(ws_upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the gateway on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_gateway_app(state);
    // ConnectInfo gives handlers the remote address.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Start the gateway HTTP + WebSocket server and run until Ctrl-C.
pub async fn start_gateway(config: ChargegateConfig) -> anyhow::Result<()> {
    let env_tokens = std::env::var(TOKENS_ENV).ok();
    let (credentials, generated) =
        StaticCredentialStore::seed(&config.auth, env_tokens.as_deref());
    for token in &generated {
        info!(token = %token, "generated authentication token");
    }
    if credentials.is_empty() {
        warn!("no authentication tokens configured; every connection will be rejected");
    }
    let token_count = credentials.len();

    let state = GatewayState::from_config(&config, Arc::new(credentials));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    // Startup banner.
    let telemetry = match &state.telemetry {
        Some(plan) => format!(
            "telemetry: {} samples every {} ms",
            plan.samples.len(),
            plan.interval.as_millis()
        ),
        None => "telemetry: disabled".to_string(),
    };
    let lines = [
        format!("chargegate v{}", state.version),
        format!(
            "subprotocol {}, listening on {}",
            state.subprotocol,
            listener.local_addr()?
        ),
        format!(
            "{} actions registered: {}",
            state.actions.action_names().len(),
            state.actions.action_names().join(", ")
        ),
        format!("{token_count} tokens accepted"),
        telemetry,
    ];
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let shutdown_state = Arc::clone(&state);
    serve(listener, state, async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        let closed = shutdown_state.close_all("server shutting down").await;
        info!(sessions = closed, "server stopped by user");
    })
    .await
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let count = state.session_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "subprotocol": state.subprotocol,
        "sessions": count,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let offered = headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == state.subprotocol);
    if !offered {
        warn!(
            path = %uri.path(),
            remote_ip = %addr.ip(),
            subprotocol = %state.subprotocol,
            "client did not offer the gateway subprotocol"
        );
    }

    let request = AdmissionRequest::from_uri(&uri);
    let protocols = [state.subprotocol.clone()];
    ws.protocols(protocols)
        .on_upgrade(move |socket| handle_connection(socket, state, request, addr))
}
