use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::get,
    },
    tracing::info,
};

use {lunar_config::LunarConfig, lunar_roster::Roster};

use crate::{
    accounts::{AccountService, InMemoryAccounts},
    dispatch::DispatchTable,
    state::GatewayState,
    ws::handle_connection,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
    dispatch: Arc<DispatchTable>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway state with a freshly spawned roster loop.
pub fn build_state(config: LunarConfig, accounts: Arc<dyn AccountService>) -> Arc<GatewayState> {
    let (roster, _task) = Roster::spawn();
    GatewayState::new(config, roster, accounts)
}

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>, dispatch: Arc<DispatchTable>) -> Router {
    let app_state = AppState {
        gateway: state,
        dispatch,
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .with_state(app_state)
}

/// Start the gateway HTTP + WebSocket server.
pub async fn start_gateway(config: LunarConfig) -> anyhow::Result<()> {
    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let state = build_state(config, Arc::new(InMemoryAccounts::new()));
    let dispatch = Arc::new(DispatchTable::new());

    let app = build_gateway_app(Arc::clone(&state), Arc::clone(&dispatch));

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        version = %state.version,
        protocol = lunar_protocol::PROTOCOL_VERSION,
        %addr,
        handlers = dispatch.ids().len(),
        "lunar gateway listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.gateway.roster.count().await.unwrap_or(0);
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "hostname": state.gateway.hostname,
        "protocol": lunar_protocol::PROTOCOL_VERSION,
        "connections": connections,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway, state.dispatch, addr))
}
