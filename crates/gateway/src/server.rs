use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Json, Router,
        extract::{DefaultBodyLimit, State},
        middleware,
        response::IntoResponse,
        routing::{get, post},
    },
    parley_campaigns::{CampaignScheduler, recover_interrupted},
    parley_common::now_ms,
    parley_config::ParleyConfig,
    parley_conversations::WindowSweeper,
    parley_store::{SqliteStore, Store},
    tower_http::{
        cors::{Any, CorsLayer},
        services::ServeDir,
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{
    auth_middleware::require_api_key, campaign_routes, conversation_routes, state::GatewayState,
    upload_routes, webhook_routes,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

/// Room for headers and framing on top of the configured upload limit, so an
/// oversized file reaches the handler and gets a structured error.
const UPLOAD_SLACK_BYTES: usize = 64 * 1024;

/// Build the router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app_state = AppState {
        gateway: Arc::clone(&state),
    };

    let api = Router::new()
        .route(
            "/api/conversations/{id}",
            get(conversation_routes::get_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            post(conversation_routes::send_message),
        )
        .route("/api/campaigns", post(campaign_routes::create_campaign))
        .route("/api/campaigns/{id}", get(campaign_routes::get_campaign))
        .route(
            "/api/campaigns/{id}/analytics",
            get(campaign_routes::campaign_analytics),
        )
        .route(
            "/api/campaigns/{id}/pause",
            post(campaign_routes::pause_campaign),
        )
        .route(
            "/api/campaigns/{id}/resume",
            post(campaign_routes::resume_campaign),
        )
        .route(
            "/api/media",
            post(upload_routes::upload_media).layer(DefaultBodyLimit::max(
                state.media.max_bytes + UPLOAD_SLACK_BYTES,
            )),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks/inbound", post(webhook_routes::inbound_message))
        .route("/webhooks/status", post(webhook_routes::delivery_status))
        .nest_service("/media", ServeDir::new(&state.media.dir))
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Open the store, start background jobs and serve until ctrl-c.
pub async fn start_gateway(config: ParleyConfig) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("opening database {}", config.database.url))?,
    );
    let transport = parley_transport::build_transport(&config.transport)
        .context("building message transport")?;
    info!(transport = transport.name(), "transport ready");

    tokio::fs::create_dir_all(&config.media.upload_dir)
        .await
        .with_context(|| format!("creating upload dir {}", config.media.upload_dir))?;

    let state = GatewayState::new(&config, Arc::clone(&store), transport);

    let resumed = recover_interrupted(store.as_ref(), &state.dispatcher, now_ms()).await?;
    if resumed > 0 {
        warn!(resumed, "resumed campaigns interrupted by the previous shutdown");
    }

    let sweeper = WindowSweeper::start(
        Arc::clone(&store),
        Duration::from_secs(config.window.sweep_interval_secs),
    );
    let scheduler = CampaignScheduler::start(
        Arc::clone(&store),
        Arc::clone(&state.dispatcher),
        Duration::from_secs(config.campaigns.scheduler_interval_secs),
    );

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        addr = %listener.local_addr()?,
        public_url = %config.server.public_base(),
        auth = config.auth.is_enabled(),
        "gateway listening"
    );

    let app = build_gateway_app(state);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.stop().await;
    scheduler.stop().await;
    info!("gateway stopped");
    served.context("serving HTTP")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "transport": state.gateway.transport.name(),
    }))
}
