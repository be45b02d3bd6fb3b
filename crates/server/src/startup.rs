// Wiring: store, registry, ledger, broadcaster, dispatcher, scheduler,
// router, middleware, and the serve loop.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, header::HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};

use crate::api::{self, ApiState};
use crate::assistant::{AssistantClient, Collaborator};
use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::dispatch::CommandDispatcher;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
};
use crate::ledger::MessageLedger;
use crate::registry::RoomRegistry;
use crate::scheduler::SummaryScheduler;
use crate::store::RoomStore;
use crate::ws::{self, WsState};

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

pub struct App {
    pub router: Router,
    pub scheduler: SummaryScheduler,
}

/// Assemble the engine from configuration. Pure wiring — nothing is
/// spawned or bound yet.
pub async fn build(config: &ServerConfig) -> anyhow::Result<App> {
    let store = match config.database_url.as_deref() {
        Some(url) => RoomStore::connect(url).await.context("failed to connect to the store")?,
        None => {
            info!("no database configured, using the in-memory store");
            RoomStore::memory()
        }
    };

    let registry = Arc::new(RoomRegistry::new(store.clone()));
    let ledger = Arc::new(MessageLedger::new(store.clone(), registry.locks()));
    let broadcaster = Broadcaster::new(Arc::clone(&registry));

    if config.ai_api_key.is_none() {
        info!("no AI API key configured, assistant replies degrade to the fallback text");
    }
    let collaborator: Arc<dyn Collaborator> = Arc::new(
        AssistantClient::new(
            config.ai_base_url.clone(),
            config.ai_model.clone(),
            config.ai_api_key.clone(),
        )
        .context("failed to build the assistant HTTP client")?,
    );

    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&ledger),
        broadcaster.clone(),
        Arc::clone(&collaborator),
    ));

    let scheduler = SummaryScheduler::new(
        store,
        Arc::clone(&ledger),
        broadcaster.clone(),
        collaborator,
    );

    let api_state = ApiState { registry: Arc::clone(&registry), ledger: Arc::clone(&ledger) };
    let ws_state = WsState { registry, ledger, broadcaster, dispatcher };
    let router = build_router(api_state, ws_state, config.cors_origins.as_deref());

    Ok(App { router, scheduler })
}

/// Bind, spawn the scheduler, and serve until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let app = build(&config).await?;
    let scheduler_task = app.scheduler.spawn();

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting chat server");

    let served = axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("chat server exited unexpectedly");

    scheduler_task.abort();
    served
}

fn build_router(api_state: ApiState, ws_state: WsState, cors_origins: Option<&str>) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(api::router(api_state))
            .merge(ws::router(ws_state)),
    )
    .layer(cors_layer(cors_origins))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        None | Some("*") => CorsLayer::permissive(),
        Some(list) => {
            let origins: Vec<HeaderValue> = list
                .split(',')
                .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
        }
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;

    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
