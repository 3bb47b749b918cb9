//! HTTP surface of the service.

pub mod auth;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod tiles;

use crate::config::AppConfig;
use crate::conversations::ConversationService;
use crate::error::AppError;
use crate::proximity::ProximityService;
use crate::store::PropertyStore;
use crate::viewport::ViewportPlanner;
use anyhow::Result;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::Router;
use std::any::Any;
use std::sync::Arc;
use tiles::TileRelay;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PropertyStore>,
    pub planner: ViewportPlanner,
    pub proximity: Arc<ProximityService>,
    pub conversations: ConversationService,
    pub tiles: Arc<TileRelay>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(store: Arc<dyn PropertyStore>, config: &AppConfig) -> Result<Self> {
        Ok(Self {
            planner: ViewportPlanner::new(store.clone()),
            proximity: Arc::new(ProximityService::new(store.clone(), config.cache_ttl())),
            conversations: ConversationService::new(store.clone()),
            tiles: Arc::new(TileRelay::new(
                config.tile_upstream_url.clone(),
                config.request_timeout(),
            )?),
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
            store,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/properties", get(handlers::properties))
        .route("/properties/:id/intent", patch(handlers::update_intent))
        .route("/properties/:id/proximity", get(handlers::proximity))
        .route("/area-vibe", get(handlers::area_vibe))
        .route("/intent-overlay", post(handlers::intent_overlay))
        .route("/claim", post(handlers::claim))
        .route(
            "/conversations",
            get(handlers::inbox).post(handlers::start_conversation),
        )
        .route("/tiles/:z/:x/:y", get(handlers::tile))
        .with_state(state);
    with_outer_layers(routes)
}

/// Tracing, CORS and panic recovery shared by every route.
///
/// A panicking handler answers with the generic `INTERNAL_ERROR` envelope.
pub fn with_outer_layers(routes: Router) -> Router {
    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    AppError::Internal(format!("handler panicked: {detail}")).into_response()
}
