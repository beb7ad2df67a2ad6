use axum::{Router, routing::post};
use std::path::Path;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};

use crate::client::SerpApi;
use crate::config::FetchSettings;

pub mod handlers;
pub mod models;

/// Shared by every request: the API collaborator plus fetch tuning.
pub struct AppState<A> {
    pub api: Arc<A>,
    pub settings: FetchSettings,
    pub default_concurrency: usize,
}

pub fn create_router<A>(state: Arc<AppState<A>>, static_dir: impl AsRef<Path>) -> Router
where
    A: SerpApi + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", post(handlers::search_handler::<A>))
        .with_state(state)
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
}
