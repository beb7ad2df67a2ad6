use axum::{Json, extract::State, http::StatusCode};
use std::sync::Arc;
use std::time::Instant;

use crate::client::SerpApi;
use crate::config::MAX_PAGES_LIMIT;
use crate::data_models::QueryResult;
use crate::fetcher::fetch_query;

use super::AppState;
use super::models::{DEFAULT_MAX_PAGES, ErrorResponse, SearchRequest};

pub async fn search_handler<A>(
    State(state): State<Arc<AppState<A>>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<QueryResult>, (StatusCode, Json<ErrorResponse>)>
where
    A: SerpApi + 'static,
{
    let start = Instant::now();

    let query = request.query.trim();
    if query.is_empty() {
        return Err(bad_request("Query is required".to_string()));
    }

    let max_pages = request.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
    if max_pages > MAX_PAGES_LIMIT {
        return Err(bad_request(format!("max_pages must be at most {MAX_PAGES_LIMIT}")));
    }
    let concurrency = request.concurrency.unwrap_or(state.default_concurrency);

    let result = fetch_query(
        state.api.clone(),
        query,
        max_pages,
        concurrency,
        &state.settings,
    )
    .await;

    tracing::info!(
        query,
        max_pages,
        concurrency,
        organic = result.organic.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "search served"
    );

    Ok(Json(result))
}

fn bad_request(error: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error }))
}
