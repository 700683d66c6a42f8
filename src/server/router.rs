use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{config, documents, health, query};
use crate::server::ws::handler::ws_handler;
use crate::state::AppState;

/// Room for multipart framing around the largest accepted file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Creates the application router: health and config, the document and
/// query API under `/api/v1`, and the `/ws/query` socket.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server.cors_allowed_origins);
    let upload_limit = usize::try_from(state.documents.max_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/config", get(config::get_config))
        .route(
            "/api/v1/documents",
            get(documents::list_documents)
                .post(documents::upload_document)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/v1/documents/:document_id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route(
            "/api/v1/documents/:document_id/reprocess",
            post(documents::reprocess_document),
        )
        .route("/api/v1/query", post(query::query))
        .route("/api/v1/query/stream", post(query::query_stream))
        .route("/api/v1/query/history", get(query::query_history))
        .route("/ws/query", get(ws_handler))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

/// Configured origins, or any origin when none are configured.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

