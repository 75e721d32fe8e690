//! Web server module for the exporter.
//!
//! Serves one text exposition endpoint per active metrics path, plus a landing
//! page and a liveness check.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::collector::CollectorRegistry;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

/// Create the Axum router with all routes.
///
/// Every path active in `registry` gets a scrape route. Paths registered
/// after this call are not served.
pub fn create_router(registry: Arc<CollectorRegistry>) -> Router {
    let mut router = Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(healthz_handler));

    for path in registry.paths() {
        router = router.route(&path, get(scrape_handler));
    }

    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(registry)
}

/// Landing page listing the active metrics paths.
async fn index_handler(State(registry): State<Arc<CollectorRegistry>>) -> Html<String> {
    let links: String = registry
        .paths()
        .iter()
        .map(|p| format!("<li><a href=\"{p}\">{p}</a></li>"))
        .collect();

    Html(format!(
        "<html><head><title>Elasticsearch Exporter</title></head>\
         <body><h1>Elasticsearch Exporter</h1><ul>{links}</ul></body></html>"
    ))
}

/// Liveness check.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Collect the collector bound to the request path.
async fn scrape_handler(State(registry): State<Arc<CollectorRegistry>>, uri: Uri) -> Response {
    match registry.scrape(uri.path()).await {
        Some(Ok(body)) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Some(Err(e)) => {
            tracing::error!(path = %uri.path(), error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
