//! modelmux - a model-aware reverse proxy for Ollama-compatible servers
//!
//! Several independent backends are served behind one endpoint. Each request is routed to the
//! backend that owns the requested model (resolving aliases on the way), and administrative
//! queries such as the model list are answered by asking every backend and merging the results.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum_prometheus::{
    GenericMetricLayer, Handle, PrometheusMetricLayerBuilder,
    metrics_exporter_prometheus::PrometheusHandle,
};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{info, instrument};

pub mod api;
pub mod client;
pub mod connection;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod name;
pub mod ndjson;
pub mod openai;
pub mod router;
pub mod stream;
pub mod test_utils;
pub mod traits;

use traits::Backend;

/// The application state shared by every handler
#[derive(Clone, Debug)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

/// Build the main router for the proxy
/// This creates routes for:
/// - `/api/*` - The Ollama API, routed by model or aggregated across backends
/// - `/v1/*` - OpenAI-compatible chat, completions, embeddings and models, translated to and
///   from the same Ollama calls
#[instrument(skip(state))]
pub fn build_router(state: AppState) -> Router {
    info!("Building router");
    Router::new()
        .route("/", get(handlers::home))
        .route("/api/chat", post(handlers::chat))
        .route("/api/generate", post(handlers::generate))
        .route("/api/pull", post(handlers::pull))
        .route("/api/embed", post(handlers::embed))
        .route("/api/embeddings", post(handlers::embeddings))
        .route("/api/show", post(handlers::show))
        .route("/api/tags", get(handlers::tags))
        .route("/api/ps", get(handlers::ps))
        .route("/api/version", get(handlers::version))
        .route("/api/create", post(handlers::create_model))
        .route("/api/push", post(handlers::push_model))
        .route("/api/copy", post(handlers::copy_model))
        .route("/api/delete", delete(handlers::delete_model))
        .route(
            "/api/blobs/{digest}",
            post(handlers::blob).head(handlers::blob),
        )
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/completions", post(handlers::completions))
        .route("/v1/embeddings", post(handlers::openai_embeddings))
        // GET routes also answer HEAD, without a body
        .route("/v1/models", get(handlers::models))
        .route("/v1/models/{model}", get(handlers::model))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Builds a router for the metrics endpoint.
#[instrument(skip(handle))]
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    info!("Building metrics router");
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

type MetricsLayerAndHandle = (
    GenericMetricLayer<'static, PrometheusHandle, Handle>,
    PrometheusHandle,
);

/// Builds a layer and handle for prometheus metrics collection.
///
/// # Parameters
/// - `prefix`: A string prefix for the metrics, which can be either a string literal or an owned string.
///   The `'static` lifetime is required by the Prometheus metrics layer.
pub fn build_metrics_layer_and_handle(
    prefix: impl Into<Cow<'static, str>>,
) -> MetricsLayerAndHandle {
    info!("Building metrics layer");
    PrometheusMetricLayerBuilder::new()
        .with_prefix(prefix)
        .enable_response_body_size(true)
        .with_endpoint_label_type(axum_prometheus::EndpointLabel::Exact)
        .with_default_metrics()
        .build_pair()
}
