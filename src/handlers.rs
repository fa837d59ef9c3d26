/// Axum handlers for the Ollama API surface and its OpenAI-compatible counterpart
use crate::AppState;
use crate::api::{
    ChatRequest, EmbedRequest, EmbeddingRequest, GenerateRequest, PullRequest, ShowRequest,
    VersionResponse,
};
use crate::errors::{RouterError, Unsupported};
use crate::models::{ListModelResponse, Model};
use crate::openai::{self, EmbeddingList, OpenAiError, Reply};
use crate::stream::{self, Delivery};
use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

/// Request bodies are read whole and decoded here rather than with the `Json` extractor, so
/// that a missing body and a malformed one both come back as `{"error": ...}`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, RouterError> {
    if body.is_empty() {
        return Err(RouterError::BadRequest("missing request body".into()));
    }
    serde_json::from_slice(body).map_err(|e| RouterError::BadRequest(e.to_string()))
}

pub async fn home() -> &'static str {
    "modelmux is running"
}

#[instrument(skip(state, body))]
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, RouterError> {
    let request: ChatRequest = parse_body(&body)?;
    let delivery = Delivery::of(&request);
    info!("Received chat request for model: {}", request.model);

    let events = state.backend.chat(request).await?;
    stream::respond(delivery, events).await
}

#[instrument(skip(state, body))]
pub async fn generate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, RouterError> {
    let request: GenerateRequest = parse_body(&body)?;
    let delivery = Delivery::of(&request);
    info!("Received generate request for model: {}", request.model);

    let events = state.backend.generate(request).await?;
    stream::respond(delivery, events).await
}

#[instrument(skip(state, body))]
pub async fn pull(State(state): State<AppState>, body: Bytes) -> Result<Response, RouterError> {
    let request: PullRequest = parse_body(&body)?;
    let delivery = Delivery::of(&request);
    info!(
        "Received pull request for model: {}",
        if request.model.is_empty() {
            &request.name
        } else {
            &request.model
        }
    );

    let events = state.backend.pull(request).await?;
    stream::respond(delivery, events).await
}

#[instrument(skip(state, body))]
pub async fn embed(State(state): State<AppState>, body: Bytes) -> Result<Response, RouterError> {
    let request: EmbedRequest = parse_body(&body)?;
    info!("Received embed request for model: {}", request.model);
    Ok(Json(state.backend.embed(request).await?).into_response())
}

#[instrument(skip(state, body))]
pub async fn embeddings(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, RouterError> {
    let request: EmbeddingRequest = parse_body(&body)?;
    info!("Received embeddings request for model: {}", request.model);
    Ok(Json(state.backend.embeddings(request).await?).into_response())
}

#[instrument(skip(state, body))]
pub async fn show(State(state): State<AppState>, body: Bytes) -> Result<Response, RouterError> {
    let request: ShowRequest = parse_body(&body)?;
    debug!("Received show request: {:?}", request);
    Ok(Json(state.backend.show(request).await?).into_response())
}

#[instrument(skip(state))]
pub async fn tags(State(state): State<AppState>) -> Result<Response, RouterError> {
    let list = state.backend.list().await?;
    debug!("Listing {} models", list.models.len());
    Ok(Json(list).into_response())
}

#[instrument(skip(state))]
pub async fn ps(State(state): State<AppState>) -> Result<Response, RouterError> {
    Ok(Json(state.backend.list_running().await?).into_response())
}

#[instrument(skip(state))]
pub async fn version(State(state): State<AppState>) -> Result<Response, RouterError> {
    let version = state.backend.version().await?;
    Ok(Json(VersionResponse { version }).into_response())
}

/// The aggregated model list in the OpenAI `/v1/models` shape.
#[instrument(skip(state))]
pub async fn models(State(state): State<AppState>) -> Result<Response, OpenAiError> {
    let list = state.backend.list().await?;
    Ok(Json(ListModelResponse::from(&list)).into_response())
}

/// A single model in the OpenAI shape, answered from the owning backend's show.
#[instrument(skip(state))]
pub async fn model(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> Result<Response, OpenAiError> {
    let show = state
        .backend
        .show(ShowRequest {
            model: model.clone(),
            ..Default::default()
        })
        .await?;
    Ok(Json(Model::from_show(&model, &show)).into_response())
}

#[instrument(skip(state, body))]
pub async fn chat_completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, OpenAiError> {
    let request: openai::ChatCompletionRequest = parse_body(&body)?;
    info!("Received chat completion request for model: {}", request.model);
    let streaming = request.streaming();
    let include_usage = request.include_usage();

    let events = state.backend.chat(request.into_ollama()?).await?;
    let reply = Reply::new(Reply::CHAT);
    if streaming {
        let chunks = stream::spawn_producer(events)
            .map(move |event| event.map(|event| reply.chat_chunks(event, include_usage)));
        return Ok(openai::sse_response(chunks));
    }
    let response = stream::collect(events).await?;
    Ok(Json(reply.chat_completion(response)).into_response())
}

#[instrument(skip(state, body))]
pub async fn completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, OpenAiError> {
    let request: openai::CompletionRequest = parse_body(&body)?;
    info!("Received completion request for model: {}", request.model);
    let streaming = request.streaming();
    let include_usage = request.include_usage();

    let events = state.backend.generate(request.into_ollama()).await?;
    let reply = Reply::new(Reply::COMPLETION);
    if streaming {
        let chunks = stream::spawn_producer(events)
            .map(move |event| event.map(|event| reply.completion_chunks(event, include_usage)));
        return Ok(openai::sse_response(chunks));
    }
    let response = stream::collect(events).await?;
    Ok(Json(reply.completion(response)).into_response())
}

#[instrument(skip(state, body))]
pub async fn openai_embeddings(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, OpenAiError> {
    let request: openai::EmbeddingRequest = parse_body(&body)?;
    info!("Received OpenAI embeddings request for model: {}", request.model);
    let model = request.model.clone();

    let response = state.backend.embed(request.into_ollama()?).await?;
    Ok(Json(EmbeddingList::new(model, response)).into_response())
}

pub async fn create_model() -> RouterError {
    RouterError::Unsupported(Unsupported::Create)
}

pub async fn push_model() -> RouterError {
    RouterError::Unsupported(Unsupported::Push)
}

pub async fn copy_model() -> RouterError {
    RouterError::Unsupported(Unsupported::Copy)
}

pub async fn delete_model() -> RouterError {
    RouterError::Unsupported(Unsupported::Delete)
}

pub async fn blob() -> RouterError {
    RouterError::Unsupported(Unsupported::Blob)
}
