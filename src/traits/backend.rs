//! The capability every backend connection offers
//!
//! The router only ever talks to a backend through this trait. [`crate::client::OllamaClient`]
//! implements it over HTTP, [`crate::router::Router`] implements it by dispatching to the
//! right connection, and tests implement it with in-memory mocks.

use crate::api::{
    ChatRequest, ChatResponse, CopyRequest, CreateRequest, DeleteRequest, EmbedRequest,
    EmbedResponse, EmbeddingRequest, EmbeddingResponse, GenerateRequest, GenerateResponse,
    ListResponse, ProcessResponse, ProgressResponse, PullRequest, PushRequest, ShowRequest,
    ShowResponse,
};
use crate::errors::RouterError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

/// An ordered sequence of events from one streaming backend call.
///
/// An `Err` item is a mid-stream failure reported by the backend. Dropping the stream cancels
/// the underlying call.
pub type EventStream<T> = BoxStream<'static, Result<T, RouterError>>;

/// Trait for anything that can serve the Ollama API.
///
/// Cancellation is by drop: callers abandon a call by dropping its future (or, for streaming
/// calls, the returned [`EventStream`]).
///
/// # Example
///
/// ```ignore
/// use modelmux::traits::Backend;
///
/// async fn ping(backend: &dyn Backend) {
///     if let Err(e) = backend.heartbeat().await {
///         tracing::warn!(error = %e, "backend is not answering");
///     }
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<EventStream<GenerateResponse>, RouterError>;

    async fn chat(&self, request: ChatRequest) -> Result<EventStream<ChatResponse>, RouterError>;

    async fn pull(
        &self,
        request: PullRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError>;

    async fn push(
        &self,
        request: PushRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError>;

    async fn create(
        &self,
        request: CreateRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError>;

    async fn list(&self) -> Result<ListResponse, RouterError>;

    async fn list_running(&self) -> Result<ProcessResponse, RouterError>;

    async fn copy(&self, request: CopyRequest) -> Result<(), RouterError>;

    async fn delete(&self, request: DeleteRequest) -> Result<(), RouterError>;

    async fn show(&self, request: ShowRequest) -> Result<ShowResponse, RouterError>;

    async fn heartbeat(&self) -> Result<(), RouterError>;

    async fn embed(&self, request: EmbedRequest) -> Result<EmbedResponse, RouterError>;

    async fn embeddings(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, RouterError>;

    async fn create_blob(&self, digest: &str, body: Bytes) -> Result<(), RouterError>;

    async fn version(&self) -> Result<String, RouterError>;
}
