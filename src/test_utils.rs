//! Test doubles for the HTTP client and backend traits
use crate::api::{
    ChatRequest, ChatResponse, CopyRequest, CreateRequest, DeleteRequest, EmbedRequest,
    EmbedResponse, EmbeddingRequest, EmbeddingResponse, GenerateRequest, GenerateResponse,
    ListModelResponse, ListResponse, ProcessModelResponse, ProcessResponse, ProgressResponse,
    PullRequest, PushRequest, ShowRequest, ShowResponse,
};
use crate::client::HttpClient;
use crate::errors::RouterError;
use crate::traits::{Backend, EventStream};
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MockHttpClient {
    pub requests: Arc<Mutex<Vec<MockRequest>>>,
    response_builder: Arc<dyn Fn() -> axum::response::Response + Send + Sync>,
}

#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockHttpClient {
    pub fn new(status: StatusCode, body: &str) -> Self {
        let body = body.to_string();
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_builder: Arc::new(move || {
                axum::response::Response::builder()
                    .status(status)
                    .body(axum::body::Body::from(body.clone()))
                    .unwrap()
            }),
        }
    }

    pub fn new_streaming(status: StatusCode, chunks: Vec<String>) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_builder: Arc::new(move || {
                use axum::body::Body;
                use futures_util::stream;

                let stream = stream::iter(
                    chunks
                        .clone()
                        .into_iter()
                        .map(|chunk| Ok::<_, std::io::Error>(chunk.into_bytes())),
                );

                axum::response::Response::builder()
                    .status(status)
                    .header("content-type", "application/x-ndjson")
                    .body(Body::from_stream(stream))
                    .unwrap()
            }),
        }
    }

    pub fn get_requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for MockHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHttpClient")
            .field("requests", &self.requests)
            .field("response_builder", &"<closure>")
            .finish()
    }
}

impl Clone for MockHttpClient {
    fn clone(&self) -> Self {
        Self {
            requests: Arc::clone(&self.requests),
            response_builder: Arc::clone(&self.response_builder),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let headers = req
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
            .to_vec();

        self.requests.lock().unwrap().push(MockRequest {
            method,
            uri,
            headers,
            body,
        });

        Ok((self.response_builder)())
    }
}

/// A call received by a [`MockBackend`]: the operation and the model it named, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: &'static str,
    pub model: String,
}

/// An in-memory backend with canned answers.
///
/// Streaming operations replay `events` in order; an event of the form `{"error": "..."}` is
/// replayed as a mid-stream failure.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    calls: Arc<Mutex<Vec<MockCall>>>,
    completed: Arc<AtomicUsize>,
    events: Vec<Value>,
    list: ListResponse,
    running: ProcessResponse,
    version: String,
    failure: Option<RouterError>,
    delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, events: Vec<Value>) -> Self {
        self.events = events;
        self
    }

    pub fn with_models(mut self, models: Vec<ListModelResponse>) -> Self {
        self.list = ListResponse { models };
        self
    }

    pub fn with_running(mut self, models: Vec<ProcessModelResponse>) -> Self {
        self.running = ProcessResponse { models };
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Every call fails with `error`.
    pub fn failing(mut self, error: RouterError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Every call waits this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// How many calls got past the delay and answered.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    async fn answer(&self, operation: &'static str, model: &str) -> Result<(), RouterError> {
        self.calls.lock().unwrap().push(MockCall {
            operation,
            model: model.to_string(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn replay<T: DeserializeOwned + Send + 'static>(&self) -> EventStream<T> {
        let events = self.events.clone();
        futures_util::stream::iter(events.into_iter().map(|event| {
            if let Some(message) = event.get("error").and_then(Value::as_str) {
                return Err(RouterError::backend(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    message,
                ));
            }
            serde_json::from_value(event)
                .map_err(|_| RouterError::Protocol("unexpected progress response".into()))
        }))
        .boxed()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<EventStream<GenerateResponse>, RouterError> {
        self.answer("generate", &request.model).await?;
        Ok(self.replay())
    }

    async fn chat(&self, request: ChatRequest) -> Result<EventStream<ChatResponse>, RouterError> {
        self.answer("chat", &request.model).await?;
        Ok(self.replay())
    }

    async fn pull(
        &self,
        request: PullRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError> {
        let model = if request.model.is_empty() {
            request.name
        } else {
            request.model
        };
        self.answer("pull", &model).await?;
        Ok(self.replay())
    }

    async fn push(
        &self,
        request: PushRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError> {
        self.answer("push", &request.model).await?;
        Ok(self.replay())
    }

    async fn create(
        &self,
        request: CreateRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError> {
        self.answer("create", &request.model).await?;
        Ok(self.replay())
    }

    async fn list(&self) -> Result<ListResponse, RouterError> {
        self.answer("list", "").await?;
        Ok(self.list.clone())
    }

    async fn list_running(&self) -> Result<ProcessResponse, RouterError> {
        self.answer("list_running", "").await?;
        Ok(self.running.clone())
    }

    async fn copy(&self, request: CopyRequest) -> Result<(), RouterError> {
        self.answer("copy", &request.source).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<(), RouterError> {
        self.answer("delete", &request.model).await
    }

    async fn show(&self, request: ShowRequest) -> Result<ShowResponse, RouterError> {
        let model = if request.model.is_empty() {
            request.name
        } else {
            request.model
        };
        self.answer("show", &model).await?;
        let mut fields = serde_json::Map::new();
        fields.insert("modelfile".into(), Value::String(format!("FROM {model}")));
        fields.insert(
            "modified_at".into(),
            Value::String("2024-10-01T00:00:00Z".into()),
        );
        Ok(ShowResponse { fields })
    }

    async fn heartbeat(&self) -> Result<(), RouterError> {
        self.answer("heartbeat", "").await
    }

    async fn embed(&self, request: EmbedRequest) -> Result<EmbedResponse, RouterError> {
        self.answer("embed", &request.model).await?;
        Ok(EmbedResponse {
            model: request.model,
            embeddings: vec![vec![0.25, -0.5]],
            prompt_eval_count: Some(2),
            ..Default::default()
        })
    }

    async fn embeddings(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, RouterError> {
        self.answer("embeddings", &request.model).await?;
        Ok(EmbeddingResponse {
            embedding: vec![0.25, -0.5],
        })
    }

    async fn create_blob(&self, digest: &str, _body: Bytes) -> Result<(), RouterError> {
        self.answer("create_blob", digest).await
    }

    async fn version(&self) -> Result<String, RouterError> {
        self.answer("version", "").await?;
        Ok(self.version.clone())
    }
}

/// A list entry as a backend would report it; `modified_at` is RFC 3339.
pub fn list_entry(name: &str, modified_at: &str) -> ListModelResponse {
    let mut extra = serde_json::Map::new();
    extra.insert(
        "details".into(),
        serde_json::json!({"format": "gguf", "family": "llama"}),
    );
    ListModelResponse {
        name: name.to_string(),
        model: name.to_string(),
        modified_at: Some(
            chrono::DateTime::parse_from_rfc3339(modified_at).expect("valid RFC 3339 timestamp"),
        ),
        size: 1_000,
        digest: format!("digest-{name}"),
        extra,
    }
}

pub fn running_entry(name: &str) -> ProcessModelResponse {
    ProcessModelResponse {
        name: name.to_string(),
        model: name.to_string(),
        size: 2_000,
        digest: format!("digest-{name}"),
        size_vram: 1_500,
        ..Default::default()
    }
}
