//! HTTP clients for talking to backend Ollama servers
//!
//! [`HttpClient`] is the raw request/response abstraction (hyper in production, mocks in tests).
//! [`OllamaClient`] layers the Ollama API on top of it and implements
//! [`Backend`](crate::traits::Backend) for a single connection.
use crate::api::{
    ChatRequest, ChatResponse, CopyRequest, CreateRequest, DeleteRequest, EmbedRequest,
    EmbedResponse, EmbeddingRequest, EmbeddingResponse, GenerateRequest, GenerateResponse,
    ListResponse, ProcessResponse, ProgressResponse, PullRequest, PushRequest, ShowRequest,
    ShowResponse, VersionResponse,
};
use crate::errors::RouterError;
use crate::ndjson::NdjsonStream;
use crate::traits::{Backend, EventStream};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, StatusCode, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::BodyExt;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

pub type HyperClient = Client<
    hyper_tls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    axum::body::Body,
>;

#[async_trait]
pub trait HttpClient: std::fmt::Debug {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
impl HttpClient for HyperClient {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
        self.request(req)
            .await
            .map(|res| res.into_response())
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

pub fn create_hyper_client() -> HyperClient {
    let https = hyper_tls::HttpsConnector::new();

    // Connection pool configuration via environment variables
    let pool_idle_timeout_secs = std::env::var("MODELMUX_POOL_IDLE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(90);

    let pool_max_idle_per_host = std::env::var("MODELMUX_POOL_MAX_IDLE_PER_HOST")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(32);

    tracing::debug!(
        "HTTP client pool config: idle_timeout={}s, max_idle_per_host={}",
        pool_idle_timeout_secs,
        pool_max_idle_per_host
    );

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(std::time::Duration::from_secs(pool_idle_timeout_secs))
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_timer(hyper_util::rt::TokioTimer::new())
        .build(https)
}

/// One line of a streamed backend response: either an event or an inline error.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Line<T> {
    Error { error: String },
    Event(T),
}

/// A client for a single Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient<T: HttpClient = HyperClient> {
    base: Url,
    http: T,
}

impl<T: HttpClient + Send + Sync> OllamaClient<T> {
    pub fn new(mut base: Url, http: T) -> Self {
        // Relative joins replace the last path segment unless the base ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base, http }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Sends a request and returns the response if the backend answered with a 2xx status.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Body>,
        content_type: &str,
    ) -> Result<axum::response::Response, RouterError> {
        let uri = self
            .base
            .join(path)
            .map_err(|e| RouterError::config(format!("invalid backend url: {e}")))?;

        let mut builder = axum::http::Request::builder()
            .method(method.clone())
            .uri(uri.as_str())
            .header(header::ACCEPT, "application/x-ndjson, application/json");
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let req = builder
            .body(body.unwrap_or_else(Body::empty))
            .map_err(|e| RouterError::backend(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        debug!(%method, %uri, "Sending request to backend");
        let response = self.http.request(req).await.map_err(|e| {
            RouterError::backend(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_default();
        Err(RouterError::backend(status, error_message(status, &body)))
    }

    async fn send_json<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<axum::response::Response, RouterError> {
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| RouterError::BadRequest(e.to_string()))?
            .map(Body::from);
        self.send(method, path, body, "application/json").await
    }

    async fn call<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R, RouterError> {
        let response = self.send_json(method, path, body).await?;
        let bytes = read_body(response).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RouterError::Protocol(format!("unexpected response from backend: {e}")))
    }

    async fn call_empty<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), RouterError> {
        self.send_json(method, path, body).await.map(|_| ())
    }

    async fn stream<B: Serialize, R: DeserializeOwned + Send + 'static>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<EventStream<R>, RouterError> {
        let response = self.send_json(Method::POST, path, Some(body)).await?;
        let lines = NdjsonStream::new(response.into_body().into_data_stream());
        Ok(lines.map(parse_line::<R>).boxed())
    }
}

async fn read_body(response: axum::response::Response) -> Result<Bytes, RouterError> {
    response
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| RouterError::backend(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

fn parse_line<R: DeserializeOwned>(line: Result<Bytes, axum::Error>) -> Result<R, RouterError> {
    let line =
        line.map_err(|e| RouterError::backend(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    trace!(len = line.len(), "Received stream line");
    match serde_json::from_slice::<Line<R>>(&line) {
        Ok(Line::Event(event)) => Ok(event),
        Ok(Line::Error { error }) => Err(RouterError::backend(
            StatusCode::INTERNAL_SERVER_ERROR,
            error,
        )),
        Err(_) => Err(RouterError::Protocol("unexpected progress response".into())),
    }
}

/// Prefers the `error` field of a JSON error body, then the raw body, then the status reason.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: String,
    }

    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        return parsed.error;
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    if !text.is_empty() {
        return text;
    }
    status
        .canonical_reason()
        .unwrap_or("backend request failed")
        .to_string()
}

#[async_trait]
impl<T: HttpClient + Send + Sync> Backend for OllamaClient<T> {
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<EventStream<GenerateResponse>, RouterError> {
        self.stream("api/generate", &request).await
    }

    async fn chat(&self, request: ChatRequest) -> Result<EventStream<ChatResponse>, RouterError> {
        self.stream("api/chat", &request).await
    }

    async fn pull(
        &self,
        request: PullRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError> {
        self.stream("api/pull", &request).await
    }

    async fn push(
        &self,
        request: PushRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError> {
        self.stream("api/push", &request).await
    }

    async fn create(
        &self,
        request: CreateRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError> {
        self.stream("api/create", &request).await
    }

    async fn list(&self) -> Result<ListResponse, RouterError> {
        self.call::<(), _>(Method::GET, "api/tags", None).await
    }

    async fn list_running(&self) -> Result<ProcessResponse, RouterError> {
        self.call::<(), _>(Method::GET, "api/ps", None).await
    }

    async fn copy(&self, request: CopyRequest) -> Result<(), RouterError> {
        self.call_empty(Method::POST, "api/copy", Some(&request))
            .await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<(), RouterError> {
        self.call_empty(Method::DELETE, "api/delete", Some(&request))
            .await
    }

    async fn show(&self, request: ShowRequest) -> Result<ShowResponse, RouterError> {
        self.call(Method::POST, "api/show", Some(&request)).await
    }

    async fn heartbeat(&self) -> Result<(), RouterError> {
        self.call_empty::<()>(Method::HEAD, "", None).await
    }

    async fn embed(&self, request: EmbedRequest) -> Result<EmbedResponse, RouterError> {
        self.call(Method::POST, "api/embed", Some(&request)).await
    }

    async fn embeddings(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, RouterError> {
        self.call(Method::POST, "api/embeddings", Some(&request))
            .await
    }

    async fn create_blob(&self, digest: &str, body: Bytes) -> Result<(), RouterError> {
        let path = format!("api/blobs/{digest}");
        self.send(
            Method::POST,
            &path,
            Some(Body::from(body)),
            "application/octet-stream",
        )
        .await
        .map(|_| ())
    }

    async fn version(&self) -> Result<String, RouterError> {
        self.call::<(), VersionResponse>(Method::GET, "api/version", None)
            .await
            .map(|v| v.version)
    }
}
