//! OpenAI-compatible chat, completion and embedding schemas
//!
//! Each request is translated into its Ollama counterpart and dispatched through the same
//! [`crate::traits::Backend`] as the native API, so routing and aliases behave the same on both
//! surfaces. Answers are translated back; streamed answers are sent as server-sent events
//! ending with `data: [DONE]`.

use crate::api::{self, ChatResponse, Extra, GenerateResponse};
use crate::errors::RouterError;
use axum::{
    Json,
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

const SYSTEM_FINGERPRINT: &str = "fp_ollama";

/// Request body for POST /v1/chat/completions
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    /// The model to use for completion
    pub model: String,

    /// The messages to generate a completion for
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Whether to stream the response. Unlike the Ollama API, the default is not to.
    #[serde(default)]
    pub stream: Option<bool>,

    #[serde(default)]
    pub stream_options: Option<StreamOptions>,

    #[serde(flatten)]
    pub sampling: Sampling,

    #[serde(default)]
    pub response_format: Option<ResponseFormat>,

    /// Tool definitions, forwarded as is
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
}

/// Request body for POST /v1/completions
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    pub model: String,

    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub suffix: Option<String>,

    #[serde(default)]
    pub stream: Option<bool>,

    #[serde(default)]
    pub stream_options: Option<StreamOptions>,

    #[serde(flatten)]
    pub sampling: Sampling,
}

/// Request body for POST /v1/embeddings
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,

    pub input: EmbeddingInput,

    #[serde(default)]
    pub dimensions: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Multiple(Vec<String>),
}

/// Sampling parameters shared by chat and completions. They become Ollama `options`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sampling {
    #[serde(default)]
    pub max_tokens: Option<i64>,

    /// Newer name for `max_tokens`; wins when both are present
    #[serde(default)]
    pub max_completion_tokens: Option<i64>,

    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub top_p: Option<f64>,

    #[serde(default)]
    pub frequency_penalty: Option<f64>,

    #[serde(default)]
    pub presence_penalty: Option<f64>,

    #[serde(default)]
    pub seed: Option<i64>,

    #[serde(default)]
    pub stop: Option<StopSequence>,
}

/// Stop sequence - single string or array
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StopSequence {
    Single(String),
    Multiple(Vec<String>),
}

impl StopSequence {
    fn into_vec(self) -> Vec<String> {
        match self {
            StopSequence::Single(stop) => vec![stop],
            StopSequence::Multiple(stops) => stops,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(default)]
    pub json_schema: Option<Value>,
}

impl ResponseFormat {
    /// The Ollama `format` value: `"json"` or a JSON schema. Plain text needs none.
    fn into_format(self) -> Option<Value> {
        match self.format_type.as_str() {
            "json_object" => Some(Value::String("json".into())),
            "json_schema" => self.json_schema.and_then(|s| s.get("schema").cloned()),
            _ => None,
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,

    #[serde(default)]
    pub content: Option<MessageContent>,

    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Message content - either a string or array of content parts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Tool call in an assistant message, in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(rename = "type", default)]
    pub call_type: String,
    pub function: FunctionCall,
}

/// Function call details; `arguments` is a JSON document encoded as a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl ChatMessage {
    fn into_ollama(self) -> Result<api::Message, RouterError> {
        let mut extra = Extra::new();
        let content = match self.content {
            None => String::new(),
            Some(MessageContent::Text(text)) => text,
            Some(MessageContent::Parts(parts)) => {
                let mut texts = Vec::new();
                let mut images = Vec::new();
                for part in parts {
                    match part {
                        ContentPart::Text { text } => texts.push(text),
                        ContentPart::ImageUrl { image_url } => {
                            images.push(Value::String(inline_image(&image_url.url)?))
                        }
                    }
                }
                if !images.is_empty() {
                    extra.insert("images".into(), Value::Array(images));
                }
                texts.join("\n")
            }
        };

        if let Some(calls) = self.tool_calls {
            let calls = calls
                .into_iter()
                .map(|call| {
                    let arguments = if call.function.arguments.trim().is_empty() {
                        Value::Object(Extra::new())
                    } else {
                        serde_json::from_str(&call.function.arguments).map_err(|e| {
                            RouterError::BadRequest(format!("invalid tool call arguments: {e}"))
                        })?
                    };
                    Ok(serde_json::json!({
                        "function": {"name": call.function.name, "arguments": arguments}
                    }))
                })
                .collect::<Result<Vec<_>, RouterError>>()?;
            extra.insert("tool_calls".into(), Value::Array(calls));
        }

        Ok(api::Message {
            role: self.role,
            content,
            extra,
        })
    }
}

/// The base64 payload of a `data:` image URL. Remote URLs cannot be forwarded.
fn inline_image(url: &str) -> Result<String, RouterError> {
    url.strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .filter(|(media_type, _)| media_type.starts_with("image/"))
        .map(|(_, data)| data.to_string())
        .ok_or_else(|| RouterError::BadRequest("invalid image input".into()))
}

fn put<V: Into<Value>>(options: &mut Extra, key: &str, value: Option<V>) {
    if let Some(value) = value {
        options.insert(key.to_string(), value.into());
    }
}

impl Sampling {
    fn into_options(self) -> Extra {
        let mut options = Extra::new();
        put(
            &mut options,
            "num_predict",
            self.max_completion_tokens.or(self.max_tokens),
        );
        put(&mut options, "temperature", self.temperature);
        put(&mut options, "top_p", self.top_p);
        put(&mut options, "frequency_penalty", self.frequency_penalty);
        put(&mut options, "presence_penalty", self.presence_penalty);
        put(&mut options, "seed", self.seed);
        put(&mut options, "stop", self.stop.map(StopSequence::into_vec));
        options
    }

    fn apply(self, extra: &mut Extra) {
        let options = self.into_options();
        if !options.is_empty() {
            extra.insert("options".into(), Value::Object(options));
        }
    }
}

fn include_usage(options: &Option<StreamOptions>) -> bool {
    options.as_ref().is_some_and(|o| o.include_usage)
}

impl ChatCompletionRequest {
    pub fn streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn include_usage(&self) -> bool {
        include_usage(&self.stream_options)
    }

    pub fn into_ollama(self) -> Result<api::ChatRequest, RouterError> {
        let stream = self.streaming();
        let messages = self
            .messages
            .into_iter()
            .map(|message| message.into_ollama().map(Value::from))
            .collect::<Result<Vec<_>, _>>()?;

        let mut extra = Extra::new();
        extra.insert("messages".into(), Value::Array(messages));
        if let Some(format) = self.response_format.and_then(ResponseFormat::into_format) {
            extra.insert("format".into(), format);
        }
        if let Some(tools) = self.tools {
            extra.insert("tools".into(), Value::Array(tools));
        }
        self.sampling.apply(&mut extra);

        Ok(api::ChatRequest {
            model: self.model,
            stream: Some(stream),
            extra,
        })
    }
}

impl CompletionRequest {
    pub fn streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn include_usage(&self) -> bool {
        include_usage(&self.stream_options)
    }

    pub fn into_ollama(self) -> api::GenerateRequest {
        let stream = self.streaming();
        let mut extra = Extra::new();
        extra.insert("prompt".into(), Value::String(self.prompt));
        if let Some(suffix) = self.suffix {
            extra.insert("suffix".into(), Value::String(suffix));
        }
        self.sampling.apply(&mut extra);

        api::GenerateRequest {
            model: self.model,
            stream: Some(stream),
            extra,
        }
    }
}

impl EmbeddingRequest {
    pub fn into_ollama(self) -> Result<api::EmbedRequest, RouterError> {
        let input = match self.input {
            EmbeddingInput::Single(text) if !text.is_empty() => Value::String(text),
            EmbeddingInput::Multiple(texts) if !texts.is_empty() => Value::from(texts),
            _ => return Err(RouterError::BadRequest("invalid input".into())),
        };

        let mut extra = Extra::new();
        extra.insert("input".into(), input);
        put(&mut extra, "dimensions", self.dimensions);
        Ok(api::EmbedRequest {
            model: self.model,
            extra,
        })
    }
}

/// Response from POST /v1/chat/completions (non-streaming)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

/// Streaming chunk of a chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ResponseMessage,
    pub finish_reason: Option<String>,
}

/// An assistant message, or the delta of one when streaming
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ResponseMessage {
    fn from_ollama(message: Option<api::Message>) -> Self {
        let message = message.unwrap_or_default();
        let tool_calls = message
            .tool_calls()
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let function = &call["function"];
                ToolCall {
                    id: format!("call_{}", Uuid::new_v4().simple()),
                    index: Some(index),
                    call_type: "function".into(),
                    function: FunctionCall {
                        name: function["name"].as_str().unwrap_or_default().to_string(),
                        arguments: function
                            .get("arguments")
                            .map(Value::to_string)
                            .unwrap_or_else(|| "{}".into()),
                    },
                }
            })
            .collect();
        let reasoning = message
            .extra
            .get("thinking")
            .and_then(Value::as_str)
            .filter(|thinking| !thinking.is_empty())
            .map(str::to_string);

        ResponseMessage {
            role: if message.role.is_empty() {
                "assistant".into()
            } else {
                message.role
            },
            content: message.content,
            reasoning,
            tool_calls,
        }
    }
}

/// Response from POST /v1/completions; streamed chunks have the same shape without usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: u32,
    pub finish_reason: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    fn new(prompt_eval_count: Option<u64>, eval_count: Option<u64>) -> Self {
        let prompt_tokens = prompt_eval_count.unwrap_or(0);
        let completion_tokens = eval_count.unwrap_or(0);
        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Response from POST /v1/embeddings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingList {
    pub object: String,
    pub data: Vec<Embedding>,
    pub model: String,
    pub usage: EmbeddingUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub object: String,
    pub embedding: Vec<f64>,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

impl EmbeddingList {
    /// `model` is the name the caller asked for, which may be an alias.
    pub fn new(model: String, response: api::EmbedResponse) -> Self {
        let tokens = response.prompt_eval_count.unwrap_or(0);
        EmbeddingList {
            object: "list".into(),
            data: response
                .embeddings
                .into_iter()
                .enumerate()
                .map(|(index, embedding)| Embedding {
                    object: "embedding".into(),
                    embedding,
                    index,
                })
                .collect(),
            model,
            usage: EmbeddingUsage {
                prompt_tokens: tokens,
                total_tokens: tokens,
            },
        }
    }
}

fn finish_reason(done: bool, done_reason: Option<&str>, calls_tools: bool) -> Option<String> {
    let reason = if calls_tools {
        "tool_calls"
    } else if !done {
        return None;
    } else if done_reason == Some("length") {
        "length"
    } else {
        "stop"
    };
    Some(reason.to_string())
}

/// Identity shared by every chunk of one answer.
#[derive(Debug, Clone)]
pub struct Reply {
    id: String,
    created: i64,
}

impl Reply {
    pub const CHAT: &'static str = "chatcmpl";
    pub const COMPLETION: &'static str = "cmpl";

    pub fn new(prefix: &str) -> Self {
        Reply {
            id: format!("{prefix}-{}", Uuid::new_v4().simple()),
            created: Utc::now().timestamp(),
        }
    }

    pub fn chat_completion(&self, response: ChatResponse) -> ChatCompletion {
        let usage = Usage::new(response.prompt_eval_count, response.eval_count);
        let message = ResponseMessage::from_ollama(response.message);
        let finish_reason = finish_reason(
            response.done,
            response.done_reason.as_deref(),
            !message.tool_calls.is_empty(),
        );
        ChatCompletion {
            id: self.id.clone(),
            object: "chat.completion".into(),
            created: self.created,
            model: response.model,
            system_fingerprint: SYSTEM_FINGERPRINT.into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage,
        }
    }

    /// One chunk per backend event, plus a trailing usage chunk after the last one when asked.
    pub fn chat_chunks(
        &self,
        response: ChatResponse,
        include_usage: bool,
    ) -> Vec<ChatCompletionChunk> {
        let usage = Usage::new(response.prompt_eval_count, response.eval_count);
        let delta = ResponseMessage::from_ollama(response.message);
        let finish_reason = finish_reason(
            response.done,
            response.done_reason.as_deref(),
            !delta.tool_calls.is_empty(),
        );
        let chunk = |choices, usage| ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".into(),
            created: self.created,
            model: response.model.clone(),
            system_fingerprint: SYSTEM_FINGERPRINT.into(),
            choices,
            usage,
        };

        let mut chunks = vec![chunk(
            vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            None,
        )];
        if response.done && include_usage {
            chunks.push(chunk(Vec::new(), Some(usage)));
        }
        chunks
    }

    pub fn completion(&self, response: GenerateResponse) -> Completion {
        let usage = Usage::new(response.prompt_eval_count, response.eval_count);
        let mut completion = self.completion_chunk(response);
        completion.usage = Some(usage);
        completion
    }

    pub fn completion_chunks(
        &self,
        response: GenerateResponse,
        include_usage: bool,
    ) -> Vec<Completion> {
        let usage = Usage::new(response.prompt_eval_count, response.eval_count);
        let done = response.done;
        let chunk = self.completion_chunk(response);
        let usage_chunk = (done && include_usage).then(|| Completion {
            choices: Vec::new(),
            usage: Some(usage),
            ..chunk.clone()
        });
        std::iter::once(chunk).chain(usage_chunk).collect()
    }

    fn completion_chunk(&self, response: GenerateResponse) -> Completion {
        Completion {
            id: self.id.clone(),
            object: "text_completion".into(),
            created: self.created,
            model: response.model,
            system_fingerprint: SYSTEM_FINGERPRINT.into(),
            choices: vec![CompletionChoice {
                finish_reason: finish_reason(response.done, response.done_reason.as_deref(), false),
                text: response.response,
                index: 0,
            }],
            usage: None,
        }
    }
}

/// Error body in the OpenAI shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl From<&RouterError> for ErrorResponse {
    fn from(error: &RouterError) -> Self {
        let error_type = match error.status_code() {
            StatusCode::BAD_REQUEST => "invalid_request_error",
            StatusCode::NOT_FOUND => "not_found_error",
            _ => "api_error",
        };
        ErrorResponse {
            error: ErrorDetail {
                message: error.to_string(),
                error_type: error_type.into(),
                param: None,
                code: None,
            },
        }
    }
}

/// A [`RouterError`] rendered in the OpenAI error shape, with the same status.
#[derive(Debug)]
pub struct OpenAiError(pub RouterError);

impl From<RouterError> for OpenAiError {
    fn from(error: RouterError) -> Self {
        OpenAiError(error)
    }
}

impl IntoResponse for OpenAiError {
    fn into_response(self) -> Response {
        (self.0.status_code(), Json(ErrorResponse::from(&self.0))).into_response()
    }
}

fn write_event(frame: &mut Vec<u8>, data: &impl Serialize) -> std::io::Result<()> {
    frame.extend_from_slice(b"data: ");
    serde_json::to_writer(&mut *frame, data).map_err(std::io::Error::other)?;
    frame.extend_from_slice(b"\n\n");
    Ok(())
}

/// Writes every chunk as one `data:` event and finishes with `[DONE]`. A mid-stream error is
/// sent as an error event before the end marker.
pub fn sse_response<T, S>(chunks: S) -> Response
where
    T: Serialize,
    S: Stream<Item = Result<Vec<T>, RouterError>> + Send + 'static,
{
    let body = chunks
        .map(|chunks| {
            let mut frame = Vec::new();
            match chunks {
                Ok(chunks) => {
                    for chunk in &chunks {
                        write_event(&mut frame, chunk)?;
                    }
                }
                Err(e) => write_event(&mut frame, &ErrorResponse::from(&e))?,
            }
            Ok::<_, std::io::Error>(Bytes::from(frame))
        })
        .chain(stream::once(async {
            Ok(Bytes::from_static(b"data: [DONE]\n\n"))
        }));

    (
        [
            (header::CONTENT_TYPE, SSE_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
