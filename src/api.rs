//! Wire types for the Ollama API
//!
//! Only the fields the router reads or rewrites are typed. Everything else is captured in a
//! flattened `extra` map so payloads pass through to backends (and back) without loss.
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Extra = Map<String, Value>;

/// Request types that let the caller choose between streamed and buffered delivery.
pub trait StreamPreference {
    /// `None` when the caller did not say; streaming is the default.
    fn stream(&self) -> Option<bool>;
}

/// Events produced by a streaming backend call.
pub trait Progress: Serialize + Send + 'static {
    /// Whether this event ends a buffered response.
    fn is_complete(&self) -> bool;

    /// Folds a later event into this accumulated one. Generated text is appended; every other
    /// field takes the later value. The default keeps only the newest event.
    fn merge_next(&mut self, next: Self)
    where
        Self: Sized,
    {
        *self = next;
    }
}

macro_rules! stream_preference {
    ($($request:ty),* $(,)?) => {
        $(
            impl StreamPreference for $request {
                fn stream(&self) -> Option<bool> {
                    self.stream
                }
            }
        )*
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Message {
    /// Appends a later chunk of the same message. Thinking text is concatenated and tool calls
    /// accumulate; other fields take the later value.
    pub fn append(&mut self, later: Message) {
        self.content.push_str(&later.content);
        if !later.role.is_empty() {
            self.role = later.role;
        }
        for (key, value) in later.extra {
            let value = match (key.as_str(), self.extra.remove(&key), value) {
                ("thinking", Some(Value::String(mut text)), Value::String(more)) => {
                    text.push_str(&more);
                    Value::String(text)
                }
                ("tool_calls", Some(Value::Array(mut calls)), Value::Array(more)) => {
                    calls.extend(more);
                    Value::Array(calls)
                }
                (_, _, value) => value,
            };
            self.extra.insert(key, value);
        }
    }

    /// Tool calls requested by the model, if any.
    pub fn tool_calls(&self) -> &[Value] {
        self.extra
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        let mut object = message.extra;
        object.insert("role".into(), Value::String(message.role));
        object.insert("content".into(), Value::String(message.content));
        Value::Object(object)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Progress for ChatResponse {
    fn is_complete(&self) -> bool {
        self.done
    }

    fn merge_next(&mut self, next: Self) {
        let earlier = self.message.take();
        *self = next;
        self.message = match (earlier, self.message.take()) {
            (Some(mut earlier), Some(later)) => {
                earlier.append(later);
                Some(earlier)
            }
            (earlier, later) => later.or(earlier),
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Progress for GenerateResponse {
    fn is_complete(&self) -> bool {
        self.done
    }

    fn merge_next(&mut self, next: Self) {
        let mut text = std::mem::take(&mut self.response);
        text.push_str(&next.response);
        *self = next;
        self.response = text;
    }
}

/// Status updates from pull, push and create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub status: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ProgressResponse {
    pub const SUCCESS: &'static str = "success";
}

impl Progress for ProgressResponse {
    fn is_complete(&self) -> bool {
        self.status == Self::SUCCESS
    }
}

/// Pull and show accept the model under either `model` or the older `name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

stream_preference!(ChatRequest, GenerateRequest, PullRequest, PushRequest, CreateRequest);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShowRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShowResponse {
    #[serde(flatten)]
    pub fields: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopyRequest {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub embeddings: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// The legacy single-prompt embeddings endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default)]
    pub embedding: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub models: Vec<ListModelResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListModelResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub digest: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    #[serde(default)]
    pub models: Vec<ProcessModelResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessModelResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub size_vram: i64,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Entries of the list and ps responses share a name/model pair the router filters and
/// rewrites.
pub trait ModelEntry: Clone {
    /// The name the backend reports; `model` is preferred, `name` is the fallback.
    fn reported_name(&self) -> &str;

    /// A copy of this entry published under another name.
    fn renamed(&self, name: &str) -> Self;
}

macro_rules! model_entry {
    ($($entry:ty),* $(,)?) => {
        $(
            impl ModelEntry for $entry {
                fn reported_name(&self) -> &str {
                    if self.model.is_empty() { &self.name } else { &self.model }
                }

                fn renamed(&self, name: &str) -> Self {
                    let mut entry = self.clone();
                    entry.name = name.to_string();
                    entry.model = name.to_string();
                    entry
                }
            }
        )*
    };
}

model_entry!(ListModelResponse, ProcessModelResponse);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_round_trip() {
        let raw = json!({
            "model": "llama3.2",
            "messages": [{"role": "user", "content": "why is the sky blue?"}],
            "options": {"temperature": 0.2},
            "stream": false
        });
        let request: ChatRequest = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(request.stream(), Some(false));
        assert_eq!(serde_json::to_value(&request).unwrap(), raw);
    }

    #[test]
    fn test_stream_preference_absent_by_default() {
        let request: GenerateRequest =
            serde_json::from_value(json!({"model": "llama3.2", "prompt": "hi"})).unwrap();
        assert_eq!(request.stream(), None);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("stream").is_none());
    }

    #[test]
    fn test_generate_merge_appends_text_in_order() {
        let mut acc = GenerateResponse {
            response: "the sky ".into(),
            ..Default::default()
        };
        acc.merge_next(GenerateResponse {
            response: "is ".into(),
            ..Default::default()
        });
        acc.merge_next(GenerateResponse {
            response: "blue".into(),
            done: true,
            eval_count: Some(3),
            ..Default::default()
        });
        assert_eq!(acc.response, "the sky is blue");
        assert_eq!(acc.eval_count, Some(3));
        assert!(acc.is_complete());
    }

    #[test]
    fn test_chat_merge_keeps_thinking_and_tool_calls() {
        let chunk = |value: Value| ChatResponse {
            message: Some(serde_json::from_value(value).unwrap()),
            ..Default::default()
        };
        let mut acc = chunk(json!({"role": "assistant", "content": "", "thinking": "The user "}));
        acc.merge_next(chunk(json!({"role": "assistant", "content": "", "thinking": "wants weather",
            "tool_calls": [{"function": {"name": "weather", "arguments": {"city": "Paris"}}}]})));
        acc.merge_next(chunk(json!({"role": "assistant", "content": "Checking",
            "tool_calls": [{"function": {"name": "time", "arguments": {}}}]})));
        acc.merge_next(ChatResponse {
            message: Some(Message {
                role: "assistant".into(),
                content: ".".into(),
                extra: Extra::new(),
            }),
            done: true,
            done_reason: Some("stop".into()),
            ..Default::default()
        });

        assert!(acc.is_complete());
        assert_eq!(acc.done_reason.as_deref(), Some("stop"));
        let message = acc.message.unwrap();
        assert_eq!(message.content, "Checking.");
        assert_eq!(message.extra["thinking"], "The user wants weather");
        let tools: Vec<&str> = message
            .tool_calls()
            .iter()
            .map(|call| call["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(tools, vec!["weather", "time"]);
    }

    #[test]
    fn test_chat_merge_without_later_message_keeps_earlier_one() {
        let mut acc = ChatResponse {
            message: Some(Message {
                role: "assistant".into(),
                content: "hi".into(),
                extra: Extra::new(),
            }),
            ..Default::default()
        };
        acc.merge_next(ChatResponse {
            done: true,
            ..Default::default()
        });
        assert_eq!(acc.message.unwrap().content, "hi");
    }

    #[test]
    fn test_progress_completion() {
        let pulling = ProgressResponse {
            status: "pulling manifest".into(),
            ..Default::default()
        };
        let success = ProgressResponse {
            status: "success".into(),
            ..Default::default()
        };
        assert!(!pulling.is_complete());
        assert!(success.is_complete());
    }

    #[test]
    fn test_renamed_entry_keeps_payload() {
        let entry: ListModelResponse = serde_json::from_value(json!({
            "name": "llama3.2:latest",
            "model": "llama3.2:latest",
            "modified_at": "2024-10-01T10:00:00+02:00",
            "size": 2019393189u64,
            "digest": "a80c4f17acd5",
            "details": {"family": "llama"}
        }))
        .unwrap();

        let alias = entry.renamed("fast");
        assert_eq!(alias.name, "fast");
        assert_eq!(alias.model, "fast");
        assert_eq!(alias.modified_at, entry.modified_at);
        assert_eq!(alias.size, entry.size);
        assert_eq!(alias.digest, entry.digest);
        assert_eq!(alias.extra, entry.extra);
    }

    #[test]
    fn test_reported_name_falls_back_to_name() {
        let entry = ProcessModelResponse {
            name: "phi:2".into(),
            ..Default::default()
        };
        assert_eq!(entry.reported_name(), "phi:2");
    }
}
