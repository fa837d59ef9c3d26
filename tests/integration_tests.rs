//! Integration tests for the modelmux proxy server
//!
//! These tests drive the full stack: configuration reconciliation, the router, the Ollama HTTP
//! client and the axum surface, with only the outbound HTTP client mocked.

use axum::http::StatusCode;
use modelmux::connection::RouterConfig;
use modelmux::test_utils::MockHttpClient;
use modelmux::{AppState, build_router};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt; // for oneshot()

fn app(mock: &MockHttpClient) -> axum::Router {
    let config: RouterConfig = serde_json::from_value(json!({
        "connections": {
            "gpu-1": {"url": "http://gpu-1:11434"},
            "gpu-2": {"url": "http://gpu-2:11434"}
        },
        "models": {
            "llama3.2": {"connection_id": "gpu-1"},
            "qwen2.5:7b": {"connection_id": "http://gpu-2:11434"}
        },
        "aliases": {"fast": "llama3.2"},
        "expose_aliases": true
    }))
    .unwrap();

    let router = config.into_router(mock.clone()).unwrap();
    build_router(AppState::new(Arc::new(router)))
}

fn post(uri: &str, body: Value) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_streamed_chat_is_relayed_line_by_line() {
    // Lines split across chunks the way a real socket delivers them
    let mock = MockHttpClient::new_streaming(
        StatusCode::OK,
        vec![
            r#"{"model":"llama3.2","message":{"role":"assistant","content":"The"},"done":false}"#
                .to_string()
                + "\n{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",",
            r#""content":" sky"},"done":false}"#.to_string() + "\n",
            r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true,"eval_count":3}"#
                .to_string()
                + "\n",
        ],
    );

    let response = app(&mock)
        .oneshot(post(
            "/api/chat",
            json!({
                "model": "fast",
                "messages": [{"role": "user", "content": "Why is the sky blue?"}]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/x-ndjson"
    );

    let text = body_text(response).await;
    let lines: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["message"]["content"], "The");
    assert_eq!(lines[1]["message"]["content"], " sky");
    assert_eq!(lines[2]["eval_count"], 3);

    // The alias was resolved and the rest of the payload forwarded untouched
    let requests = mock.get_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].uri, "http://gpu-1:11434/api/chat");
    let forwarded: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(forwarded["model"], "llama3.2");
    assert_eq!(
        forwarded["messages"][0]["content"],
        "Why is the sky blue?"
    );
}

#[tokio::test]
async fn test_buffered_generate_returns_one_document() {
    let mock = MockHttpClient::new_streaming(
        StatusCode::OK,
        vec![
            "{\"model\":\"qwen2.5:7b\",\"response\":\"Rayleigh \",\"done\":false}\n".to_string(),
            "{\"model\":\"qwen2.5:7b\",\"response\":\"scattering\",\"done\":true}\n".to_string(),
        ],
    );

    let response = app(&mock)
        .oneshot(post(
            "/api/generate",
            json!({"model": "qwen2.5:7b", "prompt": "Why is the sky blue?", "stream": false}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["response"], "Rayleigh scattering");
    assert_eq!(body["done"], true);

    let requests = mock.get_requests();
    assert_eq!(requests[0].uri, "http://gpu-2:11434/api/generate");
    let forwarded: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(forwarded["stream"], false);
}

#[tokio::test]
async fn test_backend_error_status_and_message_are_propagated() {
    let mock = MockHttpClient::new(
        StatusCode::NOT_FOUND,
        r#"{"error":"model \"llama3.2\" not found, try pulling it first"}"#,
    );

    let response = app(&mock)
        .oneshot(post(
            "/api/embed",
            json!({"model": "llama3.2", "input": "hello"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(
        body,
        json!({"error": "model \"llama3.2\" not found, try pulling it first"})
    );
}

#[tokio::test]
async fn test_mid_stream_error_becomes_error_line() {
    let mock = MockHttpClient::new_streaming(
        StatusCode::OK,
        vec![
            "{\"status\":\"pulling manifest\"}\n".to_string(),
            "{\"error\":\"max retries exceeded\"}\n".to_string(),
        ],
    );

    let response = app(&mock)
        .oneshot(post("/api/pull", json!({"model": "qwen2.5:7b"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "{\"status\":\"pulling manifest\"}\n{\"error\":\"max retries exceeded\"}\n"
    );
}

#[tokio::test]
async fn test_unknown_model_never_reaches_a_backend() {
    let mock = MockHttpClient::new(StatusCode::OK, "{}");

    let response = app(&mock)
        .oneshot(post(
            "/api/chat",
            json!({"model": "mistral", "messages": []}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(mock.get_requests().is_empty());
}

#[tokio::test]
async fn test_tags_filters_models_leaked_by_other_connections() {
    // Both servers report both models; each should only be credited with its own
    let mock = MockHttpClient::new(
        StatusCode::OK,
        r#"{"models":[
            {"name":"llama3.2:latest","model":"llama3.2:latest","modified_at":"2024-09-01T10:00:00Z","size":2019393189,"digest":"a80c4f17acd5"},
            {"name":"qwen2.5:7b","model":"qwen2.5:7b","modified_at":"2024-10-01T10:00:00Z","size":4683087332,"digest":"845dbda0ea48"}
        ]}"#,
    );

    let response = app(&mock).oneshot(get("/api/tags")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    let names: Vec<&str> = body["models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["qwen2.5:7b", "llama3.2:latest", "fast"]);
    assert_eq!(body["models"][2]["digest"], "a80c4f17acd5");

    let mut uris: Vec<String> = mock.get_requests().into_iter().map(|r| r.uri).collect();
    uris.sort();
    assert_eq!(
        uris,
        vec![
            "http://gpu-1:11434/api/tags",
            "http://gpu-2:11434/api/tags"
        ]
    );
}

#[tokio::test]
async fn test_version_is_aggregated() {
    let mock = MockHttpClient::new(StatusCode::OK, r#"{"version":"0.5.7"}"#);

    let response = app(&mock).oneshot(get("/api/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"version":"0.5.7"}"#);
    assert_eq!(mock.get_requests().len(), 2);
}

#[tokio::test]
async fn test_unsupported_operation_is_not_forwarded() {
    let mock = MockHttpClient::new(StatusCode::OK, "{}");

    let response = app(&mock)
        .oneshot(post(
            "/api/copy",
            json!({"source": "llama3.2", "destination": "llama-backup"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_text(response).await,
        r#"{"error":"router doesn't support copying models"}"#
    );
    assert!(mock.get_requests().is_empty());
}

#[tokio::test]
async fn test_openai_chat_completion_is_translated_both_ways() {
    let mock = MockHttpClient::new(
        StatusCode::OK,
        r#"{"model":"llama3.2","message":{"role":"assistant","content":"Rayleigh scattering."},"done":true,"done_reason":"stop","prompt_eval_count":11,"eval_count":4}"#,
    );

    let response = app(&mock)
        .oneshot(post(
            "/v1/chat/completions",
            json!({
                "model": "fast",
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "Why is the sky blue?"}
                ],
                "temperature": 0.2,
                "max_tokens": 32
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Rayleigh scattering.");
    assert_eq!(body["usage"]["total_tokens"], 15);

    let requests = mock.get_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].uri, "http://gpu-1:11434/api/chat");
    let forwarded: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        forwarded,
        json!({
            "model": "llama3.2",
            "stream": false,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Why is the sky blue?"}
            ],
            "options": {"temperature": 0.2, "num_predict": 32}
        })
    );
}
