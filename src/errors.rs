//! Error taxonomy for the router and its HTTP surface
//!
//! Every error raised by the router carries an explicit HTTP status so the transport layer can
//! render it without guessing. Configuration and alias errors only ever occur while building a
//! [`crate::router::Router`]; everything else is per request.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Operations the router deliberately refuses to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    Copy,
    Create,
    Delete,
    Push,
    Blob,
}

impl Unsupported {
    pub fn message(self) -> &'static str {
        match self {
            Unsupported::Copy => "router doesn't support copying models",
            Unsupported::Create => "router doesn't support creating models",
            Unsupported::Delete => "router doesn't support deleting models",
            Unsupported::Push => "router doesn't support pushing models",
            Unsupported::Blob => "router doesn't support blobs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouterError {
    /// Malformed or incomplete startup configuration.
    #[error("{0}")]
    Config(String),

    /// An alias that points nowhere or shadows a concrete model.
    #[error("{0}")]
    Alias(String),

    /// No concrete model or alias matched the requested name.
    #[error("router is missing a valid route to model {requested}{}", resolved_suffix(.resolved))]
    RouteNotFound {
        requested: String,
        resolved: Option<String>,
    },

    #[error("{}", .0.message())]
    Unsupported(Unsupported),

    /// Anything a backend returned, passed through untouched.
    #[error("{message}")]
    Backend { status: StatusCode, message: String },

    /// A backend event stream that was truncated or contained something unrecognisable.
    #[error("{0}")]
    Protocol(String),

    /// The inbound request body could not be read.
    #[error("{0}")]
    BadRequest(String),
}

fn resolved_suffix(resolved: &Option<String>) -> String {
    match resolved {
        Some(model) => format!(" (resolved alias {model})"),
        None => String::new(),
    }
}

impl RouterError {
    pub fn config(message: impl Into<String>) -> Self {
        RouterError::Config(message.into())
    }

    pub fn backend(status: StatusCode, message: impl Into<String>) -> Self {
        RouterError::Backend {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RouterError::RouteNotFound { .. } | RouterError::Unsupported(_) => {
                StatusCode::NOT_FOUND
            }
            RouterError::Backend { status, .. } => *status,
            RouterError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RouterError::Config(_) | RouterError::Alias(_) | RouterError::Protocol(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
