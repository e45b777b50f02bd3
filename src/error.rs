//! Crate-wide error type for conditions that must be surfaced to an HTTP
//! caller as a structured response (§7's "client error" row). Transient
//! network failures, malformed wire frames, and resource failures are
//! logged and swallowed at their point of origin and never reach here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("unknown event id: {0}")]
    UnknownEvent(String),

    #[error("unknown peer ip: {0}")]
    UnknownPeer(String),

    #[error("cannot verify own alert")]
    SelfVerification,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to bind {what} on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = match &self {
            NodeError::MissingField(_) | NodeError::SelfVerification | NodeError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            NodeError::UnknownEvent(_) | NodeError::UnknownPeer(_) => StatusCode::NOT_FOUND,
            NodeError::InvalidConfig(_) | NodeError::Bind { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
