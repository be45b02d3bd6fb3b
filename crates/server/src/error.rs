use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use palaver_common::protocol::ws::ServerEvent;
use serde_json::json;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
    InvalidMode,
    EmptyMessage,
    Forbidden,
    NotFound,
    PersistenceError,
    AiUnavailable,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::InvalidMode => "INVALID_MODE",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::PersistenceError => "PERSISTENCE_ERROR",
            Self::AiUnavailable => "AI_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::InvalidMode => StatusCode::BAD_REQUEST,
            Self::EmptyMessage => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PersistenceError => StatusCode::SERVICE_UNAVAILABLE,
            Self::AiUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::PersistenceError | Self::AiUnavailable | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::InvalidInput => "request validation failed",
            Self::InvalidMode => "AI mode is not one of summarizer, brainstorm, moderator, research",
            Self::EmptyMessage => "message needs text or an attachment",
            Self::Forbidden => "caller may not modify this message",
            Self::NotFound => "requested room or message not found",
            Self::PersistenceError => "the message store is unavailable",
            Self::AiUnavailable => "the AI collaborator is unavailable",
            Self::InternalError => "internal server error",
        }
    }
}

/// Structured failure for the request/response surface.
///
/// WebSocket handlers use [`ErrorCode::event`] instead; the live channel
/// never raises through the transport.
#[derive(Debug, Clone)]
pub struct ChatError {
    code: ErrorCode,
    message: String,
}

impl ChatError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The same failure expressed as a live-channel `error` frame.
    pub fn into_event(self) -> ServerEvent {
        ServerEvent::Error {
            code: self.code.as_str().to_owned(),
            message: self.message,
            retryable: self.code.retryable(),
        }
    }
}

impl ErrorCode {
    /// Scoped `error` frame with the registry default message.
    pub fn event(self) -> ServerEvent {
        ChatError::from_code(self).into_event()
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let request_id = current_request_id();

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

impl From<crate::store::StoreError> for ChatError {
    fn from(error: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match error {
            StoreError::RoomNotFound => Self::new(ErrorCode::NotFound, "room not found"),
            StoreError::MessageNotFound => Self::new(ErrorCode::NotFound, "message not found"),
            StoreError::Backend(_) => Self::from_code(ErrorCode::PersistenceError),
        }
    }
}

impl From<crate::ledger::LedgerError> for ChatError {
    fn from(error: crate::ledger::LedgerError) -> Self {
        use crate::ledger::LedgerError;
        match error {
            LedgerError::RoomNotFound => Self::new(ErrorCode::NotFound, "room not found"),
            LedgerError::MessageNotFound => Self::new(ErrorCode::NotFound, "message not found"),
            LedgerError::EmptyMessage => Self::from_code(ErrorCode::EmptyMessage),
            LedgerError::Forbidden(reason) => Self::new(ErrorCode::Forbidden, reason),
            LedgerError::Store(_) => Self::from_code(ErrorCode::PersistenceError),
        }
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}
