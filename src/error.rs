use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures of the push pipeline.
///
/// Everything except `Configuration` is scoped to a single subscription and ends
/// up as an entry in the dispatch report.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("MissingKeys")]
    MissingKeys,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("subscription expired (status {0})")]
    SubscriptionExpired(u16),

    #[error("status {status}: {body}")]
    Delivery { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),
}

/// Error returned by the HTTP handlers and the subscription store; renders as
/// `status` plus a plain-text message. Any `std::error::Error` (redb, serde,
/// `PushError`) converts into a 500 through `?`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch_step() -> Result<(), AppError> {
        let signed: Result<(), PushError> =
            Err(PushError::Configuration("VAPID_PRIVATE_KEY must be 32 bytes".to_string()));
        signed?;
        Ok(())
    }

    #[test]
    fn push_errors_surface_as_internal_errors() {
        let err = dispatch_step().unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "configuration error: VAPID_PRIVATE_KEY must be 32 bytes");
    }

    #[test]
    fn renders_status_and_message() {
        let response = AppError::new(StatusCode::FORBIDDEN, "invalid notify token").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
