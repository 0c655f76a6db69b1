use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Conflict,
    Internal,
    Unavailable,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorCode::Validation,
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            409 | 412 => ErrorCode::Conflict,
            502..=504 => ErrorCode::Unavailable,
            _ => ErrorCode::Internal,
        }
    }
}

/// Error reported by the packaging service in its response body.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?} ({status}): {message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ODataErrorEnvelope {
    error: ODataErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ODataErrorDetail {
    #[serde(default)]
    message: ODataErrorMessage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum ODataErrorMessage {
    Localized {
        value: String,
    },
    Plain(String),
    #[default]
    Missing,
}

impl ServiceError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from_status(status),
            status,
            message: message.into(),
        }
    }

    /// Builds the error from a failed response, preferring the OData error message when present.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<ODataErrorEnvelope>(body) {
            Ok(ODataErrorEnvelope {
                error:
                    ODataErrorDetail {
                        message: ODataErrorMessage::Localized { value } | ODataErrorMessage::Plain(value),
                    },
            }) => value,
            _ if body.trim().is_empty() => format!("request failed with status {status}"),
            _ => body.trim().chars().take(256).collect(),
        };
        Self::new(status, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
