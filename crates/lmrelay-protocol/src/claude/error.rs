use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTypeKnown {
    /// 400
    InvalidRequestError,
    /// 401
    AuthenticationError,
    /// 403
    PermissionError,
    /// 404
    NotFoundError,
    /// 413
    RequestTooLarge,
    /// 429
    RateLimitError,
    /// 500
    ApiError,
    /// 529
    OverloadedError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorType {
    Known(ErrorTypeKnown),
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub r#type: ErrorType,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(r#type: ErrorTypeKnown, message: impl Into<String>) -> Self {
        Self {
            r#type: ErrorType::Known(r#type),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorResponseType {
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub r#type: ErrorResponseType,
    pub error: ErrorDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: ErrorDetail) -> Self {
        Self {
            r#type: ErrorResponseType::Error,
            error,
            request_id: None,
        }
    }
}
