// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Error handling for the IAM API
//! Implements RFC 7807 Problem Details format

use dotiam_core::IamError;
use http_body_util::Full;
use hyper::{Response, StatusCode, body::Bytes};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

/// API error types following REST conventions
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },

    #[error("Unprocessable entity: {message}")]
    UnprocessableEntity { message: String },

    #[error("Internal server error: {message}")]
    InternalServerError { message: String },

    #[error("Bad gateway: {message}")]
    BadGateway { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Hyper error: {0}")]
    HyperError(#[from] hyper::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnprocessableEntity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            // Malformed request bodies
            ApiError::SerdeJsonError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest { .. } => "bad_request",
            ApiError::Forbidden { .. } => "forbidden",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Conflict { .. } => "conflict",
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::UnprocessableEntity { .. } => "unprocessable_entity",
            ApiError::InternalServerError { .. } => "internal_server_error",
            ApiError::BadGateway { .. } => "bad_gateway",
            ApiError::ServiceUnavailable { .. } => "service_unavailable",
            ApiError::SerdeJsonError(_) => "json_error",
            ApiError::HyperError(_) => "http_error",
            ApiError::IoError(_) => "io_error",
            ApiError::HttpError(_) => "http_error",
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest { message: message.into() }
    }
}

/// Engine errors keep their meaning at the HTTP boundary
impl From<IamError> for ApiError {
    fn from(err: IamError) -> Self {
        let message = err.to_string();
        match err {
            IamError::NotFound { .. } => ApiError::NotFound { message },
            IamError::Conflict { .. } => ApiError::Conflict { message },
            IamError::InvalidRequest { .. } => ApiError::BadRequest { message },
            IamError::ReadOnly { .. } => ApiError::Forbidden { message },
            IamError::Backup { .. } => ApiError::UnprocessableEntity { message },
            IamError::Transport { .. } => ApiError::BadGateway { message },
            IamError::Unavailable { .. } | IamError::Cancelled { .. } => ApiError::ServiceUnavailable { message },
            IamError::Storage { .. } | IamError::Serialization(_) => ApiError::InternalServerError { message },
        }
    }
}

/// RFC 7807 Problem Details response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type
    #[serde(rename = "type")]
    pub problem_type: String,

    /// A short, human-readable summary of the problem type
    pub title: String,

    /// The HTTP status code generated by the origin server
    pub status: u16,

    /// A human-readable explanation specific to this occurrence
    pub detail: String,

    /// A URI reference that identifies the specific occurrence
    pub instance: String,

    /// Additional extension members
    #[serde(flatten)]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl ProblemDetails {
    /// Create a new problem details response
    pub fn new(error: &ApiError, instance: String) -> Self {
        let status_code = error.status_code();

        Self {
            problem_type: format!("https://dotiam.dotlanth.com/problems/{}", error.error_type()),
            title: status_code.canonical_reason().unwrap_or("Unknown Error").to_string(),
            status: status_code.as_u16(),
            detail: error.to_string(),
            instance,
            extensions: HashMap::new(),
        }
    }

    /// Add extension data to the problem details
    pub fn with_extension(mut self, key: String, value: serde_json::Value) -> Self {
        self.extensions.insert(key, value);
        self
    }
}

/// Render an error as a problem details response for `instance`
pub fn problem_response(error: ApiError, instance: &str) -> Response<Full<Bytes>> {
    let status_code = error.status_code();
    let problem_details = ProblemDetails::new(&error, instance.to_string()).with_extension("error".to_string(), serde_json::Value::String(error.error_type().to_string()));

    if status_code.is_server_error() {
        error!("API Error: {} - {}", status_code, error);
    } else {
        warn!("API Error: {} - {}", status_code, error);
    }

    let json = match serde_json::to_string(&problem_details) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize error response: {}", e);
            r#"{"type":"https://dotiam.dotlanth.com/problems/internal_server_error","title":"Internal Server Error","status":500,"detail":"An internal error occurred","instance":"/"}"#.to_string()
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status_code;
    let headers = response.headers_mut();
    headers.insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/problem+json"));
    headers.insert(hyper::header::CACHE_CONTROL, hyper::header::HeaderValue::from_static("no-cache"));
    response
}

/// Convert ApiError to HTTP response
impl From<ApiError> for Response<Full<Bytes>> {
    fn from(error: ApiError) -> Self {
        problem_response(error, "/")
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

impl From<hyper::http::Error> for ApiError {
    fn from(err: hyper::http::Error) -> Self {
        ApiError::HttpError(err.to_string())
    }
}

impl From<multer::Error> for ApiError {
    fn from(err: multer::Error) -> Self {
        ApiError::BadRequest {
            message: format!("Invalid multipart body: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_engine_error_status_mapping() {
        let cases = [
            (IamError::not_found("user", "u1"), StatusCode::NOT_FOUND),
            (IamError::conflict("alias taken"), StatusCode::CONFLICT),
            (IamError::invalid("empty name"), StatusCode::BAD_REQUEST),
            (IamError::ReadOnly { message: "replica".into() }, StatusCode::FORBIDDEN),
            (IamError::transport("fetch backup", "refused"), StatusCode::BAD_GATEWAY),
            (IamError::Unavailable { message: "unhealthy".into() }, StatusCode::SERVICE_UNAVAILABLE),
            (
                IamError::Backup {
                    operation: "restore".into(),
                    message: "corrupt".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[tokio::test]
    async fn test_problem_details_body() {
        let response = problem_response(ApiError::NotFound { message: "role 'x' does not exist".into() }, "/v1/roles/x");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[hyper::header::CONTENT_TYPE], "application/problem+json");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let problem: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem["type"], "https://dotiam.dotlanth.com/problems/not_found");
        assert_eq!(problem["title"], "Not Found");
        assert_eq!(problem["status"], 404);
        assert_eq!(problem["instance"], "/v1/roles/x");
        assert_eq!(problem["error"], "not_found");
    }
}
