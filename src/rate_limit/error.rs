//! Rate limit error types

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::category::Category;

/// Message returned to clients whose quota is exhausted
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Header telling a denied client how long to back off
pub const RETRY_AFTER_HEADER: &str = "x-rate-limit-retry-after-seconds";

/// Errors raised by admission control
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// The caller's bucket had no tokens left
    #[error("Rate limit exceeded. Please try again later.")]
    Exceeded {
        category: Category,
        identifier: String,
        retry_after_secs: u64,
    },
}

/// JSON envelope for error responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    status_code: u16,
    message: &'a str,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        match self {
            RateLimitError::Exceeded {
                retry_after_secs, ..
            } => {
                let status = StatusCode::TOO_MANY_REQUESTS;
                let body = ErrorBody {
                    status_code: status.as_u16(),
                    message: RATE_LIMIT_MESSAGE,
                };

                let mut response = (status, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER_HEADER, HeaderValue::from(retry_after_secs));
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exceeded() -> RateLimitError {
        RateLimitError::Exceeded {
            category: Category::Auth,
            identifier: "u1".to_string(),
            retry_after_secs: 60,
        }
    }

    #[test]
    fn test_display_is_client_message() {
        assert_eq!(exceeded().to_string(), RATE_LIMIT_MESSAGE);
    }

    #[test]
    fn test_into_response_is_429() {
        let response = exceeded().into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER_HEADER], "60");
    }
}
