//! HTTP utilities for upstream providers

use crate::config::get_llm_connect_timeout_secs;
use crate::llm::LlmError;
use crate::utils::truncate_str;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client as HttpClient, Response, StatusCode};
use std::time::Duration;

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Creates an HTTP client for streaming requests.
///
/// Only the connect phase is bounded here. Time to first delta is enforced
/// by the router, and a total timeout would cut long generations short.
#[must_use]
pub fn create_http_client() -> HttpClient {
    let connect_timeout = Duration::from_secs(get_llm_connect_timeout_secs());
    HttpClient::builder()
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Parse a `Retry-After` header given in seconds.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Turn a non-success response into an `LlmError`, consuming the body.
pub async fn error_from_response(provider: &str, response: Response) -> LlmError {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let wait_secs = parse_retry_after(response.headers());
        let error_text = response.text().await.unwrap_or_default();
        return LlmError::RateLimit {
            wait_secs,
            message: truncate_str(&error_text, MAX_ERROR_BODY_CHARS),
        };
    }

    let error_text = response.text().await.unwrap_or_default();
    LlmError::ApiError(describe_error_body(provider, status, &error_text))
}

fn describe_error_body(provider: &str, status: StatusCode, body: &str) -> String {
    // Nginx and CDN error pages
    let trimmed = body.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    if is_html {
        format!("{provider} API error: {status} (Server returned HTML error page)")
    } else if body.chars().count() > MAX_ERROR_BODY_CHARS {
        format!(
            "{provider} API error: {status} - {}... (truncated)",
            truncate_str(body, MAX_ERROR_BODY_CHARS)
        )
    } else {
        format!("{provider} API error: {status} - {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 12 "));
        assert_eq!(parse_retry_after(&headers), Some(12));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_html_error_pages_are_summarised() {
        let msg = describe_error_body(
            "groq",
            StatusCode::BAD_GATEWAY,
            "<!DOCTYPE html><html><body>nginx</body></html>",
        );
        assert_eq!(
            msg,
            "groq API error: 502 Bad Gateway (Server returned HTML error page)"
        );
    }

    #[test]
    fn test_long_bodies_are_truncated_on_char_boundary() {
        let body = "ж".repeat(MAX_ERROR_BODY_CHARS + 10);
        let msg = describe_error_body("openrouter", StatusCode::BAD_REQUEST, &body);
        assert!(msg.ends_with("... (truncated)"));
        assert_eq!(msg.matches('ж').count(), MAX_ERROR_BODY_CHARS);
    }
}
