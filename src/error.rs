// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Shoulders
//!
//! `ShouldersError` is the crate-wide error. `ApiError` covers everything a
//! provider or the transport can report, and knows how to classify itself and
//! render a message that is safe to show inside a conversation.

use thiserror::Error;

/// Longest provider body message shown verbatim to the user.
const MAX_BODY_MESSAGE_CHARS: usize = 200;

/// Main error type for Shoulders operations
#[derive(Error, Debug)]
pub enum ShouldersError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Tool execution errors
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Session errors (unknown session, session busy)
    #[error("Session error: {0}")]
    Session(String),

    /// Access resolution errors
    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    /// Monthly spend limit reached
    #[error("Monthly budget reached: spent ${spent:.2} of ${limit:.2}")]
    BudgetExceeded { spent: f64, limit: f64 },
}

/// API-specific error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Authentication failed (invalid or revoked API key)
    #[error("Authentication failed ({status}): {message}")]
    AuthenticationFailed { status: u16, message: String },

    /// Rate limited by the API
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Account balance or quota exhausted
    #[error("Quota exhausted: {0}")]
    QuotaExceeded(String),

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// Failure classes the engine and callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection refused, DNS, reset
    Transport,
    Timeout,
    /// 401/403
    Auth,
    /// 429
    RateLimit,
    /// 402 or provider balance exhausted
    Quota,
    /// 5xx
    Server,
    /// Outer response envelope could not be understood
    Malformed,
    Other,
}

/// Why credentials for a model could not be produced.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// No direct key and no relay token configured
    #[error("no credentials configured")]
    NoCredentials,

    /// Credentials exist but refreshing them needs the network
    #[error("offline: credentials could not be refreshed")]
    Offline,
}

impl ApiError {
    /// Build an error from a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = body_message(body).unwrap_or_else(|| body.trim().to_string());
        match status {
            401 | 403 => ApiError::AuthenticationFailed { status, message },
            402 => ApiError::QuotaExceeded(message),
            429 => ApiError::RateLimited(message),
            _ => ApiError::ServerError { status, message },
        }
    }

    /// Map a reqwest failure onto the transport taxonomy.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if let Some(status) = err.status() {
            ApiError::from_status(status.as_u16(), &err.to_string())
        } else if err.is_decode() || err.is_body() {
            ApiError::StreamError(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthenticationFailed { status, .. } => Some(*status),
            ApiError::QuotaExceeded(_) => Some(402),
            ApiError::RateLimited(_) => Some(429),
            ApiError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::AuthenticationFailed { .. } => ErrorKind::Auth,
            ApiError::RateLimited(_) => ErrorKind::RateLimit,
            ApiError::QuotaExceeded(_) => ErrorKind::Quota,
            ApiError::Timeout => ErrorKind::Timeout,
            ApiError::Network(_) | ApiError::StreamError(_) => ErrorKind::Transport,
            ApiError::InvalidResponse(_) => ErrorKind::Malformed,
            ApiError::ServerError { status, message } => {
                if *status >= 500 {
                    ErrorKind::Server
                } else if mentions_timeout(message) {
                    ErrorKind::Timeout
                } else if mentions_connectivity(message) {
                    ErrorKind::Transport
                } else {
                    ErrorKind::Other
                }
            }
        }
    }

    pub fn is_auth_error(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind() == ErrorKind::RateLimit
    }

    /// Friendly one-line description for display inside a conversation.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Auth => "Invalid API key. Update it in your provider settings, \
                                or sign in to your Shoulders account."
                .to_string(),
            ErrorKind::Quota => match self {
                ApiError::QuotaExceeded(message) if !message.is_empty() => {
                    truncate_chars(message, MAX_BODY_MESSAGE_CHARS)
                }
                _ => "Insufficient balance. Add funds at [shoulde.rs/account](https://shoulde.rs/account)."
                    .to_string(),
            },
            ErrorKind::RateLimit => "Rate limit exceeded. Wait a moment and try again.".to_string(),
            ErrorKind::Server => {
                "The AI provider is experiencing issues. Try again in a few minutes.".to_string()
            }
            ErrorKind::Timeout => {
                "Request timed out. Check your connection and try again.".to_string()
            }
            ErrorKind::Transport => {
                "Could not connect to the AI provider. Check your internet connection."
                    .to_string()
            }
            ErrorKind::Malformed | ErrorKind::Other => match self {
                ApiError::ServerError { status, message } => {
                    if message.is_empty() {
                        format!("Request failed (HTTP {}). Try again.", status)
                    } else {
                        truncate_chars(message, MAX_BODY_MESSAGE_CHARS)
                    }
                }
                other => truncate_chars(&other.to_string(), MAX_BODY_MESSAGE_CHARS),
            },
        }
    }
}

/// Render an API failure the way it is appended to an assistant message.
pub fn format_chat_error(err: &ApiError) -> String {
    format!("**Error:** {}", err.user_message())
}

/// Message shown when neither a direct key nor a relay token is available.
pub fn no_api_key_message(model: &str) -> String {
    let label = if model.is_empty() { "this model" } else { model };
    format!(
        "No API key configured for **{}**. Add one in your provider settings, \
         or sign in to your Shoulders account.",
        label
    )
}

/// Message shown when credentials need a refresh but the network is down.
pub fn offline_message() -> String {
    "You appear to be offline. Check your internet connection and try again.".to_string()
}

/// Pull `error.message`, `message` or a string `error` out of a JSON body.
fn body_message(body: &str) -> Option<String> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_str(&body[start..=end]).ok()?;
    parsed["error"]["message"]
        .as_str()
        .or_else(|| parsed["message"].as_str())
        .or_else(|| parsed["error"].as_str())
        .map(str::to_string)
}

fn mentions_timeout(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout") || lower.contains("timed out")
}

fn mentions_connectivity(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["connection", "network", "refused", "dns"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head)
}

/// Result type alias for Shoulders operations
pub type Result<T> = std::result::Result<T, ShouldersError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_auth() {
        let err = ApiError::from_status(401, r#"{"error":{"message":"Invalid API key"}}"#);
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.is_auth_error());
        assert!(err.to_string().contains("Invalid API key"));
        assert_eq!(err.status(), Some(401));

        let forbidden = ApiError::from_status(403, "forbidden");
        assert_eq!(forbidden.kind(), ErrorKind::Auth);
    }

    #[test]
    fn test_from_status_rate_limit() {
        let err = ApiError::from_status(429, "slow down");
        assert!(err.is_rate_limit());
        assert_eq!(
            err.user_message(),
            "Rate limit exceeded. Wait a moment and try again."
        );
    }

    #[test]
    fn test_from_status_quota_uses_body_message() {
        let err = ApiError::from_status(402, r#"{"message":"Balance is $0.00"}"#);
        assert_eq!(err.kind(), ErrorKind::Quota);
        assert_eq!(err.user_message(), "Balance is $0.00");
    }

    #[test]
    fn test_from_status_quota_default_message() {
        let err = ApiError::from_status(402, "");
        assert!(err.user_message().starts_with("Insufficient balance"));
    }

    #[test]
    fn test_from_status_server() {
        let err = ApiError::from_status(529, "overloaded");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(err.user_message().contains("experiencing issues"));
    }

    #[test]
    fn test_other_status_truncates_long_body() {
        let long = "x".repeat(300);
        let body = format!(r#"{{"error":{{"message":"{}"}}}}"#, long);
        let err = ApiError::from_status(400, &body);
        assert_eq!(err.kind(), ErrorKind::Other);
        let message = err.user_message();
        assert_eq!(message.chars().count(), 203);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn test_other_status_without_body() {
        let err = ApiError::from_status(418, "");
        assert_eq!(err.user_message(), "Request failed (HTTP 418). Try again.");
    }

    #[test]
    fn test_network_and_timeout_kinds() {
        assert_eq!(
            ApiError::Network("connection refused".into()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(ApiError::Timeout.kind(), ErrorKind::Timeout);
        assert!(ApiError::Timeout.user_message().contains("timed out"));
        assert!(ApiError::Network("dns".into())
            .user_message()
            .contains("Could not connect"));
    }

    #[test]
    fn test_invalid_response_is_malformed() {
        let err = ApiError::InvalidResponse("not json".into());
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_format_chat_error() {
        let err = ApiError::from_status(429, "");
        assert_eq!(
            format_chat_error(&err),
            "**Error:** Rate limit exceeded. Wait a moment and try again."
        );
    }

    #[test]
    fn test_no_api_key_message() {
        assert!(no_api_key_message("gpt-5.2").contains("**gpt-5.2**"));
        assert!(no_api_key_message("").contains("**this model**"));
    }

    #[test]
    fn test_body_message_variants() {
        assert_eq!(
            body_message(r#"API error 400: {"error":"bad"}"#),
            Some("bad".to_string())
        );
        assert_eq!(body_message("plain text"), None);
    }

    #[test]
    fn test_shoulders_error_from_api_error() {
        let err: ShouldersError = ApiError::Timeout.into();
        assert!(err.to_string().contains("API error"));
    }

    #[test]
    fn test_shoulders_error_budget() {
        let err = ShouldersError::BudgetExceeded {
            spent: 10.5,
            limit: 10.0,
        };
        assert!(err.to_string().contains("10.50"));
    }

    #[test]
    fn test_shoulders_error_from_access() {
        let err: ShouldersError = AccessError::Offline.into();
        assert!(err.to_string().contains("offline"));
    }

    #[test]
    fn test_result_type_alias() {
        fn test_fn() -> Result<i32> {
            Err(ShouldersError::InvalidInput("test".to_string()))
        }

        assert!(test_fn().is_err());
    }
}
