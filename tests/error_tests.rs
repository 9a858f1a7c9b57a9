// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io;

use proptest::prelude::*;
use shoulders::error::{
    format_chat_error, no_api_key_message, offline_message, AccessError, ApiError, ErrorKind,
    ShouldersError,
};

#[test]
fn test_io_error_conversion() {
    let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
    let error: ShouldersError = io_error.into();

    match error {
        ShouldersError::Io(_) => {}
        _ => panic!("Expected Io error, got different error type"),
    }
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{ broken").unwrap_err();
    let error: ShouldersError = json_error.into();
    assert!(error.to_string().starts_with("JSON error:"));
}

#[test]
fn test_config_error_display() {
    let error = ShouldersError::Config("Missing API key".to_string());
    assert_eq!(error.to_string(), "Configuration error: Missing API key");
}

#[test]
fn test_tool_execution_error() {
    let error = ShouldersError::ToolExecution("Command failed".to_string());
    assert_eq!(error.to_string(), "Tool execution failed: Command failed");
}

#[test]
fn test_budget_exceeded_display() {
    let error = ShouldersError::BudgetExceeded {
        spent: 10.456,
        limit: 10.0,
    };
    assert_eq!(
        error.to_string(),
        "Monthly budget reached: spent $10.46 of $10.00"
    );
}

#[test]
fn test_api_error_wraps() {
    let error: ShouldersError = ApiError::Timeout.into();
    assert_eq!(error.to_string(), "API error: Request timed out");

    let error: ShouldersError = AccessError::NoCredentials.into();
    assert_eq!(error.to_string(), "Access error: no credentials configured");
}

#[test]
fn test_classification_of_client_errors() {
    let cases = [
        (ApiError::from_status(400, "upstream timed out"), ErrorKind::Timeout),
        (ApiError::from_status(400, "connection refused"), ErrorKind::Transport),
        (ApiError::from_status(404, "model not found"), ErrorKind::Other),
        (ApiError::from_status(503, "unavailable"), ErrorKind::Server),
        (ApiError::Network("reset".into()), ErrorKind::Transport),
        (ApiError::StreamError("eof".into()), ErrorKind::Transport),
        (ApiError::InvalidResponse("not json".into()), ErrorKind::Malformed),
    ];
    for (error, kind) in cases {
        assert_eq!(error.kind(), kind, "{:?}", error);
    }
}

#[test]
fn test_body_message_is_extracted_from_wrapped_json() {
    let error = ApiError::from_status(400, r#"HTTP 400: {"error": "context too long"}"#);
    assert_eq!(error.user_message(), "context too long");

    let empty = ApiError::from_status(418, "");
    assert_eq!(empty.user_message(), "Request failed (HTTP 418). Try again.");
}

#[test]
fn test_chat_error_rendering() {
    let rendered = format_chat_error(&ApiError::from_status(401, "bad key"));
    assert!(rendered.starts_with("**Error:** Invalid API key."));

    assert!(no_api_key_message("gpt-5.2").contains("**gpt-5.2**"));
    assert!(no_api_key_message("").contains("**this model**"));
    assert!(offline_message().contains("offline"));
}

proptest! {
    #[test]
    fn prop_user_message_is_bounded(status in 400u16..500, body in ".{0,600}") {
        prop_assume!(![401, 402, 403, 429].contains(&status));
        let message = ApiError::from_status(status, &body).user_message();
        prop_assert!(message.chars().count() <= 203);
        prop_assert!(!message.is_empty());
    }

    #[test]
    fn prop_status_survives_from_status(status in 400u16..600) {
        prop_assert_eq!(ApiError::from_status(status, "x").status(), Some(status));
    }
}
