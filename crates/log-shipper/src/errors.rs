// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;
use std::time::Duration;

/// The body of an ingestion call is not a JSON array of log messages.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed log payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A single message of an otherwise valid payload could not be decoded.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse {record_type} record: {source}")]
pub struct RecordError {
    pub record_type: &'static str,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("delivery queue is closed")]
    Closed,
    #[error("shutdown started before the batch could be queued")]
    Cancelled,
}

/// Failure to hand a batch to a destination. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to prepare payload: {0}")]
    Payload(String),
    #[error("failed to write records: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to reach destination: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("destination responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("destination did not answer within {0:?}")]
    Timeout(Duration),
}

/// Errors returned by the Extensions API and Logs API client.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{action} request failed: {source}")]
    Transport {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{action} failed, status: {status}, response: {body}")]
    Status {
        action: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{action} returned an unexpected body: {source}")]
    Decode {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that terminate the process with a non-zero exit code.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start: {0}")]
    FatalStartup(String),

    #[error("Failed to poll the next lifecycle event: {0}")]
    Transport(#[source] LifecycleError),

    #[error("Log intake server stopped: {0}")]
    IntakeStopped(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipper_error_display() {
        let error = ShipperError::InvalidConfig("AWS_REGION is not set".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: AWS_REGION is not set"
        );
    }

    #[test]
    fn test_lifecycle_status_error_display() {
        let error = LifecycleError::Status {
            action: "register",
            status: StatusCode::FORBIDDEN,
            body: "denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "register failed, status: 403 Forbidden, response: denied"
        );
    }

    #[test]
    fn test_parse_error_wraps_json_error() {
        let source = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let error = ParseError::from(source);
        assert!(error.to_string().starts_with("malformed log payload"));
    }
}
