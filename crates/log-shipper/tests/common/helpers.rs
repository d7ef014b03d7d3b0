// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use log_shipper::config::Config;
use std::time::Duration;

pub const REQUEST_ID: &str = "X";

/// Payload with every record type the Logs API sends for a single invocation.
pub const SAMPLE_PAYLOAD: &str = r#"[
    {"time": "2020-08-20T12:31:32.123Z", "type": "platform.start", "record": {"requestId": "X"}},
    {"time": "2020-08-20T12:31:32.123Z", "type": "platform.logsSubscription", "record": {"name": "Foo.bar", "state": "Subscribed", "types": ["function", "platform"]}},
    {"time": "2020-08-20T12:31:32.123Z", "type": "function", "record": "ERROR something happened"},
    {"time": "2020-08-20T12:31:32.123Z", "type": "platform.logsDropped", "record": {"reason": "Consumer seems to have fallen behind as it has not acknowledged receipt of logs.", "droppedRecords": 123, "droppedBytes": 12345}},
    {"time": "2020-08-20T12:31:32.123Z", "type": "platform.end", "record": {"requestId": "X"}},
    {"time": "2020-08-20T12:31:32.123Z", "type": "platform.report", "record": {"requestId": "X", "metrics": {"durationMs": 101.51, "billedDurationMs": 300, "memorySizeMB": 512, "maxMemoryUsedMB": 33, "initDurationMs": 116.67}}}
]"#;

pub fn function_payload(line: &str) -> String {
    format!(r#"[{{"time": "2020-08-20T12:31:32.123Z", "type": "function", "record": "{line}"}}]"#)
}

/// Configuration listening on an ephemeral local port with short shutdown bounds.
pub fn test_config() -> Config {
    Config {
        function_name: "my-function".to_string(),
        region: "us-east-1".to_string(),
        runtime_api: "127.0.0.1:9001".to_string(),
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        shutdown_grace: Duration::from_millis(200),
        shutdown_deadline: Duration::from_millis(1_950),
        ..Config::default()
    }
}

/// POST a Logs API payload to the intake server and return the status code
pub async fn post_logs(port: u16, body: impl Into<String>) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/"))
        .header("Content-Type", "application/json")
        .body(body.into())
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .expect("intake server should answer")
        .status()
}
