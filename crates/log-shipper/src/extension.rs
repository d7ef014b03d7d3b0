// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for the Lambda Extensions API and Logs API.
//!
//! <https://docs.aws.amazon.com/lambda/latest/dg/runtimes-extensions-api.html>

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::errors::LifecycleError;

const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";
const EXTENSION_ID_HEADER: &str = "Lambda-Extension-Identifier";
const EXTENSION_ERROR_TYPE_HEADER: &str = "Lambda-Extension-Function-Error-Type";

const EXTENSION_PATH: &str = "/2020-01-01/extension";
const LOGS_PATH: &str = "/2020-08-15/logs";

/// Reported through `init/error` when startup fails after registration.
pub const INIT_FAILED: &str = "Extension.InitFailed";
/// Reported through `exit/error` when polling for the next event fails.
pub const POLL_FAILED: &str = "Extension.PollFailed";
/// Reported through `exit/error` when the log intake server stops on its own.
pub const INTAKE_FAILED: &str = "Extension.IntakeFailed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Invoke,
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterResponse {
    pub function_name: String,
    pub function_version: String,
    pub handler: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextEventResponse {
    pub event_type: EventType,
    #[serde(default)]
    pub deadline_ms: i64,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub invoked_function_arn: String,
    #[serde(default)]
    pub tracing: Option<Tracing>,
    #[serde(default)]
    pub shutdown_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tracing {
    #[serde(rename = "type")]
    pub tracing_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusResponse {
    pub status: String,
}

/// Log streams the Logs API can push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Platform,
    Function,
    Extension,
}

/// Where and how the Logs API should push records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeLogsParams {
    pub listen_port: u16,
    pub max_items: u32,
    pub max_bytes: u32,
    pub timeout_ms: u32,
}

#[async_trait]
pub trait LifecycleClient: Send + Sync {
    async fn register(&mut self, extension_name: &str) -> Result<RegisterResponse, LifecycleError>;

    /// Long-polls until the host delivers the next event.
    async fn next_event(&self) -> Result<NextEventResponse, LifecycleError>;

    async fn init_error(&self, error_type: &str) -> Result<StatusResponse, LifecycleError>;

    async fn exit_error(&self, error_type: &str) -> Result<StatusResponse, LifecycleError>;

    async fn subscribe_logs(
        &self,
        types: &[LogType],
        params: &SubscribeLogsParams,
    ) -> Result<(), LifecycleError>;
}

pub struct ExtensionClient {
    base_url: String,
    client: reqwest::Client,
    extension_id: Option<String>,
}

impl ExtensionClient {
    /// `runtime_api` is the `host:port` found in `AWS_LAMBDA_RUNTIME_API`.
    #[must_use]
    pub fn new(runtime_api: &str) -> Self {
        Self {
            base_url: format!("http://{runtime_api}"),
            // no request timeout, next_event blocks until the host has something to say
            client: reqwest::Client::new(),
            extension_id: None,
        }
    }

    pub fn extension_id(&self) -> Option<&str> {
        self.extension_id.as_deref()
    }

    fn with_id(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.extension_id {
            Some(id) => builder.header(EXTENSION_ID_HEADER, id),
            None => builder,
        }
    }

    async fn report_error(
        &self,
        action: &'static str,
        error_type: &str,
    ) -> Result<StatusResponse, LifecycleError> {
        let url = format!("{}{EXTENSION_PATH}/{action}", self.base_url);
        let request = self
            .with_id(self.client.post(url))
            .header(CONTENT_TYPE, "application/json")
            .header(EXTENSION_ERROR_TYPE_HEADER, error_type);
        let (_, body) = execute(action, request).await?;
        decode(action, &body)
    }
}

async fn execute(
    action: &'static str,
    request: RequestBuilder,
) -> Result<(reqwest::header::HeaderMap, String), LifecycleError> {
    let resp = request
        .send()
        .await
        .map_err(|source| LifecycleError::Transport { action, source })?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp
        .text()
        .await
        .map_err(|source| LifecycleError::Transport { action, source })?;
    if status != StatusCode::OK {
        return Err(LifecycleError::Status {
            action,
            status,
            body,
        });
    }
    Ok((headers, body))
}

fn decode<T: DeserializeOwned>(action: &'static str, body: &str) -> Result<T, LifecycleError> {
    serde_json::from_str(body).map_err(|source| LifecycleError::Decode { action, source })
}

#[async_trait]
impl LifecycleClient for ExtensionClient {
    async fn register(&mut self, extension_name: &str) -> Result<RegisterResponse, LifecycleError> {
        const ACTION: &str = "register";
        let url = format!("{}{EXTENSION_PATH}/{ACTION}", self.base_url);
        let request = self
            .client
            .post(url)
            .header(EXTENSION_NAME_HEADER, extension_name)
            .json(&json!({ "events": [EventType::Invoke, EventType::Shutdown] }));

        let (headers, body) = execute(ACTION, request).await?;
        let response = decode(ACTION, &body)?;
        self.extension_id = headers
            .get(EXTENSION_ID_HEADER)
            .and_then(|val| val.to_str().ok())
            .map(str::to_string);
        debug!("Registered extension {extension_name}, id {:?}", self.extension_id);
        Ok(response)
    }

    async fn next_event(&self) -> Result<NextEventResponse, LifecycleError> {
        const ACTION: &str = "event/next";
        let url = format!("{}{EXTENSION_PATH}/{ACTION}", self.base_url);
        let request = self
            .with_id(self.client.get(url))
            .header(CONTENT_TYPE, "application/json");
        let (_, body) = execute(ACTION, request).await?;
        decode(ACTION, &body)
    }

    async fn init_error(&self, error_type: &str) -> Result<StatusResponse, LifecycleError> {
        self.report_error("init/error", error_type).await
    }

    async fn exit_error(&self, error_type: &str) -> Result<StatusResponse, LifecycleError> {
        self.report_error("exit/error", error_type).await
    }

    async fn subscribe_logs(
        &self,
        types: &[LogType],
        params: &SubscribeLogsParams,
    ) -> Result<(), LifecycleError> {
        const ACTION: &str = "subscribe logs";
        let url = format!("{}{LOGS_PATH}", self.base_url);
        let body = json!({
            "destination": {
                "protocol": "HTTP",
                "URI": format!("http://sandbox:{}", params.listen_port),
                "encoding": "JSON",
                "method": "POST",
            },
            "types": types,
            "buffering": {
                "timeoutMs": params.timeout_ms,
                "maxBytes": params.max_bytes,
                "maxItems": params.max_items,
            },
        });
        let request = self.with_id(self.client.put(url)).json(&body);
        let (_, body) = execute(ACTION, request).await?;
        debug!("Subscribed to logs: {body}");
        Ok(())
    }
}
