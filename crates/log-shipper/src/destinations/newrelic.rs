// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! New Relic Log API destination.
//!
//! Every batch becomes a single gzip-compressed request in the detailed log format:
//! one `common` block with the function identity and one entry per record.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::debug;

use crate::config::{DestinationConfig, DEFAULT_NEWRELIC_ENDPOINT};
use crate::destinations::Destination;
use crate::errors::DeliveryError;
use crate::http_utils::get_client;
use crate::records::{Batch, RecordKind};

pub const NAME: &str = "newrelic";
const PLUGIN: &str = "lambda-extension-log-shipper";
const USER_AGENT_VALUE: &str = "lambda-extension-log-shipper/1";
const LICENSE_KEY_HEADER: &str = "X-License-Key";
const REPORT_MESSAGE: &str = "aws lambda report";

#[derive(Debug, Clone)]
pub struct NewRelicConfig {
    pub enabled: bool,
    pub license_key: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
}

impl Default for NewRelicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            license_key: String::new(),
            endpoint: DEFAULT_NEWRELIC_ENDPOINT.to_string(),
            timeout: Duration::from_secs(1),
            https_proxy: None,
        }
    }
}

pub struct NewRelicDestination {
    config: NewRelicConfig,
    identity: DestinationConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct DetailedLog<'a> {
    common: Common<'a>,
    logs: Vec<Log<'a>>,
}

#[derive(Serialize)]
struct Common<'a> {
    attributes: CommonAttributes<'a>,
}

#[derive(Serialize)]
struct CommonAttributes<'a> {
    service: &'a str,
    tag: &'a str,
    plugin: &'static str,
    #[serde(rename = "aws.region")]
    region: &'a str,
}

#[derive(Serialize)]
struct Log<'a> {
    timestamp: i64,
    message: Message<'a>,
    attributes: LogAttributes<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Message<'a> {
    Raw(&'a RawValue),
    Text(&'static str),
}

#[derive(Serialize)]
struct LogAttributes<'a> {
    #[serde(rename = "aws.lambdaRequestId")]
    request_id: &'a str,
    #[serde(rename = "aws.lambdaExtLogType")]
    log_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    aws: Option<&'a RawValue>,
}

impl NewRelicDestination {
    #[must_use]
    pub fn new(config: NewRelicConfig) -> Self {
        let client = get_client(config.https_proxy.as_deref(), config.timeout);
        Self {
            config,
            identity: DestinationConfig::default(),
            client,
        }
    }

    fn build_payload(&self, batch: &Batch) -> Result<Vec<u8>, DeliveryError> {
        let logs = batch
            .iter()
            .map(|record| {
                let (message, aws) = if record.kind == RecordKind::PlatformReport {
                    (Message::Text(REPORT_MESSAGE), Some(&*record.payload))
                } else {
                    (Message::Raw(&record.payload), None)
                };
                Log {
                    timestamp: record.time.timestamp_millis(),
                    message,
                    attributes: LogAttributes {
                        request_id: &record.correlation_id,
                        log_type: record.kind.as_str(),
                        aws,
                    },
                }
            })
            .collect();

        let payload = [DetailedLog {
            common: Common {
                attributes: CommonAttributes {
                    service: &self.identity.function_name,
                    tag: &self.identity.function_name,
                    plugin: PLUGIN,
                    region: &self.identity.region,
                },
            },
            logs,
        }];
        serde_json::to_vec(&payload).map_err(|e| DeliveryError::Payload(e.to_string()))
    }

    fn headers(&self) -> Result<HeaderMap, DeliveryError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(
            LICENSE_KEY_HEADER,
            HeaderValue::from_str(&self.config.license_key)
                .map_err(|e| DeliveryError::Payload(format!("invalid license key: {e}")))?,
        );
        Ok(headers)
    }
}

/// Gzip-compresses a request body. Empty input is rejected.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    if data.is_empty() {
        return Err(DeliveryError::Payload("nothing to compress".to_string()));
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[async_trait]
impl Destination for NewRelicDestination {
    fn name(&self) -> &'static str {
        NAME
    }

    fn configure(&mut self, config: &DestinationConfig) {
        self.identity = config.clone();
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.license_key.is_empty()
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let payload = self.build_payload(batch)?;
        let body = compress(&payload)?;
        debug!(
            "Sending {} records to New Relic ({} bytes compressed)",
            batch.len(),
            body.len()
        );

        let resp = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers()?)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(DeliveryError::Status { status, body })
    }
}
