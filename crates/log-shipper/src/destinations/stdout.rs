// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::config::DestinationConfig;
use crate::destinations::Destination;
use crate::errors::DeliveryError;
use crate::records::Batch;

pub const NAME: &str = "stdout";

/// Writes one JSON line per record.
pub struct StdoutDestination {
    enabled: bool,
    config: DestinationConfig,
    writer: Mutex<Box<dyn Write + Send>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StdoutLine<'a> {
    forwarder: &'static str,
    time: String,
    #[serde(rename = "type")]
    record_type: &'static str,
    request_id: &'a str,
    content: &'a RawValue,
    function_name: &'a str,
    region: &'a str,
}

impl StdoutDestination {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self::with_writer(enabled, Box::new(io::stdout()))
    }

    #[must_use]
    pub fn with_writer(enabled: bool, writer: Box<dyn Write + Send>) -> Self {
        Self {
            enabled,
            config: DestinationConfig::default(),
            writer: Mutex::new(writer),
        }
    }

    fn render(&self, batch: &Batch) -> Result<Vec<u8>, DeliveryError> {
        let mut out = Vec::new();
        for record in batch {
            let line = StdoutLine {
                forwarder: NAME,
                time: record.time.to_rfc3339_opts(SecondsFormat::Millis, true),
                record_type: record.kind.as_str(),
                request_id: &record.correlation_id,
                content: &record.payload,
                function_name: &self.config.function_name,
                region: &self.config.region,
            };
            serde_json::to_writer(&mut out, &line)
                .map_err(|e| DeliveryError::Payload(e.to_string()))?;
            out.push(b'\n');
        }
        Ok(out)
    }
}

#[async_trait]
impl Destination for StdoutDestination {
    fn name(&self) -> &'static str {
        NAME
    }

    fn configure(&mut self, config: &DestinationConfig) {
        self.config = config.clone();
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let lines = self.render(batch)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DeliveryError::Payload("stdout writer lock poisoned".to_string()))?;
        writer.write_all(&lines)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DeliveryError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DeliveryError::Payload("stdout writer lock poisoned".to_string()))?;
        writer.flush()?;
        Ok(())
    }
}
