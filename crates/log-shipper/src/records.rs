// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoding of Logs API payloads into normalized records.
//!
//! The Logs API pushes a JSON array of `{time, type, record}` messages. Messages are walked in
//! order: `platform.start` only updates the running request id, `platform.report` carries its own
//! request id and contributes its `metrics` object, and `function`, `platform.fault` and
//! `platform.logsDropped` are forwarded verbatim under the running request id. Every other type is
//! ignored.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::{debug, error, trace};

use crate::errors::{ParseError, RecordError};

/// The record types this pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    PlatformStart,
    PlatformReport,
    PlatformFault,
    PlatformLogsDropped,
    Function,
}

impl RecordKind {
    /// Maps a Logs API `type` field to a kind. Unknown types yield `None`.
    pub fn from_type(record_type: &str) -> Option<Self> {
        match record_type {
            "platform.start" => Some(Self::PlatformStart),
            "platform.report" => Some(Self::PlatformReport),
            "platform.fault" => Some(Self::PlatformFault),
            "platform.logsDropped" => Some(Self::PlatformLogsDropped),
            "function" => Some(Self::Function),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlatformStart => "platform.start",
            Self::PlatformReport => "platform.report",
            Self::PlatformFault => "platform.fault",
            Self::PlatformLogsDropped => "platform.logsDropped",
            Self::Function => "function",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log entry ready to be handed to destinations.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub time: DateTime<Utc>,
    pub kind: RecordKind,
    /// Request id of the invocation that produced the record.
    pub correlation_id: String,
    /// The inner record as received (or the `metrics` object for reports).
    pub payload: Box<RawValue>,
}

/// Non-empty, ordered set of records decoded from a single ingestion call.
#[derive(Debug, Clone)]
pub struct Batch {
    records: Vec<NormalizedRecord>,
}

#[allow(clippy::len_without_is_empty)]
impl Batch {
    /// Returns `None` for an empty record list; empty batches are never queued.
    pub fn new(records: Vec<NormalizedRecord>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self { records })
        }
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NormalizedRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a NormalizedRecord;
    type IntoIter = std::slice::Iter<'a, NormalizedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// Missing fields take their defaults. Only a wrongly typed field rejects the payload.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    time: DateTime<Utc>,
    #[serde(rename = "type", default)]
    record_type: String,
    #[serde(default)]
    record: Option<Box<RawValue>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRecord {
    request_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRecord {
    request_id: String,
    metrics: Box<RawValue>,
}

/// Turns raw Logs API payloads into batches. Holds no state between calls.
#[derive(Debug, Clone, Copy)]
pub struct RecordParser {
    include_platform_report: bool,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self {
            include_platform_report: true,
        }
    }
}

impl RecordParser {
    #[must_use]
    pub fn new(include_platform_report: bool) -> Self {
        Self {
            include_platform_report,
        }
    }

    /// Parses one ingestion body. The request id only tracks state within this body.
    pub fn parse(&self, body: &[u8]) -> Result<Option<Batch>, ParseError> {
        let messages: Vec<RawMessage> = serde_json::from_slice(body)?;

        let mut records = Vec::with_capacity(messages.len());
        let mut request_id = String::new();

        for message in messages {
            let Some(kind) = RecordKind::from_type(&message.record_type) else {
                debug!("Ignoring log with unsupported type {}", message.record_type);
                continue;
            };

            let record = match message.record {
                Some(record) => record,
                None => {
                    error!("{}", missing_record(kind));
                    continue;
                }
            };

            match kind {
                RecordKind::PlatformStart => match decode_record::<StartRecord>(kind, &record) {
                    Ok(start) => request_id = start.request_id,
                    Err(e) => error!("{e}"),
                },
                RecordKind::PlatformReport => {
                    if !self.include_platform_report {
                        continue;
                    }
                    match decode_record::<ReportRecord>(kind, &record) {
                        Ok(report) => records.push(NormalizedRecord {
                            time: message.time,
                            kind,
                            correlation_id: report.request_id,
                            payload: report.metrics,
                        }),
                        Err(e) => error!("{e}"),
                    }
                }
                RecordKind::Function
                | RecordKind::PlatformFault
                | RecordKind::PlatformLogsDropped => {
                    records.push(NormalizedRecord {
                        time: message.time,
                        kind,
                        correlation_id: request_id.clone(),
                        payload: record,
                    });
                }
            }
            trace!("{} requestId={}", kind, request_id);
        }

        Ok(Batch::new(records))
    }
}

fn decode_record<T: DeserializeOwned>(
    kind: RecordKind,
    record: &RawValue,
) -> Result<T, RecordError> {
    serde_json::from_str(record.get()).map_err(|source| RecordError {
        record_type: kind.as_str(),
        source,
    })
}

fn missing_record(kind: RecordKind) -> RecordError {
    RecordError {
        record_type: kind.as_str(),
        source: serde::de::Error::missing_field("record"),
    }
}
