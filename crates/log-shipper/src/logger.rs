// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format of the extension itself.
//!
//! ```text
//! LOG_SHIPPER | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! The prefix keeps the extension's own output apart from the function's logs in CloudWatch.

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_PREFIX: &str = "LOG_SHIPPER";

/// Filter for the given level with the noisy HTTP stack silenced. An unparsable level falls
/// back to `info`.
pub fn env_filter(log_level: &str) -> EnvFilter {
    let directives = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");
    EnvFilter::try_new(directives)
        .unwrap_or_else(|_| EnvFilter::new("h2=off,hyper=off,reqwest=off,rustls=off,info"))
}

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
