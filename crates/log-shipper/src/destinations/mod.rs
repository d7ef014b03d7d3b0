// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sinks that batches are fanned out to.

use async_trait::async_trait;

use crate::config::DestinationConfig;
use crate::errors::DeliveryError;
use crate::records::Batch;

pub mod newrelic;
pub mod stdout;

#[async_trait]
pub trait Destination: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Receives the function identity before the first batch. Called once.
    fn configure(&mut self, config: &DestinationConfig);

    /// Disabled destinations never receive batches.
    fn is_enabled(&self) -> bool;

    /// Delivers one batch. Failures are reported, never retried.
    async fn send_batch(&self, batch: &Batch) -> Result<(), DeliveryError>;

    /// Releases resources after the last batch.
    async fn shutdown(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}
