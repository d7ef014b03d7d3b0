// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations of the lifecycle client and destinations for testing

use async_trait::async_trait;
use log_shipper::{
    config::DestinationConfig,
    destinations::Destination,
    errors::{DeliveryError, LifecycleError},
    extension::{
        EventType, LifecycleClient, LogType, NextEventResponse, RegisterResponse,
        StatusResponse, SubscribeLogsParams,
    },
    records::Batch,
};
use reqwest::StatusCode;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Semaphore};

/// What the host would hand out on the next poll.
#[allow(dead_code)]
pub enum HostEvent {
    Event(EventType),
    TransportError,
}

/// Lifecycle client driven by the test through [`HostEvents`].
///
/// `next_event` blocks until the test pushes an event, and forever once the sender is gone.
pub struct FakeLifecycleClient {
    fail_register: bool,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<HostEvent>>,
    subscribed_port: watch::Sender<Option<u16>>,
    calls: Arc<Mutex<Vec<String>>>,
}

/// Test side of a [`FakeLifecycleClient`].
pub struct HostEvents {
    pub events: mpsc::UnboundedSender<HostEvent>,
    pub subscribed_port: watch::Receiver<Option<u16>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl HostEvents {
    pub fn send(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }

    /// Waits until the orchestrator subscribed and returns the intake port.
    pub async fn intake_port(&mut self) -> u16 {
        let port = self
            .subscribed_port
            .wait_for(Option::is_some)
            .await
            .expect("client dropped before subscribing");
        (*port).unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl FakeLifecycleClient {
    pub fn new(fail_register: bool) -> (Self, HostEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (port_tx, port_rx) = watch::channel(None);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let client = Self {
            fail_register,
            events: tokio::sync::Mutex::new(events_rx),
            subscribed_port: port_tx,
            calls: calls.clone(),
        };
        let host = HostEvents {
            events: events_tx,
            subscribed_port: port_rx,
            calls,
        };
        (client, host)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl LifecycleClient for FakeLifecycleClient {
    async fn register(&mut self, extension_name: &str) -> Result<RegisterResponse, LifecycleError> {
        self.record(format!("register:{extension_name}"));
        if self.fail_register {
            return Err(LifecycleError::Status {
                action: "register",
                status: StatusCode::FORBIDDEN,
                body: "denied".to_string(),
            });
        }
        Ok(RegisterResponse {
            function_name: "my-function".to_string(),
            function_version: "$LATEST".to_string(),
            handler: "index.handler".to_string(),
        })
    }

    async fn next_event(&self) -> Result<NextEventResponse, LifecycleError> {
        let event = self.events.lock().await.recv().await;
        match event {
            Some(HostEvent::Event(event_type)) => Ok(NextEventResponse {
                event_type,
                deadline_ms: 0,
                request_id: String::new(),
                invoked_function_arn: String::new(),
                tracing: None,
                shutdown_reason: None,
            }),
            Some(HostEvent::TransportError) => Err(LifecycleError::Status {
                action: "event/next",
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "host went away".to_string(),
            }),
            None => std::future::pending().await,
        }
    }

    async fn init_error(&self, error_type: &str) -> Result<StatusResponse, LifecycleError> {
        self.record(format!("init_error:{error_type}"));
        Ok(StatusResponse::default())
    }

    async fn exit_error(&self, error_type: &str) -> Result<StatusResponse, LifecycleError> {
        self.record(format!("exit_error:{error_type}"));
        Ok(StatusResponse::default())
    }

    async fn subscribe_logs(
        &self,
        _types: &[LogType],
        params: &SubscribeLogsParams,
    ) -> Result<(), LifecycleError> {
        self.record("subscribe".to_string());
        let _ = self.subscribed_port.send(Some(params.listen_port));
        Ok(())
    }
}

/// Everything a [`RecordingDestination`] saw, shared with the test.
#[derive(Default)]
pub struct Recorded {
    pub config: Option<DestinationConfig>,
    pub batches: Vec<Batch>,
    pub shutdown: bool,
}

/// Destination that records batches. An optional gate holds every send until the test opens it.
pub struct RecordingDestination {
    recorded: Arc<Mutex<Recorded>>,
    gate: Option<Arc<Semaphore>>,
}

#[allow(dead_code)]
impl RecordingDestination {
    pub fn new() -> (Self, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        (
            Self {
                recorded: recorded.clone(),
                gate: None,
            },
            recorded,
        )
    }

    /// Sends block until permits are added to the returned semaphore.
    pub fn gated() -> (Self, Arc<Mutex<Recorded>>, Arc<Semaphore>) {
        let (mut destination, recorded) = Self::new();
        let gate = Arc::new(Semaphore::new(0));
        destination.gate = Some(gate.clone());
        (destination, recorded, gate)
    }
}

#[async_trait]
impl Destination for RecordingDestination {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn configure(&mut self, config: &DestinationConfig) {
        self.recorded.lock().unwrap().config = Some(config.clone());
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), DeliveryError> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| DeliveryError::Payload(e.to_string()))?;
        }
        self.recorded.lock().unwrap().batches.push(batch.clone());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DeliveryError> {
        self.recorded.lock().unwrap().shutdown = true;
        Ok(())
    }
}
