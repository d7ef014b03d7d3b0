// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Top-level control loop of the extension.
//!
//! `Unregistered -> Polling -> ShuttingDown -> Closed`. The orchestrator registers, starts the
//! intake server and the dispatcher, subscribes to the Logs API and then polls for events. A
//! `SHUTDOWN` event, the external termination signal, a failed poll or the intake server
//! stopping on its own all end the poll loop, after which the shared cancellation token is fired
//! and the pipeline is given a bounded time to drain.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::destinations::Destination;
use crate::dispatcher::Dispatcher;
use crate::errors::{LifecycleError, ShipperError};
use crate::extension::{
    EventType, LifecycleClient, LogType, INIT_FAILED, INTAKE_FAILED, POLL_FAILED,
};
use crate::intake::IntakeServer;
use crate::queue;
use crate::records::RecordParser;

const SUBSCRIBED_LOG_TYPES: [LogType; 2] = [LogType::Platform, LogType::Function];
// lets a destination's own request timeout fire before the dispatcher gives up on it
const DISPATCH_TIMEOUT_MARGIN: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unregistered,
    Polling,
    ShuttingDown,
    Closed,
}

/// How the pipeline ended once shutdown started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every component finished within the deadline.
    Clean,
    /// The deadline elapsed first.
    Forced,
}

enum PollExit {
    Shutdown,
    Signal,
    Failed(LifecycleError),
    IntakeStopped(String),
}

struct Pipeline {
    /// `None` once the poll loop has observed the intake task finishing.
    intake: Option<JoinHandle<io::Result<()>>>,
    dispatcher: JoinHandle<()>,
}

pub struct Orchestrator<C: LifecycleClient> {
    config: Arc<Config>,
    extension_name: String,
    client: C,
    destinations: Vec<Box<dyn Destination>>,
    state: LifecycleState,
    cancel_token: CancellationToken,
}

impl<C: LifecycleClient> Orchestrator<C> {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        extension_name: impl Into<String>,
        client: C,
        destinations: Vec<Box<dyn Destination>>,
    ) -> Self {
        Self {
            config,
            extension_name: extension_name.into(),
            client,
            destinations,
            state: LifecycleState::Unregistered,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Token fired when shutdown starts. Cancelling it from outside behaves like the
    /// termination signal.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("Lifecycle state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the extension until it is closed.
    ///
    /// Returns the shutdown outcome after a `SHUTDOWN` event or `shutdown_signal`. Registration
    /// and subscription failures return [`ShipperError::FatalStartup`]. Once the pipeline is
    /// closed, a failed poll returns [`ShipperError::Transport`] and an intake server that
    /// stopped by itself returns [`ShipperError::IntakeStopped`].
    pub async fn run(
        &mut self,
        shutdown_signal: impl Future<Output = ()>,
    ) -> Result<ShutdownOutcome, ShipperError> {
        let registration = self
            .client
            .register(&self.extension_name)
            .await
            .map_err(|e| ShipperError::FatalStartup(format!("registration failed: {e}")))?;
        info!(
            "Registered {} for function {} ({})",
            self.extension_name, registration.function_name, registration.function_version
        );
        self.transition(LifecycleState::Polling);

        let pipeline = match self.start_pipeline().await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.report_init_error().await;
                return Err(e);
            }
        };

        self.supervise(pipeline, shutdown_signal).await
    }

    /// Polls until the pipeline has to stop, then shuts it down and maps the reason for stopping
    /// to the result of [`Orchestrator::run`].
    async fn supervise(
        &mut self,
        mut pipeline: Pipeline,
        shutdown_signal: impl Future<Output = ()>,
    ) -> Result<ShutdownOutcome, ShipperError> {
        let exit = self.poll(shutdown_signal, &mut pipeline.intake).await;
        match &exit {
            PollExit::Shutdown => info!("Received SHUTDOWN event"),
            PollExit::Signal => info!("Received termination signal"),
            PollExit::Failed(e) => error!("Failed to poll the next event: {e}"),
            PollExit::IntakeStopped(reason) => error!("Log intake server stopped: {reason}"),
        }

        let outcome = self.shutdown(pipeline).await;

        match exit {
            PollExit::Failed(e) => {
                self.report_exit_error(POLL_FAILED).await;
                Err(ShipperError::Transport(e))
            }
            PollExit::IntakeStopped(reason) => {
                self.report_exit_error(INTAKE_FAILED).await;
                Err(ShipperError::IntakeStopped(reason))
            }
            PollExit::Shutdown | PollExit::Signal => Ok(outcome),
        }
    }

    async fn start_pipeline(&mut self) -> Result<Pipeline, ShipperError> {
        let host: IpAddr = self.config.listen_host.parse().map_err(|e| {
            ShipperError::FatalStartup(format!(
                "invalid listen host {}: {e}",
                self.config.listen_host
            ))
        })?;
        let intake = IntakeServer::bind(
            SocketAddr::new(host, self.config.listen_port),
            RecordParser::new(self.config.platform_report_enabled),
            self.config.max_body_bytes,
            self.config.shutdown_grace,
        )
        .await
        .map_err(|e| {
            ShipperError::FatalStartup(format!(
                "unable to listen on port {}: {e}",
                self.config.listen_port
            ))
        })?;
        let listen_port = intake
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.config.listen_port);

        let dispatcher = Dispatcher::new(
            std::mem::take(&mut self.destinations),
            &self.config.destination_config(),
            self.config.destination_timeout + DISPATCH_TIMEOUT_MARGIN,
        );
        let (tx, rx) = queue::channel(self.config.queue_capacity);
        let pipeline = Pipeline {
            intake: Some(tokio::spawn(intake.serve(tx, self.cancel_token.clone()))),
            dispatcher: tokio::spawn(dispatcher.run(rx)),
        };

        let params = self.config.subscribe_params(listen_port);
        if let Err(e) = self
            .client
            .subscribe_logs(&SUBSCRIBED_LOG_TYPES, &params)
            .await
        {
            self.shutdown(pipeline).await;
            return Err(ShipperError::FatalStartup(format!(
                "logs subscription failed: {e}"
            )));
        }
        info!("Subscribed to the Logs API on port {listen_port}");
        Ok(pipeline)
    }

    async fn report_init_error(&self) {
        if let Err(e) = self.client.init_error(INIT_FAILED).await {
            error!("Failed to report init error: {e}");
        }
    }

    async fn report_exit_error(&self, error_type: &str) {
        if let Err(e) = self.client.exit_error(error_type).await {
            error!("Failed to report exit error: {e}");
        }
    }

    async fn poll(
        &self,
        shutdown_signal: impl Future<Output = ()>,
        intake: &mut Option<JoinHandle<io::Result<()>>>,
    ) -> PollExit {
        tokio::pin!(shutdown_signal);
        loop {
            let event = tokio::select! {
                biased;
                () = &mut shutdown_signal => return PollExit::Signal,
                () = self.cancel_token.cancelled() => return PollExit::Signal,
                reason = intake_exit(intake) => return PollExit::IntakeStopped(reason),
                event = self.client.next_event() => event,
            };
            match event {
                Ok(event) => match event.event_type {
                    EventType::Invoke => debug!("Received INVOKE event {}", event.request_id),
                    EventType::Shutdown => return PollExit::Shutdown,
                },
                Err(e) => return PollExit::Failed(e),
            }
        }
    }

    /// Fires cancellation and waits for the intake server and the dispatcher, bounded by the
    /// configured deadline.
    async fn shutdown(&mut self, pipeline: Pipeline) -> ShutdownOutcome {
        self.transition(LifecycleState::ShuttingDown);
        let started = Instant::now();
        self.cancel_token.cancel();

        let Pipeline {
            mut intake,
            mut dispatcher,
        } = pipeline;
        let deadline = self.config.shutdown_deadline;
        let drained = tokio::time::timeout(deadline, async {
            if let Some(intake) = intake.as_mut() {
                match intake.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Log intake server failed: {e}"),
                    Err(e) => error!("Log intake server task failed: {e}"),
                }
            }
            if let Err(e) = (&mut dispatcher).await {
                error!("Dispatcher task failed: {e}");
            }
        })
        .await;

        let outcome = if drained.is_ok() {
            info!("Closed cleanly in {} ms", started.elapsed().as_millis());
            ShutdownOutcome::Clean
        } else {
            error!("Failed to close cleanly within {deadline:?}, exiting anyway");
            if let Some(intake) = &intake {
                intake.abort();
            }
            dispatcher.abort();
            ShutdownOutcome::Forced
        };
        self.transition(LifecycleState::Closed);
        outcome
    }
}

/// Resolves once the intake task finishes and takes the handle, so it is never awaited twice.
async fn intake_exit(intake: &mut Option<JoinHandle<io::Result<()>>>) -> String {
    let Some(handle) = intake.as_mut() else {
        return std::future::pending().await;
    };
    let reason = match handle.await {
        Ok(Ok(())) => "exited before shutdown".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(e) => e.to_string(),
    };
    *intake = None;
    reason
}
