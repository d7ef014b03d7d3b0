// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::future::Future;
use std::path::Path;
use std::process::ExitCode;
use std::{env, sync::Arc};

use tracing::{debug, error, info};

use log_shipper::{
    config::Config,
    destinations::{
        newrelic::{NewRelicConfig, NewRelicDestination},
        stdout::StdoutDestination,
        Destination,
    },
    extension::ExtensionClient,
    lifecycle::{Orchestrator, ShutdownOutcome},
    logger,
};

const DEFAULT_EXTENSION_NAME: &str = "log-shipper";

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("LS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(logger::env_filter(&log_level))
        .with_ansi(false)
        .event_format(logger::Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("{}: setting default subscriber failed: {e}", logger::LOG_PREFIX);
    }
    debug!("Logging subsystem enabled");

    // Installed before registering so a SIGTERM during startup is not lost.
    let shutdown_signal = termination_signal();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // The host identifies extensions by the file name in /opt/extensions.
    let extension_name = env::args()
        .next()
        .as_deref()
        .and_then(|arg| Path::new(arg).file_name())
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_EXTENSION_NAME.to_string());

    let destinations: Vec<Box<dyn Destination>> = vec![
        Box::new(StdoutDestination::new(config.stdout_enabled)),
        Box::new(NewRelicDestination::new(NewRelicConfig {
            enabled: config.newrelic_enabled,
            license_key: config.newrelic_license_key.clone(),
            endpoint: config.newrelic_endpoint.clone(),
            timeout: config.destination_timeout,
            https_proxy: config.https_proxy.clone(),
        })),
    ];

    let client = ExtensionClient::new(&config.runtime_api);
    let mut orchestrator = Orchestrator::new(config, extension_name, client, destinations);

    match orchestrator.run(shutdown_signal).await {
        Ok(ShutdownOutcome::Clean) => {
            info!("Log shipper exited");
            ExitCode::SUCCESS
        }
        Ok(ShutdownOutcome::Forced) => {
            error!("Log shipper exited before all records were delivered");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Installs the SIGTERM handler now. The returned future resolves on SIGTERM or SIGINT.
fn termination_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let sigterm = {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                None
            }
        }
    };

    async move {
        #[cfg(unix)]
        if let Some(mut sigterm) = sigterm {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = tokio::signal::ctrl_c() => {},
            }
            return;
        }
        let _ = tokio::signal::ctrl_c().await;
    }
}
