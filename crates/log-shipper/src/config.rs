// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ShipperError;
use crate::extension::SubscribeLogsParams;

const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
const DEFAULT_LISTEN_PORT: u16 = 8443;
// Logs API buffering bounds: https://docs.aws.amazon.com/lambda/latest/dg/runtimes-logs-api.html
const DEFAULT_MAX_ITEMS: u32 = 10_000;
const DEFAULT_MAX_BYTES: u32 = 262_144;
const DEFAULT_TIMEOUT_MS: u32 = 1_000;
const DEFAULT_QUEUE_CAPACITY: usize = 8;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1_000;
// The host allows 2s between SHUTDOWN and SIGKILL.
const DEFAULT_SHUTDOWN_DEADLINE_MS: u64 = 1_950;
const DEFAULT_DESTINATION_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_NEWRELIC_ENDPOINT: &str = "https://log-api.newrelic.com/log/v1";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Identity shared with every destination when it is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationConfig {
    pub function_name: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub function_name: String,
    pub region: String,
    /// `host:port` of the Extensions and Logs APIs
    pub runtime_api: String,
    pub log_level: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub max_items: u32,
    pub max_bytes: u32,
    pub timeout_ms: u32,
    /// number of batches the delivery queue holds before intake waits
    pub queue_capacity: usize,
    pub max_body_bytes: usize,
    pub platform_report_enabled: bool,
    pub shutdown_grace: Duration,
    pub shutdown_deadline: Duration,
    pub destination_timeout: Duration,
    pub stdout_enabled: bool,
    pub newrelic_enabled: bool,
    pub newrelic_license_key: String,
    pub newrelic_endpoint: String,
    pub https_proxy: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            function_name: String::new(),
            region: String::new(),
            runtime_api: String::new(),
            log_level: "info".to_string(),
            listen_host: DEFAULT_LISTEN_HOST.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            max_items: DEFAULT_MAX_ITEMS,
            max_bytes: DEFAULT_MAX_BYTES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_body_bytes: default_max_body_bytes(DEFAULT_MAX_BYTES),
            platform_report_enabled: true,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            shutdown_deadline: Duration::from_millis(DEFAULT_SHUTDOWN_DEADLINE_MS),
            destination_timeout: Duration::from_millis(DEFAULT_DESTINATION_TIMEOUT_MS),
            stdout_enabled: true,
            newrelic_enabled: true,
            newrelic_license_key: String::new(),
            newrelic_endpoint: DEFAULT_NEWRELIC_ENDPOINT.to_string(),
            https_proxy: None,
        }
    }
}

// maxBytes bounds the records, the JSON framing around them comes on top.
fn default_max_body_bytes(max_bytes: u32) -> usize {
    max_bytes as usize * 2
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ShipperError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ShipperError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|val| !val.trim().is_empty())
                .ok_or_else(|| ShipperError::InvalidConfig(format!("{key} is not set")))
        };
        let defaults = Self::default();

        let max_bytes = parse_or(&lookup, "LS_MAX_BYTES", defaults.max_bytes)?;
        let config = Self {
            function_name: required("AWS_LAMBDA_FUNCTION_NAME")?,
            region: required("AWS_REGION")?,
            runtime_api: required("AWS_LAMBDA_RUNTIME_API")?,
            log_level: lookup("LS_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            listen_host: defaults.listen_host,
            listen_port: parse_or(&lookup, "LS_LISTEN_PORT", defaults.listen_port)?,
            max_items: parse_or(&lookup, "LS_MAX_ITEMS", defaults.max_items)?,
            max_bytes,
            timeout_ms: parse_or(&lookup, "LS_TIMEOUT_MS", defaults.timeout_ms)?,
            queue_capacity: parse_or(&lookup, "LS_QUEUE_CAPACITY", defaults.queue_capacity)?,
            max_body_bytes: parse_or(
                &lookup,
                "LS_MAX_BODY_BYTES",
                default_max_body_bytes(max_bytes),
            )?,
            platform_report_enabled: parse_bool_or(
                &lookup,
                "LS_PLATFORM_REPORT_ENABLE",
                defaults.platform_report_enabled,
            )?,
            shutdown_grace: Duration::from_millis(parse_or(
                &lookup,
                "LS_SHUTDOWN_GRACE_MS",
                DEFAULT_SHUTDOWN_GRACE_MS,
            )?),
            shutdown_deadline: Duration::from_millis(parse_or(
                &lookup,
                "LS_SHUTDOWN_DEADLINE_MS",
                DEFAULT_SHUTDOWN_DEADLINE_MS,
            )?),
            destination_timeout: Duration::from_millis(parse_or(
                &lookup,
                "LS_DESTINATION_TIMEOUT_MS",
                DEFAULT_DESTINATION_TIMEOUT_MS,
            )?),
            stdout_enabled: parse_bool_or(&lookup, "LS_STDOUT_ENABLE", defaults.stdout_enabled)?,
            newrelic_enabled: parse_bool_or(
                &lookup,
                "LS_NEWRELIC_ENABLE",
                defaults.newrelic_enabled,
            )?,
            newrelic_license_key: lookup("LS_NEWRELIC_LICENSE_KEY").unwrap_or_default(),
            newrelic_endpoint: lookup("LS_NEWRELIC_ENDPOINT")
                .unwrap_or(defaults.newrelic_endpoint),
            https_proxy: lookup("LS_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY")),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ShipperError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ShipperError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        if self.listen_port == 0 {
            return Err(invalid("LS_LISTEN_PORT must be greater than 0"));
        }
        if !(1_000..=10_000).contains(&self.max_items) {
            return Err(invalid("LS_MAX_ITEMS must be between 1000 and 10000"));
        }
        if !(262_144..=1_048_576).contains(&self.max_bytes) {
            return Err(invalid("LS_MAX_BYTES must be between 262144 and 1048576"));
        }
        if !(100..=30_000).contains(&self.timeout_ms) {
            return Err(invalid("LS_TIMEOUT_MS must be between 100 and 30000"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("LS_QUEUE_CAPACITY must be greater than 0"));
        }
        if self.max_body_bytes == 0 {
            return Err(invalid("LS_MAX_BODY_BYTES must be greater than 0"));
        }
        if self.shutdown_deadline <= self.shutdown_grace {
            return Err(invalid(
                "LS_SHUTDOWN_DEADLINE_MS must be greater than LS_SHUTDOWN_GRACE_MS",
            ));
        }
        if self.destination_timeout.is_zero() {
            return Err(invalid("LS_DESTINATION_TIMEOUT_MS must be greater than 0"));
        }
        Ok(())
    }

    pub fn destination_config(&self) -> DestinationConfig {
        DestinationConfig {
            function_name: self.function_name.clone(),
            region: self.region.clone(),
        }
    }

    pub fn subscribe_params(&self, listen_port: u16) -> SubscribeLogsParams {
        SubscribeLogsParams {
            listen_port,
            max_items: self.max_items,
            max_bytes: self.max_bytes,
            timeout_ms: self.timeout_ms,
        }
    }
}

fn invalid(message: &str) -> ShipperError {
    ShipperError::InvalidConfig(message.to_string())
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ShipperError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(val) => val
            .trim()
            .parse::<T>()
            .map_err(|_| {
                ShipperError::InvalidConfig(format!("{key} has an invalid value '{val}'"))
            }),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ShipperError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(val) => match val.trim().to_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ShipperError::InvalidConfig(format!(
                "{key} must be true or false, got '{val}'"
            ))),
        },
    }
}
