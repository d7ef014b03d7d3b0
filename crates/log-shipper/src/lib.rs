// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lambda extension that receives batched platform and function logs from the Logs API and
//! relays them to one or more destinations.
//!
//! Data flows one way: the host pushes a payload to the [`intake`] endpoint, the [`records`]
//! parser turns it into a [`records::Batch`], the batch travels through the bounded [`queue`],
//! and the [`dispatcher`] fans it out to every enabled [`destinations::Destination`]. The
//! [`lifecycle`] orchestrator registers with the host, drives the event loop and coordinates
//! shutdown through a shared cancellation token.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod destinations;
pub mod dispatcher;
pub mod errors;
pub mod extension;
pub mod http_utils;
pub mod intake;
pub mod lifecycle;
pub mod logger;
pub mod queue;
pub mod records;
