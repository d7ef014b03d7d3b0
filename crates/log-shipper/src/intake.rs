// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local HTTP endpoint the Logs API pushes records to.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::QueueError;
use crate::http_utils::{
    log_and_create_http_response, verify_request_content_length, HttpResponse,
};
use crate::queue::BatchSender;
use crate::records::RecordParser;

const INTAKE_PATH: &str = "/";
const ERROR_PREFIX: &str = "Error processing logs";

pub struct IntakeServer {
    listener: TcpListener,
    parser: RecordParser,
    max_body_bytes: usize,
    grace: Duration,
}

struct HandlerState {
    parser: RecordParser,
    max_body_bytes: usize,
    queue: BatchSender,
    cancel_token: CancellationToken,
}

impl IntakeServer {
    /// Binds the listener. Port 0 picks a free port, see [`IntakeServer::local_addr`].
    pub async fn bind(
        addr: SocketAddr,
        parser: RecordParser,
        max_body_bytes: usize,
        grace: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            parser,
            max_body_bytes,
            grace,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until `cancel_token` fires or accepting fails.
    ///
    /// On exit the listener is dropped, open connections get `grace` to finish their in-flight
    /// request and are aborted afterwards. The queue is closed last. A failed accept is returned
    /// once that sequence is done.
    pub async fn serve(
        self,
        queue: BatchSender,
        cancel_token: CancellationToken,
    ) -> io::Result<()> {
        let state = Arc::new(HandlerState {
            parser: self.parser,
            max_body_bytes: self.max_body_bytes,
            queue: queue.clone(),
            cancel_token: cancel_token.clone(),
        });
        let service = service_fn(move |req| {
            let state = Arc::clone(&state);
            intake_handler(req, state)
        });

        if let Ok(addr) = self.listener.local_addr() {
            info!("Log intake server listening on {addr}");
        }

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = JoinSet::new();
        let mut result = Ok(());

        loop {
            let conn = tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                con_res = self.listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Log intake server error: {e}");
                        result = Err(e);
                        break;
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };

            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            let cancel_token = cancel_token.clone();
            joinset.spawn(async move {
                let conn = server.serve_connection(conn, service);
                tokio::pin!(conn);
                let mut shutting_down = false;
                loop {
                    tokio::select! {
                        res = conn.as_mut() => {
                            if let Err(e) = res {
                                debug!("Connection error: {e}");
                            }
                            break;
                        }
                        () = cancel_token.cancelled(), if !shutting_down => {
                            conn.as_mut().graceful_shutdown();
                            shutting_down = true;
                        }
                    }
                }
            });
        }

        drop(self.listener);
        let drained = tokio::time::timeout(self.grace, async {
            while joinset.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Aborting {} connections still open after {:?}",
                joinset.len(),
                self.grace
            );
            joinset.shutdown().await;
        }

        // every handler holding a queue handle is gone now
        drop(service);
        queue.close();
        info!("Log intake server is closed");
        result
    }
}

async fn intake_handler(
    req: Request<Incoming>,
    state: Arc<HandlerState>,
) -> http::Result<HttpResponse> {
    if req.uri().path() != INTAKE_PATH {
        return log_and_create_http_response(
            &format!("{ERROR_PREFIX}: Unknown path {}", req.uri().path()),
            StatusCode::NOT_FOUND,
        );
    }
    if !matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
        return log_and_create_http_response(
            &format!("{ERROR_PREFIX}: Method {} is not allowed", req.method()),
            StatusCode::METHOD_NOT_ALLOWED,
        );
    }
    if let Some(response) =
        verify_request_content_length(req.headers(), state.max_body_bytes, ERROR_PREFIX)
    {
        return response;
    }

    let body = match Limited::new(req.into_body(), state.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            return log_and_create_http_response(
                &format!("{ERROR_PREFIX}: Payload too large"),
                StatusCode::PAYLOAD_TOO_LARGE,
            );
        }
        Err(e) => {
            return log_and_create_http_response(
                &format!("{ERROR_PREFIX}: Unable to read request body: {e}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    let batch = match state.parser.parse(&body) {
        Ok(Some(batch)) => batch,
        Ok(None) => {
            return log_and_create_http_response("No records to forward", StatusCode::OK);
        }
        Err(e) => {
            return log_and_create_http_response(
                &format!("{ERROR_PREFIX}: {e}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    let count = batch.len();
    match state.queue.send(batch, &state.cancel_token).await {
        Ok(()) => log_and_create_http_response(
            &format!("Queued {count} records"),
            StatusCode::OK,
        ),
        Err(e @ (QueueError::Cancelled | QueueError::Closed)) => {
            warn!("Dropping {count} records: {e}");
            log_and_create_http_response(
                &format!("{ERROR_PREFIX}: {e}"),
                StatusCode::SERVICE_UNAVAILABLE,
            )
        }
    }
}
