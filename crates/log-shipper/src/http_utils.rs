// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use core::time::Duration;
use http_body_util::Full;
use hyper::{
    header,
    http::{self, HeaderMap},
    Response, StatusCode,
};
use serde_json::json;
use tracing::{debug, error};

pub type HttpResponse = Response<Full<Bytes>>;

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will cause a debug log to be
///    written, otherwise error will be written.
/// 2. Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}

/// Rejects a request whose declared "content-length" is unreadable or above `max_content_length`.
///
/// Requests without the header (chunked bodies) pass; their size is bounded while reading.
/// Will return None if no issues are found. Otherwise logs an error (with the given prefix) and
/// returns an HTTP Response with the appropriate error status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let content_length_header = header_map.get(header::CONTENT_LENGTH)?;
    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
    {
        Some(res) => res,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}

/// Builds a reqwest client with optional proxy configuration and timeout.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

/// Like [`build_client`], falling back to a direct connection when the proxy is unusable.
#[must_use]
pub fn get_client(proxy_url: Option<&str>, timeout: Duration) -> reqwest::Client {
    match build_client(proxy_url, timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to parse proxy configuration: {e}, falling back to direct connection");
            match build_client(None, timeout) {
                Ok(client) => client,
                Err(inner) => {
                    error!("Failed to build HTTP client: {inner}, using reqwest defaults");
                    reqwest::Client::new()
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use http_body_util::BodyExt;
    use hyper::header;
    use hyper::HeaderMap;
    use hyper::StatusCode;

    use super::*;

    fn create_test_headers_with_content_length(val: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(header::CONTENT_LENGTH, val.parse().unwrap());
        map
    }

    async fn get_response_body_as_string(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_request_content_length_missing_is_allowed() {
        assert!(verify_request_content_length(&HeaderMap::new(), 1, "Test Prefix").is_none());
    }

    #[tokio::test]
    async fn test_request_content_length_within_limit() {
        let headers = create_test_headers_with_content_length("10");
        assert!(verify_request_content_length(&headers, 10, "Test Prefix").is_none());
    }

    #[tokio::test]
    async fn test_request_content_length_cant_convert_to_usize() {
        let verify_result = verify_request_content_length(
            &create_test_headers_with_content_length("not_an_int"),
            1,
            "Test Prefix",
        );

        let response = verify_result.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            get_response_body_as_string(response).await,
            "{\"message\":\"Test Prefix: Invalid Content-Length header\"}".to_string()
        );
    }

    #[tokio::test]
    async fn test_request_content_length_too_long() {
        let verify_result = verify_request_content_length(
            &create_test_headers_with_content_length("100"),
            1,
            "Test Prefix",
        );

        let response = verify_result.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            get_response_body_as_string(response).await,
            "{\"message\":\"Test Prefix: Payload too large\"}".to_string()
        );
    }

    #[test]
    fn test_get_client_falls_back_on_bad_proxy() {
        // an unparsable proxy url must not prevent shipping
        let _client = get_client(Some("::not a url::"), Duration::from_secs(1));
    }
}
