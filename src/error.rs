use std::{error::Error as StdError, io};

use http::{Response, StatusCode, header};
use hyper::Body;
use serde::Serialize;

use crate::url_codec::InvalidUrl;

/// Failures surfaced to the browser while dispatching a proxied request.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("invalid target url: {0}")]
    InvalidUrl(#[from] InvalidUrl),
    #[error("upstream host could not be resolved: {0}")]
    UpstreamNotFound(String),
    #[error("upstream refused the connection: {0}")]
    UpstreamUnreachable(String),
    #[error("internal proxy error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetails<'a> {
    error_message: String,
    request_url: &'a str,
    target_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: &'static str,
    details: ErrorDetails<'a>,
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            DispatchError::UpstreamNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::UpstreamUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidUrl(_) => "invalid_url",
            DispatchError::UpstreamNotFound(_) => "upstream_not_found",
            DispatchError::UpstreamUnreachable(_) => "upstream_unreachable",
            DispatchError::Internal(_) => "internal_error",
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            DispatchError::InvalidUrl(_) => "The requested proxy URL is not valid",
            DispatchError::UpstreamNotFound(_) => "The target host could not be found",
            DispatchError::UpstreamUnreachable(_) => "The target server is unreachable",
            DispatchError::Internal(_) => "The proxy failed to handle the request",
        }
    }

    /// Renders `{error, message, details:{errorMessage, requestUrl, targetUrl}}`.
    pub fn into_response(self, request_url: &str, target_url: Option<&str>) -> Response<Body> {
        let body = ErrorBody {
            error: self.code(),
            message: self.summary(),
            details: ErrorDetails {
                error_message: self.to_string(),
                request_url,
                target_url,
            },
        };
        let payload = serde_json::to_vec(&body).unwrap_or_default();
        let mut response = Response::new(Body::from(payload));
        *response.status_mut() = self.status();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        response
    }
}

/// Maps a client error to the dispatch taxonomy by walking its source chain.
pub fn classify_upstream_error(err: &hyper::Error) -> DispatchError {
    let mut text = err.to_string();
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && io_err.kind() == io::ErrorKind::ConnectionRefused
        {
            return DispatchError::UpstreamUnreachable(cause.to_string());
        }
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }

    let lower = text.to_ascii_lowercase();
    if lower.contains("dns error") || lower.contains("failed to lookup address") {
        DispatchError::UpstreamNotFound(text)
    } else if lower.contains("connection refused") {
        DispatchError::UpstreamUnreachable(text)
    } else {
        DispatchError::Internal(text)
    }
}
