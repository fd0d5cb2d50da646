#[cfg(feature = "server")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
#[cfg(feature = "server")]
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Transport-level reason behind a [`LookupError::Connectivity`].
#[derive(Error, Debug)]
pub enum ConnectivityCause {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("send failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("http request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("proxy failed: {0}")]
    Proxy(#[source] tokio_socks::Error),
}

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Empty query")]
    EmptyQuery,

    #[error("No authoritative server found for: {0}")]
    ServerNotFound(String),

    #[error("Query to {server} failed: {cause}")]
    Connectivity {
        server: String,
        #[source]
        cause: ConnectivityCause,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unexpected status code {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Response from {0} too large")]
    ResponseTooLarge(String),

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl LookupError {
    pub(crate) fn connectivity(server: impl Into<String>, cause: ConnectivityCause) -> Self {
        LookupError::Connectivity {
            server: server.into(),
            cause,
        }
    }

    /// True when the failure was the query deadline rather than a refused or broken connection.
    pub fn is_timeout(&self) -> bool {
        match self {
            LookupError::Connectivity { cause, .. } => match cause {
                ConnectivityCause::Timeout(_) => true,
                ConnectivityCause::Http(e) => e.is_timeout(),
                ConnectivityCause::Proxy(tokio_socks::Error::Io(e)) => e.kind() == std::io::ErrorKind::TimedOut,
                ConnectivityCause::Proxy(_) => false,
                ConnectivityCause::Connect(e) | ConnectivityCause::Read(e) | ConnectivityCause::Write(e) => {
                    e.kind() == std::io::ErrorKind::TimedOut
                }
            },
            _ => false,
        }
    }

    /// Whether the boundary should report this as "not found" rather than an internal error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::ServerNotFound(_) | LookupError::NotFound(_))
    }

    /// Short label used for metrics and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            LookupError::EmptyQuery => "empty_query",
            LookupError::ServerNotFound(_) => "server_not_found",
            LookupError::Connectivity { .. } if self.is_timeout() => "timeout",
            LookupError::Connectivity { .. } => "connectivity",
            LookupError::NotFound(_) => "not_found",
            LookupError::UnexpectedStatus { .. } => "unexpected_status",
            LookupError::MalformedResponse(_) => "malformed_response",
            LookupError::ResponseTooLarge(_) => "response_too_large",
            LookupError::Bootstrap(_) => "bootstrap",
            LookupError::Parse(_) => "parse",
            LookupError::ConfigError(_) => "config",
            LookupError::HttpClient(_) => "http_client",
        }
    }
}

#[cfg(feature = "server")]
impl LookupError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LookupError::EmptyQuery => StatusCode::BAD_REQUEST,
            LookupError::ServerNotFound(_) | LookupError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(feature = "server")]
impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
