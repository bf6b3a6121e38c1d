//! Unified error types for Tapwire.
//!
//! Defines [`TapwireError`] (process-level failures: config, startup,
//! CLI commands, log store), [`ProxyError`] (the per-request failure
//! taxonomy, rendered to the client through `IntoResponse`) and
//! [`ValidationError`] for config validation failures. All use
//! `thiserror` for `Display` and `Error` derives.

use std::path::PathBuf;

use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub route: String,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  route {}: {}: {}", self.route, self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible (only fails on OOM which is unrecoverable)
        let _ = write!(buf, "{e}");
    }
    buf
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TapwireError {
    #[error("No config source found.\n\n  {hint}")]
    NoConfigSource { hint: String },

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: BoxError,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: BoxError,
    },

    #[error("File already exists: {}", path.display())]
    FileExists { path: PathBuf },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(hyper::StatusCode),

    #[error("Log store error ({backend}): {source}")]
    Database {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
}

/// Failures on the request path.
///
/// Routing, method and body errors are detected before any upstream call.
/// Transport errors abort the relay. None of them produce an exchange record.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("no upstream configured for path '{path}'")]
    NoRoute { path: String, status: StatusCode },

    #[error("method {method} is not supported")]
    UnsupportedMethod { method: Method, allow: String },

    #[error("request body is not valid JSON: {0}")]
    InvalidBody(#[source] serde_json::Error),

    #[error("invalid upstream URI '{uri}'")]
    UpstreamUri {
        uri: String,
        #[source]
        source: BoxError,
    },

    #[error("upstream request failed: {source}")]
    Upstream {
        #[source]
        source: BoxError,
    },

    #[error("upstream did not respond within {0}ms")]
    UpstreamTimeout(u64),

    #[error("client disconnected")]
    ClientGone,
}

impl ProxyError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoRoute { status, .. } => *status,
            Self::UnsupportedMethod { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUri { .. } | Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // nginx convention for "client closed request"; never reaches a live client
            Self::ClientGone => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoRoute { .. } => "routing_error",
            Self::UnsupportedMethod { .. } => "unsupported_method",
            Self::InvalidBody(_) => "invalid_body",
            Self::UpstreamUri { .. } | Self::Upstream { .. } | Self::UpstreamTimeout(_) => {
                "upstream_error"
            }
            Self::ClientGone => "client_gone",
        }
    }
}

impl ProxyError {
    /// JSON error document for the client.
    #[must_use]
    pub fn to_response(&self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        let mut response = (status, Json(body)).into_response();
        if let Self::UnsupportedMethod { allow, .. } = self {
            if let Ok(value) = HeaderValue::from_str(allow) {
                response.headers_mut().insert(axum::http::header::ALLOW, value);
            }
        }
        response
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.to_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_error_uses_configured_status() {
        let err = ProxyError::NoRoute {
            path: "/nowhere".into(),
            status: StatusCode::NOT_FOUND,
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), "routing_error");

        let err = ProxyError::NoRoute {
            path: "/nowhere".into(),
            status: StatusCode::BAD_GATEWAY,
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn transport_errors_map_to_gateway_statuses() {
        let err = ProxyError::Upstream {
            source: "connection reset".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::UpstreamTimeout(10).status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn unsupported_method_is_405() {
        let response = ProxyError::UnsupportedMethod {
            method: Method::PATCH,
            allow: "GET, POST".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get("allow").unwrap(), "GET, POST");
    }

    #[test]
    fn validation_errors_are_listed() {
        let err = TapwireError::ConfigValidation {
            errors: vec![
                ValidationError {
                    route: "/a".into(),
                    field: "upstream".into(),
                    message: "bad".into(),
                    suggestion: Some("fix it".into()),
                },
                ValidationError {
                    route: "/b".into(),
                    field: "path".into(),
                    message: "worse".into(),
                    suggestion: None,
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("route /a: upstream: bad (fix it)"));
        assert!(text.contains("route /b: path: worse"));
    }
}
