//! Error types for the SCC client.

use thiserror::Error;

use crate::lifecycle::{Event, MeasurementState};

#[derive(Error, Debug)]
pub enum SccError {
    /// No session, or the service refused the credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Network failure, timeout or 5xx response. Retried before surfacing.
    #[error("Transient error talking to SCC: {0}")]
    Transient(String),

    /// 4xx response or business-rule rejection. Never retried.
    #[error("Request rejected by SCC: {message}")]
    Rejected { status: Option<u16>, message: String },

    #[error("Measurement {id} is {state}, cannot {event}")]
    InvalidTransition {
        id: String,
        state: MeasurementState,
        event: Event,
    },

    #[error("Measurement {id} is {state}, products are only available once processing is done")]
    NotReady { id: String, state: MeasurementState },

    #[error("Measurement {0} has already been uploaded")]
    DuplicateUpload(String),

    #[error("Measurement {0} not found on SCC")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unexpected response from SCC: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid artifact {path}: {message}")]
    InvalidArtifact { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid product archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl SccError {
    /// Error returned by every operation attempted without a session.
    pub fn not_logged_in() -> Self {
        SccError::Authentication(
            "not logged in to SCC, call login() with valid credentials first".to_string(),
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SccError::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = summarize(body);
        if status.is_server_error() {
            SccError::Transient(format!("HTTP {}: {}", status.as_u16(), message))
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            SccError::Authentication(format!(
                "HTTP {}, the session may have expired, log in again",
                status.as_u16()
            ))
        } else {
            SccError::Rejected {
                status: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status.as_u16(), message),
            }
        }
    }
}

impl From<reqwest::Error> for SccError {
    /// Only timeouts, refused connections and 5xx responses are retryable.
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            SccError::InvalidConfig(e.to_string())
        } else if e.is_timeout() || e.is_connect() {
            SccError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            SccError::from_status(status, &e.to_string())
        } else if e.is_decode() || e.is_body() {
            SccError::InvalidResponse(e.to_string())
        } else {
            SccError::Rejected {
                status: None,
                message: e.to_string(),
            }
        }
    }
}

/// First line of a response body, bounded in length.
fn summarize(body: &str) -> String {
    let line = body.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    line.chars().take(200).collect()
}

pub type Result<T> = std::result::Result<T, SccError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(SccError::from_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(matches!(
            SccError::from_status(StatusCode::FORBIDDEN, ""),
            SccError::Authentication(_)
        ));
        assert!(matches!(
            SccError::from_status(StatusCode::NOT_FOUND, "missing\nmore"),
            SccError::Rejected { status: Some(404), ref message } if message == "HTTP 404: missing"
        ));
    }

    #[test]
    fn test_malformed_request_is_not_transient() {
        let err = reqwest::Client::new().get("not a url").build().unwrap_err();
        assert!(err.is_builder());
        assert!(matches!(SccError::from(err), SccError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::get(format!("http://{}/", addr)).await.unwrap_err();
        assert!(SccError::from(err).is_transient());
    }

    #[test]
    fn test_not_logged_in_names_the_remedy() {
        assert!(SccError::not_logged_in().to_string().contains("login"));
    }
}
