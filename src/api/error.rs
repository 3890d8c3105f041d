use reqwest::StatusCode;
use thiserror::Error;

/// A request/response call to the run API failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{detail}")]
    Status { status: StatusCode, detail: String },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// Build a status error from a non-success response body. An empty body
    /// falls back to the canonical reason phrase.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = body.trim();
        let detail = if body.is_empty() {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_str().to_string())
        } else {
            body.to_string()
        };
        TransportError::Status { status, detail }
    }

    /// Human-readable text suitable for a session error.
    pub fn detail(&self) -> String {
        self.to_string()
    }
}
