//! Error types for status reporting.

use thiserror::Error;

/// Errors that can occur when delivering a status update.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Endpoint answered with a non-2xx status
    #[error("Endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Errors from decoding or encoding a status payload.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to encode status payload: {0}")]
    Encode(#[source] serde_json::Error),
}
