//! Error type shared by compute API implementations.

use thiserror::Error;

/// Failures surfaced by a [`super::ComputeApi`] implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeError {
    /// Raised when the client cannot be configured.
    #[error("cannot connect to CloudControl API ({0})")]
    Config(String),
    /// Raised when the request never produced an HTTP response.
    #[error("CloudControl request to {url} failed: {message}")]
    Transport {
        /// Target URL.
        url: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the API rejects a request.
    #[error("CloudControl API error {response_code} (HTTP {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// CloudControl response code, for example `RESOURCE_BUSY`.
        response_code: String,
        /// Message returned by the API.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("unexpected CloudControl response from {url}: {message}")]
    Decode {
        /// URL that produced the body.
        url: String,
        /// Decoder error message.
        message: String,
    },
}
