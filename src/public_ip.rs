//! Detection of the caller's public IPv4 address.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Address-echo service queried by [`IfconfigDetector`].
pub const IFCONFIG_URL: &str = "http://ifconfig.co/json";

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Future returned by [`PublicIpDetector::detect`].
pub type DetectFuture<'a> = Pin<Box<dyn Future<Output = Result<Ipv4Addr, PublicIpError>> + Send + 'a>>;

/// Errors raised while detecting the public address.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PublicIpError {
    /// Raised when the HTTP client cannot be built.
    #[error("unable to build HTTP client: {0}")]
    Client(String),
    /// Raised when the echo service cannot be reached.
    #[error("unable to reach {url}: {message}")]
    Request {
        /// Service URL.
        url: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the service replies with an unexpected payload.
    #[error("unexpected response from {url}: {message}")]
    Payload {
        /// Service URL.
        url: String,
        /// Decoder error message.
        message: String,
    },
    /// Raised when the reported address is IPv6.
    #[error("detected public address {0} is not IPv4")]
    NotIpv4(IpAddr),
}

/// Source of the caller's public IPv4 address.
pub trait PublicIpDetector {
    /// Returns the public address traffic from this host appears to come from.
    fn detect(&self) -> DetectFuture<'_>;
}

#[derive(Debug, Deserialize)]
struct EchoPayload {
    ip: IpAddr,
}

/// Detector backed by the `ifconfig.co` JSON endpoint.
#[derive(Clone, Debug)]
pub struct IfconfigDetector {
    http: reqwest::Client,
    url: String,
}

impl IfconfigDetector {
    /// Builds a detector querying [`IFCONFIG_URL`].
    ///
    /// # Errors
    ///
    /// Returns [`PublicIpError::Client`] when the HTTP client cannot be built.
    pub fn new() -> Result<Self, PublicIpError> {
        Self::with_url(IFCONFIG_URL)
    }

    /// Builds a detector querying a custom endpoint with the same payload.
    ///
    /// # Errors
    ///
    /// Returns [`PublicIpError::Client`] when the HTTP client cannot be built.
    pub fn with_url(url: impl Into<String>) -> Result<Self, PublicIpError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| PublicIpError::Client(err.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Returns the endpoint this detector queries.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PublicIpDetector for IfconfigDetector {
    fn detect(&self) -> DetectFuture<'_> {
        Box::pin(async move {
            let response = self
                .http
                .get(&self.url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|err| PublicIpError::Request {
                    url: self.url.clone(),
                    message: err.to_string(),
                })?;
            let body = response.text().await.map_err(|err| PublicIpError::Request {
                url: self.url.clone(),
                message: err.to_string(),
            })?;
            let address = parse_echo_payload(&self.url, &body)?;
            debug!(%address, "detected client public address");
            Ok(address)
        })
    }
}

fn parse_echo_payload(url: &str, body: &str) -> Result<Ipv4Addr, PublicIpError> {
    let payload: EchoPayload =
        serde_json::from_str(body).map_err(|err| PublicIpError::Payload {
            url: url.to_owned(),
            message: err.to_string(),
        })?;
    match payload.ip {
        IpAddr::V4(address) => Ok(address),
        other @ IpAddr::V6(_) => Err(PublicIpError::NotIpv4(other)),
    }
}
