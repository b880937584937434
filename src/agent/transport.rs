//! Snapshot delivery over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use thiserror::Error;

use crate::codec::{CodecError, PayloadEncoder, SIGNATURE_HEADER};
use crate::model::MetricRecord;

/// Collector endpoint path, appended to the configured address.
pub const UPDATES_PATH: &str = "/updates";

/// Default request timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("encode error: {0}")]
    Codec(#[from] CodecError),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("collector returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("client error: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether another attempt could succeed: only a refused connection.
    ///
    /// DNS, TLS handshake and timeout failures are also connect errors in
    /// reqwest but are not retried.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() && is_connection_refused(e),
            _ => false,
        }
    }
}

fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::ConnectionRefused
        {
            return true;
        }
        source = e.source();
    }
    false
}

/// Something that can ship one batch of records to the collector.
#[async_trait]
pub trait MetricSender: Send + Sync + 'static {
    async fn send(&self, records: &[MetricRecord]) -> Result<(), TransportError>;
}

/// `POST {address}/updates` with a gzip body and optional signature header.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    encoder: PayloadEncoder,
}

impl HttpTransport {
    /// Create a transport for `address` (scheme optional, `http://` assumed).
    ///
    /// # Errors
    /// Returns `TransportError::Config` if the HTTP client cannot be built.
    pub fn new(address: &str, encoder: PayloadEncoder) -> Result<Self, TransportError> {
        Self::with_timeout(address, encoder, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        address: &str,
        encoder: PayloadEncoder,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}{UPDATES_PATH}", normalize_address(address)),
            encoder,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Prefix `http://` when no scheme is given and drop a trailing slash.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    }
}

#[async_trait]
impl MetricSender for HttpTransport {
    async fn send(&self, records: &[MetricRecord]) -> Result<(), TransportError> {
        let payload = self.encoder.encode(records)?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_ENCODING, "gzip")
            .header(CONTENT_TYPE, "application/json");
        if let Some(signature) = &payload.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(payload.body).send().await?;
        let status = response.status();
        tracing::debug!(url = %self.url, status = status.as_u16(), count = records.len(), "Metrics sent");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
