use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::Value;
use thiserror::Error;

/// Status and raw body of one provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Other,
}

/// The request never produced a response (connect, timeout, body read).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    // The URL carries the credential as a query parameter, so it is dropped
    // before the error text can reach a log line.
    fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, format!("{context}: {}", err.without_url()))
    }
}

/// One POST of a JSON body authenticated by a credential.
pub trait Transport: Send + Sync {
    fn post_json(
        &self,
        endpoint: &str,
        credential: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// Blocking reqwest transport. System proxy settings are ignored: the
/// provider is always reached directly.
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let http = HttpClient::builder()
            .no_proxy()
            .build()
            .map_err(|err| TransportError::from_reqwest("failed to build HTTP client", err))?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn post_json(
        &self,
        endpoint: &str,
        credential: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", credential)])
            .timeout(timeout)
            .json(payload)
            .send()
            .map_err(|err| TransportError::from_reqwest("request failed", err))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| TransportError::from_reqwest("response body read failed", err))?;
        Ok(TransportResponse { status, body })
    }
}
