//! HTTP transport towards the target API.
//!
//! The harness talks to the target exclusively through [`HttpTransport`], so
//! unit execution can be driven by `reqwest` in production and by a scripted
//! double in tests. One transport instance (and its connection pool) is shared
//! by every concurrently executing unit.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use thiserror::Error;

use crate::model::HttpMethod;

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// The per-unit timeout elapsed.
    Timeout,
    /// The suite-level deadline elapsed before the unit finished.
    SuiteDeadline,
    /// Connection could not be established (refused, DNS failure).
    Connect,
    /// Connection dropped mid-exchange. Transient.
    Reset,
    /// The response could not be read or decoded.
    Malformed,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::SuiteDeadline => "suite_deadline",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Reset => "reset",
            TransportErrorKind::Malformed => "malformed",
            TransportErrorKind::Other => "other",
        }
    }

    /// Whether the same request may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportErrorKind::Reset)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure to obtain a response from the target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionTransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl ExecutionTransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("request timed out after {:.1}s", after.as_secs_f64()),
        )
    }

    pub fn suite_deadline() -> Self {
        Self::new(
            TransportErrorKind::SuiteDeadline,
            "suite deadline exceeded (timeout) before the unit completed",
        )
    }
}

impl From<reqwest::Error> for ExecutionTransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if is_connection_reset(&err) {
            TransportErrorKind::Reset
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_decode() || err.is_body() {
            TransportErrorKind::Malformed
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, error_chain(&err))
    }
}

fn is_connection_reset(err: &(dyn StdError + 'static)) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>()
            && matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            )
        {
            return true;
        }
        source = current.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// A request with credentials materialized, ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub basic_auth: Option<(String, String)>,
}

/// What came back from the target.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    json: Option<Value>,
}

impl ObservedResponse {
    /// Builds a response, decoding the body as JSON on a best-effort basis.
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        let json = if body.is_empty() {
            None
        } else {
            serde_json::from_slice(&body).ok()
        };
        Self {
            status,
            headers,
            body,
            json,
        }
    }

    /// Decoded JSON body, if the body was JSON.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }
}

/// Sends prepared requests to the target API.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: &PreparedRequest,
    ) -> Result<ObservedResponse, ExecutionTransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a transport with a fresh connection pool.
    pub fn new() -> Result<Self, ExecutionTransportError> {
        let client = Client::builder()
            .user_agent(concat!("specprobe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Options => reqwest::Method::OPTIONS,
        HttpMethod::Head => reqwest::Method::HEAD,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &PreparedRequest,
    ) -> Result<ObservedResponse, ExecutionTransportError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some((user, password)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body).map_err(|e| {
                ExecutionTransportError::new(TransportErrorKind::Other, e.to_string())
            })?;
            builder = builder.body(bytes);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(ObservedResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_only_reset_is_transient() {
        assert!(TransportErrorKind::Reset.is_transient());
        assert!(!TransportErrorKind::Timeout.is_transient());
        assert!(!TransportErrorKind::Connect.is_transient());
        assert!(!TransportErrorKind::SuiteDeadline.is_transient());
    }

    #[test]
    fn test_timeout_message_mentions_timeout() {
        let err = ExecutionTransportError::timeout(Duration::from_secs(30));
        assert_eq!(err.kind, TransportErrorKind::Timeout);
        assert!(err.to_string().contains("timed out after 30.0s"));
        assert!(ExecutionTransportError::suite_deadline()
            .to_string()
            .contains("timeout"));
    }

    #[test]
    fn test_observed_response_best_effort_json() {
        let json = ObservedResponse::new(200, BTreeMap::new(), br#"{"ok":true}"#.to_vec());
        assert!(json.json().is_some());
        let text = ObservedResponse::new(200, BTreeMap::new(), b"plain".to_vec());
        assert!(text.json().is_none());
        let empty = ObservedResponse::new(204, BTreeMap::new(), Vec::new());
        assert!(empty.json().is_none());
    }

    #[test]
    fn test_reset_detected_through_source_chain() {
        #[derive(Debug)]
        struct Wrapper(io::Error);
        impl fmt::Display for Wrapper {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "wrapped")
            }
        }
        impl StdError for Wrapper {
            fn source(&self) -> Option<&(dyn StdError + 'static)> {
                Some(&self.0)
            }
        }

        let reset = Wrapper(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        assert!(is_connection_reset(&reset));
        assert_eq!(error_chain(&reset), "wrapped: reset by peer");

        let refused = Wrapper(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(!is_connection_reset(&refused));
    }
}
