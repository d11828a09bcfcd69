use std::time::Duration;
use thiserror::Error;

/// The API description cannot be normalized. Fatal: nothing is synthesized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecInvalidError {
    #[error("description root is not an object")]
    NotAnObject,

    #[error("description has no `paths` object")]
    MissingPaths,

    #[error("parameter #{index} of {context} is missing `{field}`")]
    MalformedParameter {
        context: String,
        index: usize,
        field: &'static str,
    },

    #[error("unresolvable reference {0}")]
    UnresolvedRef(String),

    #[error("{endpoint} requires undeclared security scheme `{scheme}`")]
    UnknownSecurityScheme { endpoint: String, scheme: String },

    #[error("{endpoint} is declared twice (as `{first}` and `{second}`)")]
    DuplicateEndpoint {
        endpoint: String,
        first: String,
        second: String,
    },
}

/// The generative oracle could not produce a usable response. Non-fatal:
/// the endpoint falls back to deterministic generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleUnavailableError {
    #[error("oracle is not configured")]
    NotConfigured,

    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("oracle api error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("oracle over capacity (status {0})")]
    Capacity(u16),

    #[error("oracle payload too large: {actual} bytes exceeds {limit}")]
    SizeExceeded { limit: usize, actual: usize },

    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

impl OracleUnavailableError {
    /// Short machine-friendly reason, recorded in the endpoint's
    /// `OracleFailed` transition.
    pub fn reason(&self) -> &'static str {
        match self {
            OracleUnavailableError::NotConfigured => "not_configured",
            OracleUnavailableError::Timeout(_) => "timeout",
            OracleUnavailableError::Transport(_) => "transport",
            OracleUnavailableError::Api { .. } => "api_error",
            OracleUnavailableError::Capacity(_) => "capacity",
            OracleUnavailableError::SizeExceeded { .. } => "size_exceeded",
            OracleUnavailableError::Malformed(_) => "malformed",
        }
    }
}

impl From<reqwest::Error> for OracleUnavailableError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            OracleUnavailableError::Malformed(err.to_string())
        } else {
            OracleUnavailableError::Transport(err.to_string())
        }
    }
}

/// A scenario could not be turned into an executable unit. Drops that one
/// scenario; recorded as a defect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompilationError {
    #[error("scenario targets {scenario} but was compiled against {endpoint}")]
    EndpointMismatch { scenario: String, endpoint: String },

    #[error("no value for path parameter `{0}`")]
    UnresolvedPathParam(String),

    #[error("path parameter `{0}` is not declared by the endpoint")]
    UnknownPathParam(String),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// A run could not get as far as execution.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid api description: {0}")]
    Spec(#[from] SpecInvalidError),

    #[error("invalid base url: {0}")]
    BaseUrl(#[from] CompilationError),

    #[error("failed to build http transport: {0}")]
    Transport(#[from] crate::transport::ExecutionTransportError),
}
