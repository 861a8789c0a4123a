//! Error types shared across the crawl engine.
//!
//! `CrawlError` is the library-wide error enum; `ErrorKind` is the coarse
//! taxonomy persisted with execution error rows and used by the recovery
//! engine to pick an action.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Library-wide error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Workflow or daemon configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Browser-level failure (launch, CDP, page lifecycle)
    #[error("browser error: {0}")]
    Browser(String),

    /// Navigation completed with a non-success HTTP status
    #[error("navigation returned status {status} for {url}")]
    Http { status: u16, url: String },

    /// Transport-level failure (DNS, connection, TLS)
    #[error("network error: {0}")]
    Network(String),

    /// An operation exceeded its bound
    #[error("timed out: {0}")]
    Timeout(String),

    /// Selector or field-map failure while extracting data
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Data was present but not in the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// Relational store failure
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Cache failure
    #[error("cache error: {0}")]
    Cache(String),

    /// Task bus failure
    #[error("task bus error: {0}")]
    Bus(String),

    /// A lease-guarded queue transition was attempted by a non-holder
    #[error("lease lost for queue item {0}")]
    LeaseLost(Uuid),

    /// Operation cancelled by shutdown or execution stop
    #[error("operation cancelled")]
    Cancelled,

    /// Invariant violation; the worker fails fast on these
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for CrawlError {
    fn from(err: anyhow::Error) -> Self {
        // {:#} preserves the full context chain
        Self::Other(format!("{err:#}"))
    }
}

impl From<reqwest::Error> for CrawlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Convenience alias for Result with `CrawlError`
pub type CrawlResult<T> = Result<T, CrawlError>;

/// Coarse error taxonomy persisted with `ExecutionError` rows.
///
/// Different kinds have different recovery characteristics: network and
/// timeout errors are usually transient, extraction and parse errors are
/// usually permanent, blocked/rate-limited need proxy or delay treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Network,
    Blocked,
    RateLimited,
    Captcha,
    Extraction,
    ParseError,
    Config,
    Internal,
    Other,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Blocked => "blocked",
            Self::RateLimited => "rate_limited",
            Self::Captcha => "captcha",
            Self::Extraction => "extraction",
            Self::ParseError => "parse_error",
            Self::Config => "config",
            Self::Internal => "internal",
            Self::Other => "other",
        }
    }

    /// Map an error to its taxonomy bucket.
    ///
    /// Structured variants map directly; free-form variants fall back to
    /// substring matching on the message.
    #[must_use]
    pub fn classify(error: &CrawlError) -> Self {
        match error {
            CrawlError::Timeout(_) => Self::Timeout,
            CrawlError::Network(_) => Self::Network,
            CrawlError::Http { status, .. } => match status {
                403 => Self::Blocked,
                429 => Self::RateLimited,
                _ => Self::Network,
            },
            CrawlError::Extraction(_) => Self::Extraction,
            CrawlError::Parse(_) => Self::ParseError,
            CrawlError::Config(_) => Self::Config,
            CrawlError::Internal(_) => Self::Internal,
            CrawlError::Storage(_) | CrawlError::Cache(_) | CrawlError::Bus(_) => Self::Internal,
            CrawlError::Browser(msg) | CrawlError::Other(msg) => Self::classify_message(msg),
            CrawlError::LeaseLost(_) | CrawlError::Cancelled => Self::Other,
        }
    }

    /// Substring-based classification for unstructured error text
    #[must_use]
    pub fn classify_message(message: &str) -> Self {
        let msg = message.to_lowercase();

        if msg.contains("429") || msg.contains("too many requests") || msg.contains("rate limit") {
            return Self::RateLimited;
        }
        if msg.contains("captcha") || msg.contains("challenge") {
            return Self::Captcha;
        }
        if msg.contains("403") || msg.contains("forbidden") || msg.contains("access denied") {
            return Self::Blocked;
        }
        if msg.contains("timeout") || msg.contains("timed out") {
            return Self::Timeout;
        }
        if msg.contains("connection refused")
            || msg.contains("connection reset")
            || msg.contains("dns")
            || msg.contains("network")
            || msg.contains("unreachable")
            || msg.contains("eof")
        {
            return Self::Network;
        }
        if msg.contains("selector") || msg.contains("extract") || msg.contains("field") {
            return Self::Extraction;
        }
        if msg.contains("parse") || msg.contains("json") || msg.contains("deserialize") {
            return Self::ParseError;
        }

        Self::Other
    }

    /// Whether errors of this kind are worth retrying by default
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Network | Self::RateLimited | Self::Other => true,
            Self::Blocked
            | Self::Captcha
            | Self::Extraction
            | Self::ParseError
            | Self::Config
            | Self::Internal => false,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "network" => Ok(Self::Network),
            "blocked" => Ok(Self::Blocked),
            "rate_limited" => Ok(Self::RateLimited),
            "captcha" => Ok(Self::Captcha),
            "extraction" => Ok(Self::Extraction),
            "parse_error" => Ok(Self::ParseError),
            "config" => Ok(Self::Config),
            "internal" => Ok(Self::Internal),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}
