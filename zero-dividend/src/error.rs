//! Error types for the dividend pipeline.
//!
//! Provider failures are typed so the retry layer and the logs can tell a
//! flaky network apart from a bad token. Everything above the provider
//! boundary uses `anyhow` with context.

use std::fmt;

use thiserror::Error;

/// Errors raised by market data providers.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    Network(String),
    /// Authentication error (invalid token, insufficient points)
    Auth(String),
    /// Rate limit exceeded
    RateLimited(String),
    /// Provider answered with a non-zero status code
    Api { code: i64, msg: String },
    /// Response body could not be decoded
    Parse(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Self::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            Self::Api { code, msg } => write!(f, "Provider error {}: {}", code, msg),
            Self::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Whether the error is usually transient. Logged on each retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited(_) | Self::Api { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Fatal configuration problems. The process exits non-zero on these.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Provider token not configured
    #[error("Tushare token not configured (set TUSHARE_TOKEN or provider.token)")]
    MissingToken,

    /// A setting holds a value the pipeline cannot run with
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ProviderError::Network("timeout".into()).is_recoverable());
        assert!(ProviderError::RateLimited("40203".into()).is_recoverable());
        assert!(!ProviderError::Auth("bad token".into()).is_recoverable());
        assert!(!ProviderError::Parse("eof".into()).is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = ProviderError::Api {
            code: 40101,
            msg: "token invalid".into(),
        };
        assert_eq!(err.to_string(), "Provider error 40101: token invalid");
    }
}
