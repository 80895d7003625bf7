//! Error taxonomy shared by every gwchat crate.

use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by a gateway transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway not connected")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{method} failed: {message}")]
    Rpc { method: String, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request timed out")]
    Timeout,
}

impl GatewayError {
    pub fn rpc(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Human-readable detail without the method prefix, used for inline
    /// transcript errors.
    pub fn detail(&self) -> String {
        match self {
            Self::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("failed to read attachment {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported attachment type: {0}")]
    UnsupportedType(String),

    #[error("malformed data url")]
    MalformedDataUrl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_detail_strips_method() {
        let err = GatewayError::rpc("chat.send", "rate limited");
        assert_eq!(err.to_string(), "chat.send failed: rate limited");
        assert_eq!(err.detail(), "rate limited");
        assert_eq!(GatewayError::Timeout.detail(), "request timed out");
    }
}
