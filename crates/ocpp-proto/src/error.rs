//! Typed error kinds for the OCPP gateway, tagged by category like
//! [`crate::envelope`]'s response envelope errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error kind, matching the gateway's error-handling taxonomy.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum OcppError {
    /// Bus connect/publish failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Bad JSON, wrong direction, unparseable first element, or a frame
    /// larger than the configured cap.
    #[error("malformed envelope: {message}")]
    Malformed { message: String },

    /// `networkId` failed the charset/length check, or the auth cache
    /// lookup came back not-found.
    #[error("auth failed for {network_id}")]
    AuthFailed { network_id: String },

    /// Unknown correlation `msgId` or unknown device.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Action exceeded its deadline.
    #[error("timed out waiting for {what}")]
    Timeout { what: String },

    /// Initialization or signal-driven shutdown failure.
    #[error("fatal: {message}")]
    Fatal { message: String },
}

impl OcppError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn auth_failed(network_id: impl Into<String>) -> Self {
        Self::AuthFailed {
            network_id: network_id.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout { what: what.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for OcppError {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(e.to_string())
    }
}

impl From<anyhow::Error> for OcppError {
    fn from(e: anyhow::Error) -> Self {
        Self::transport(e.to_string())
    }
}
