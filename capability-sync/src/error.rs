//! Error types for the capability sync layer.
//!
//! Only [`RegistryUnavailable`] and [`EntityError`] ever reach callers.
//! Storage and cache errors are absorbed at the `OverrideStore` boundary
//! and only show up in logs.

use thiserror::Error;

/// Message shown to the user when the capability list cannot be loaded
pub const REGISTRY_RETRY_MESSAGE: &str = "could not load capability list, please retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryFailureKind {
    /// Request never produced a response (DNS, connect, timeout, abort)
    Transport,
    /// Server answered with a non-success status
    Status,
    /// Body was not a valid capability list
    Malformed,
}

impl RegistryFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Status => "status",
            Self::Malformed => "malformed",
        }
    }
}

/// Registry fetch failed or returned malformed data. No partial result exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("capability registry unavailable ({}): {reason}", .kind.as_str())]
pub struct RegistryUnavailable {
    pub kind: RegistryFailureKind,
    pub reason: String,
}

impl RegistryUnavailable {
    pub fn new(kind: RegistryFailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::new(RegistryFailureKind::Transport, reason)
    }

    pub fn status(code: u16) -> Self {
        Self::new(RegistryFailureKind::Status, format!("HTTP error: {code}"))
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::new(RegistryFailureKind::Malformed, reason)
    }

    pub fn user_message(&self) -> &'static str {
        REGISTRY_RETRY_MESSAGE
    }
}

/// Failure reported by a [`crate::storage::KeyValueStorage`] backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage quota exceeded writing {key}")]
    QuotaExceeded { key: String },
    #[error("storage is disabled")]
    Disabled,
    #[error("storage i/o failed: {0}")]
    Io(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Override cache failures. Logged, never returned past `OverrideStore`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("cached value under {key} is corrupt: {reason}")]
    CacheCorrupt { key: String, reason: String },
    #[error("failed to persist {key}: {source}")]
    CachePersistFailed {
        key: String,
        #[source]
        source: StorageError,
    },
}

/// Entity (assistant) persistence API failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP error: {status}")]
    Status { status: u16 },
    #[error("failed to parse JSON: {0}")]
    Decode(String),
}

/// Cross-tab transport failure. Logged by the broadcaster, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cross-tab transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse env var {key}={value}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}
