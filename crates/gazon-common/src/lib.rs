//! # Gazon Common
//!
//! Shared error types, logging setup and configuration for the Gazon offline
//! shell.
//!
//! ## Features
//!
//! - Unified error type with categories for log fields
//! - Logging configuration and subscriber setup
//! - Serde-backed application configuration

use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{AppConfig, CacheConfig, LoaderSettings, RouterConfig, StorageConfig};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for the Gazon crates.
///
/// Each crate keeps its own narrow error enum and converts into this one at
/// the boundaries where errors from several crates meet (the app binary,
/// configuration loading).
#[derive(Error, Debug)]
pub enum GazonError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache store errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Service worker lifecycle errors.
    #[error("Worker error: {message}")]
    Worker {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Navigation errors.
    #[error("Navigation error: {message}")]
    Navigation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Persistence errors.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL errors.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl GazonError {
    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a worker error with source.
    pub fn worker_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Worker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a navigation error with source.
    pub fn navigation_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Navigation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error with source.
    pub fn storage_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            GazonError::Network { .. } => "network",
            GazonError::Cache { .. } => "cache",
            GazonError::Worker { .. } => "worker",
            GazonError::Navigation { .. } => "navigation",
            GazonError::Storage { .. } => "storage",
            GazonError::Config { .. } => "config",
            GazonError::Io(_) => "io",
            GazonError::Json(_) => "json",
            GazonError::Url(_) => "url",
            GazonError::NotFound(_) => "not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(GazonError::network_with_source("fetch", io).category(), "network");
        assert_eq!(GazonError::config("test").category(), "config");
        assert_eq!(GazonError::NotFound("x".into()).category(), "not_found");
    }

    #[test]
    fn test_source_is_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = GazonError::storage_with_source("write failed", io);
        assert_eq!(err.category(), "storage");
        assert!(std::error::Error::source(&err).is_some());
    }
}
