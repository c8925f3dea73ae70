//! # Gazon Storage
//!
//! JSON key-value persistence for page controllers (the app's
//! `localStorage` layer).
//!
//! ## Architecture
//!
//! ```text
//! Storage (typed facade, never fails)
//!     │
//!     └── StorageBackend
//!             ├── MemoryBackend   (optional byte quota)
//!             └── JsonFileBackend (one JSON object on disk)
//! ```
//!
//! Every facade operation degrades instead of failing: reads fall back to
//! the caller's default, writes report `false`. The cause is logged.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use gazon_common::{GazonError, StorageConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

pub mod backend;

pub use backend::{JsonFileBackend, MemoryBackend, StorageBackend};

// ==================== Errors ====================

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown storage key: {0}")]
    UnknownKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StorageError> for GazonError {
    fn from(err: StorageError) -> Self {
        GazonError::storage_with_source("storage", err)
    }
}

// ==================== Keys ====================

/// Keys the app persists. [`Storage::clear`] removes exactly these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKey {
    #[serde(rename = "gazon_user_data")]
    UserData,
    #[serde(rename = "gazon_loyalty_points")]
    LoyaltyPoints,
    #[serde(rename = "gazon_photo_analyses")]
    PhotoAnalyses,
    #[serde(rename = "gazon_fertilizer_schedules")]
    FertilizerSchedules,
    #[serde(rename = "gazon_activity_history")]
    ActivityHistory,
    #[serde(rename = "gazon_auth_token")]
    AuthToken,
}

impl StorageKey {
    pub const ALL: [StorageKey; 6] = [
        StorageKey::UserData,
        StorageKey::LoyaltyPoints,
        StorageKey::PhotoAnalyses,
        StorageKey::FertilizerSchedules,
        StorageKey::ActivityHistory,
        StorageKey::AuthToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::UserData => "gazon_user_data",
            StorageKey::LoyaltyPoints => "gazon_loyalty_points",
            StorageKey::PhotoAnalyses => "gazon_photo_analyses",
            StorageKey::FertilizerSchedules => "gazon_fertilizer_schedules",
            StorageKey::ActivityHistory => "gazon_activity_history",
            StorageKey::AuthToken => "gazon_auth_token",
        }
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| StorageError::UnknownKey(s.to_string()))
    }
}

// ==================== Storage ====================

/// Typed JSON facade over a [`StorageBackend`].
///
/// Keys are any string; the app's own keys are listed in [`StorageKey`].
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Storage held in memory only.
    pub fn in_memory(quota: Option<usize>) -> Self {
        let backend = match quota {
            Some(quota) => MemoryBackend::with_quota(quota),
            None => MemoryBackend::new(),
        };
        Self::new(Arc::new(backend))
    }

    /// Storage persisted to the configured JSON file.
    pub async fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let backend = JsonFileBackend::open(&config.path, config.quota_bytes).await?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Read and decode `key`, or `default` when it is absent, empty or
    /// unreadable.
    pub async fn get<T: DeserializeOwned>(&self, key: impl AsRef<str>, default: T) -> T {
        let key = key.as_ref();
        let raw = match self.backend.get_item(key).await {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return default,
            Err(e) => {
                error!(key, error = %e, "Error reading from storage");
                return default;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                error!(key, error = %e, "Error decoding stored value");
                default
            }
        }
    }

    /// Encode and store `value`. Returns whether it was stored.
    pub async fn set<T: Serialize + ?Sized>(&self, key: impl AsRef<str>, value: &T) -> bool {
        let key = key.as_ref();
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!(key, error = %e, "Error encoding value for storage");
                return false;
            }
        };

        match self.backend.set_item(key, &serialized).await {
            Ok(()) => {
                debug!(key, bytes = serialized.len(), "Stored value");
                true
            }
            Err(e) => {
                error!(key, error = %e, "Error saving to storage");
                false
            }
        }
    }

    /// Remove `key`. Returns whether the backend accepted the removal.
    pub async fn remove(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        match self.backend.remove_item(key).await {
            Ok(()) => true,
            Err(e) => {
                error!(key, error = %e, "Error removing from storage");
                false
            }
        }
    }

    /// Whether `key` holds a value.
    pub async fn has(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        match self.backend.get_item(key).await {
            Ok(value) => value.is_some(),
            Err(e) => {
                warn!(key, error = %e, "Error checking storage");
                false
            }
        }
    }

    /// Remove every app key. Other keys are left alone.
    pub async fn clear(&self) -> bool {
        for key in StorageKey::ALL {
            if let Err(e) = self.backend.remove_item(key.as_str()).await {
                error!(%key, error = %e, "Error clearing storage");
                return false;
            }
        }
        debug!("Cleared app storage");
        true
    }
}
