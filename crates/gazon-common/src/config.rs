//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::logging::LogFormat;
use crate::GazonError;

/// Top-level configuration for the offline shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Cache generation and precache settings
    pub cache: CacheConfig,

    /// Router strings
    pub router: RouterConfig,

    /// HTTP loader settings
    pub loader: LoaderSettings,

    /// Persistence settings
    pub storage: StorageConfig,

    /// Logging settings
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix shared by every cache this app owns
    pub namespace: String,

    /// Current cache generation
    pub version: String,

    /// Worker scope; relative manifest entries resolve against it
    pub scope: Url,

    /// App-shell resources fetched at install time
    pub precache: Vec<String>,

    /// Document served to HTML requests when offline
    pub app_root: String,

    /// Message carried in the synthetic 503 body
    pub offline_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Heading of the error view
    pub error_title: String,

    /// Body text of the error view
    pub error_message: String,

    /// Label of the reload button
    pub reload_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// User agent string
    pub user_agent: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirects to follow
    pub max_redirects: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file backing the key-value store
    pub path: PathBuf,

    /// Maximum stored bytes (keys + values); None is unlimited
    pub quota_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level name ("info", "debug", ...)
    pub level: String,

    /// Output format
    pub format: LogFormat,

    /// Optional EnvFilter directive string
    pub filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            router: RouterConfig::default(),
            loader: LoaderSettings::default(),
            storage: StorageConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let precache = [
            "./",
            "./index.html",
            "./manifest.json",
            "./src/css/variables.css",
            "./src/css/reset.css",
            "./src/css/main.css",
            "./src/css/components.css",
            "./src/js/app.js",
            "./src/js/auth.js",
            "./src/js/router.js",
            "./src/js/storage.js",
            "./src/js/utils.js",
            "./src/js/photoAnalysis.js",
            "./src/js/fertilizerPlanner.js",
            "./src/js/loyalty.js",
            "./src/pages/login.html",
            "./src/pages/home.html",
            "./src/pages/photo-analysis.html",
            "./src/pages/fertilizer-planner.html",
            "./src/pages/loyalty.html",
            "/src/assets/icons/icon-192x192.png",
            "/src/assets/icons/icon-512x512.png",
        ];

        Self {
            namespace: "gazon-app".to_string(),
            version: "v1.0.2".to_string(),
            scope: Url::parse("http://localhost:8080/").expect("static scope URL is valid"),
            precache: precache.iter().map(|s| s.to_string()).collect(),
            app_root: "./index.html".to_string(),
            offline_message: "Je bent offline. Sommige functies zijn beperkt.".to_string(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            error_title: "Oeps!".to_string(),
            error_message: "Fout bij het laden van de pagina".to_string(),
            reload_label: "Opnieuw laden".to_string(),
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("Gazon/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_redirects: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("gazon")
                .join("local-storage.json"),
            quota_bytes: Some(5 * 1024 * 1024),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            filter: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, GazonError> {
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location under the platform config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gazon")
            .join("config.json")
    }

    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> Result<(), GazonError> {
        if self.cache.namespace.is_empty() {
            return Err(GazonError::config("cache namespace must not be empty"));
        }
        if self.cache.version.is_empty() {
            return Err(GazonError::config("cache version must not be empty"));
        }
        if self.cache.scope.cannot_be_a_base() {
            return Err(GazonError::config(format!(
                "scope {} cannot be used as a base URL",
                self.cache.scope
            )));
        }
        for entry in self.cache.precache.iter().chain(std::iter::once(&self.cache.app_root)) {
            self.cache.scope.join(entry)?;
        }
        Ok(())
    }
}
