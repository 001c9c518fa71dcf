//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TETHER_CLIENT_ID=1000.XXXX                                         │
//! │     TETHER_MAX_PAGES=50                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tether/tether.toml (Linux)                               │
//! │     ~/Library/Application Support/dev.tether.tether/tether.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # tether.toml
//! [remote]
//! accounts_url = "https://accounts.zoho.com"
//! inventory_url = "https://www.zohoapis.com/inventory/v1"
//! client_id = "1000.XXXX"
//! client_secret = "..."
//! request_timeout_secs = 30
//!
//! [sync]
//! default_page_size = 200
//! max_pages = 1000
//! refresh_margin_secs = 300
//!
//! [database]
//! path = "/var/lib/tether/tether.db"
//!
//! [analytics]
//! max_quantity = 500
//! look_back_days = 180
//! inventory_turnover_days = 90
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use tether_core::{RemoteService, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, DEFAULT_REFRESH_MARGIN_SECS};

// =============================================================================
// Remote Settings
// =============================================================================

/// Where the remote lives and how to authenticate against it.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// OAuth server (token refresh and revoke).
    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,

    /// API base URL of the Inventory service.
    #[serde(default = "default_inventory_url")]
    pub inventory_url: String,

    /// API base URL of the Books service.
    #[serde(default = "default_books_url")]
    pub books_url: String,

    /// API base URL of the CRM service.
    #[serde(default = "default_crm_url")]
    pub crm_url: String,

    /// OAuth client credentials.
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,

    /// Scheme prefix of the `Authorization` header.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,

    /// Deadline for every remote call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_accounts_url() -> String {
    "https://accounts.zoho.com".to_string()
}
fn default_inventory_url() -> String {
    "https://www.zohoapis.com/inventory/v1".to_string()
}
fn default_books_url() -> String {
    "https://www.zohoapis.com/books/v3".to_string()
}
fn default_crm_url() -> String {
    "https://www.zohoapis.com/crm/v2".to_string()
}
fn default_auth_scheme() -> String {
    "Zoho-oauthtoken".to_string()
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            accounts_url: default_accounts_url(),
            inventory_url: default_inventory_url(),
            books_url: default_books_url(),
            crm_url: default_crm_url(),
            client_id: String::new(),
            client_secret: String::new(),
            auth_scheme: default_auth_scheme(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl RemoteSettings {
    /// API base URL of a service, without trailing slash.
    pub fn api_base(&self, service: RemoteService) -> &str {
        let base = match service {
            RemoteService::Inventory => &self.inventory_url,
            RemoteService::Books => &self.books_url,
            RemoteService::Crm => &self.crm_url,
        };
        base.trim_end_matches('/')
    }
}

// The client secret stays out of logs.
impl std::fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("accounts_url", &self.accounts_url)
            .field("inventory_url", &self.inventory_url)
            .field("books_url", &self.books_url)
            .field("crm_url", &self.crm_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("auth_scheme", &self.auth_scheme)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Page size used when the caller does not pass one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Largest page size the remote accepts.
    #[serde(default = "default_page_size")]
    pub max_page_size: u32,

    /// Hard ceiling on pages fetched by one sync.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Seconds before expiry at which a token is refreshed proactively.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: i64,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}
fn default_refresh_margin() -> i64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            default_page_size: default_page_size(),
            max_page_size: default_page_size(),
            max_pages: default_max_pages(),
            refresh_margin_secs: default_refresh_margin(),
        }
    }
}

// =============================================================================
// Database & Analytics Settings
// =============================================================================

/// Local store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `<data dir>/tether.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Defaults for reorder-level runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSettings {
    #[serde(default = "default_max_quantity")]
    pub max_quantity: i64,
    #[serde(default = "default_look_back_days")]
    pub look_back_days: i64,
    #[serde(default = "default_turnover_days")]
    pub inventory_turnover_days: i64,
}

fn default_max_quantity() -> i64 {
    500
}
fn default_look_back_days() -> i64 {
    180
}
fn default_turnover_days() -> i64 {
    90
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        AnalyticsSettings {
            max_quantity: default_max_quantity(),
            look_back_days: default_look_back_days(),
            inventory_turnover_days: default_turnover_days(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub analytics: AnalyticsSettings,
}

impl SyncConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tether.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        for (name, raw) in [
            ("accounts_url", &self.remote.accounts_url),
            ("inventory_url", &self.remote.inventory_url),
            ("books_url", &self.remote.books_url),
            ("crm_url", &self.remote.crm_url),
        ] {
            let parsed = url::Url::parse(raw)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "{} must be http(s), got: {}",
                    name, raw
                )));
            }
        }

        if self.remote.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        let sync = &self.sync;
        if sync.max_page_size == 0 || sync.default_page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "page sizes must be greater than 0".into(),
            ));
        }
        if sync.default_page_size > sync.max_page_size {
            return Err(SyncError::InvalidConfig(format!(
                "default_page_size {} exceeds max_page_size {}",
                sync.default_page_size, sync.max_page_size
            )));
        }
        if sync.max_pages == 0 {
            return Err(SyncError::InvalidConfig("max_pages must be greater than 0".into()));
        }
        if sync.refresh_margin_secs < 0 {
            return Err(SyncError::InvalidConfig(
                "refresh_margin_secs must not be negative".into(),
            ));
        }

        let analytics = &self.analytics;
        if analytics.max_quantity <= 0
            || analytics.look_back_days <= 0
            || analytics.inventory_turnover_days <= 0
        {
            return Err(SyncError::InvalidConfig(
                "analytics parameters must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Applies `TETHER_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TETHER_ACCOUNTS_URL") {
            debug!(url = %url, "Overriding accounts URL from environment");
            self.remote.accounts_url = url;
        }
        if let Some(url) = lookup("TETHER_INVENTORY_URL") {
            self.remote.inventory_url = url;
        }
        if let Some(url) = lookup("TETHER_BOOKS_URL") {
            self.remote.books_url = url;
        }
        if let Some(url) = lookup("TETHER_CRM_URL") {
            self.remote.crm_url = url;
        }
        if let Some(id) = lookup("TETHER_CLIENT_ID") {
            self.remote.client_id = id;
        }
        if let Some(secret) = lookup("TETHER_CLIENT_SECRET") {
            self.remote.client_secret = secret;
        }

        if let Some(raw) = lookup("TETHER_REQUEST_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(secs) => self.remote.request_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring invalid TETHER_REQUEST_TIMEOUT_SECS"),
            }
        }
        if let Some(raw) = lookup("TETHER_PAGE_SIZE") {
            match raw.parse() {
                Ok(size) => self.sync.default_page_size = size,
                Err(_) => warn!(value = %raw, "Ignoring invalid TETHER_PAGE_SIZE"),
            }
        }
        if let Some(raw) = lookup("TETHER_MAX_PAGES") {
            match raw.parse() {
                Ok(pages) => {
                    debug!(max_pages = pages, "Overriding page ceiling from environment");
                    self.sync.max_pages = pages;
                }
                Err(_) => warn!(value = %raw, "Ignoring invalid TETHER_MAX_PAGES"),
            }
        }

        if let Some(path) = lookup("TETHER_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "tether", "tether")
            .map(|dirs| dirs.config_dir().join("tether.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// API base URL of a service.
    pub fn api_base(&self, service: RemoteService) -> &str {
        self.remote.api_base(service)
    }

    /// SQLite file, falling back to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "tether", "tether")
                .map(|dirs| dirs.data_dir().join("tether.db"))
                .unwrap_or_else(|| PathBuf::from("tether.db"))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sync.refresh_margin_secs)
    }
}
