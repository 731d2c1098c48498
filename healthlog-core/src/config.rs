//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/healthlog/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/healthlog/` (~/.config/healthlog/)
//! - Data: `$XDG_DATA_HOME/healthlog/` (~/.local/share/healthlog/)
//! - State/Logs: `$XDG_STATE_HOME/healthlog/` (~/.local/state/healthlog/)

use crate::error::{Error, Result};
use crate::types::UserProfile;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Body data used for BMR/TDEE and sent with AI requests
    #[serde(default)]
    pub profile: UserProfile,

    /// AI endpoints (parse, suggestions, TEF)
    #[serde(default)]
    pub ai: AiConfig,

    /// Remote sync server (optional)
    #[serde(default)]
    pub sync: SyncConfig,

    /// TEF analysis scheduling
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============================================
// AI
// ============================================

/// Where a model's credentials come from.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    /// Server-side pooled keys
    #[default]
    Shared,
    /// The user's own endpoint and key
    Private,
}

/// One model selection, sent along with every AI request.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "base_url")]
    pub base_url: String,
    #[serde(default, alias = "api_key")]
    pub api_key: String,
    #[serde(default)]
    pub source: ModelSource,
}

impl ModelConfig {
    /// Shared models need nothing; private ones need every field filled in.
    pub fn validate(&self, role: &str) -> Result<()> {
        if self.source == ModelSource::Shared {
            return Ok(());
        }
        let missing: Vec<&str> = [
            ("name", self.name.trim().is_empty()),
            ("base_url", self.base_url.trim().is_empty()),
            ("api_key", self.api_key.trim().is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, empty)| empty.then_some(field))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "ai.{} is private but missing {}",
                role,
                missing.join(", ")
            )))
        }
    }
}

/// The models sent as `aiConfig` with every AI request.
#[derive(Debug, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelection {
    pub agent_model: ModelConfig,
    pub vision_model: ModelConfig,
}

/// AI service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    /// Base URL of the AI API (e.g., `https://healthlog.example.com`)
    pub server_url: Option<String>,

    /// Text model used for parsing, suggestions and TEF analysis
    #[serde(default)]
    pub agent_model: ModelConfig,

    /// Model used for image submissions
    #[serde(default)]
    pub vision_model: ModelConfig,

    /// Per-attempt timeout in seconds (time to a response)
    #[serde(default = "default_ai_timeout")]
    pub request_timeout_secs: u64,

    /// Extra attempts after the first for transient failures
    #[serde(default = "default_ai_max_retries")]
    pub max_retries: u32,

    /// Backoff unit in milliseconds; attempt `n` waits `n` units
    #[serde(default = "default_ai_backoff")]
    pub retry_backoff_ms: u64,

    /// Seconds without stream data before the watchdog fires
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,

    /// Suggestion categories requested by default
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Response language requested from the parse endpoint
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            agent_model: ModelConfig::default(),
            vision_model: ModelConfig::default(),
            request_timeout_secs: default_ai_timeout(),
            max_retries: default_ai_max_retries(),
            retry_backoff_ms: default_ai_backoff(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            categories: default_categories(),
            language: default_language(),
        }
    }
}

impl AiConfig {
    pub fn is_ready(&self) -> bool {
        self.server_url.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_none() {
            return Err(Error::Config("ai.server_url is not set".to_string()));
        }
        self.agent_model.validate("agent_model")?;
        self.vision_model.validate("vision_model")?;
        if self.request_timeout_secs == 0 || self.stream_idle_timeout_secs == 0 {
            return Err(Error::Config("ai timeouts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn models(&self) -> ModelSelection {
        ModelSelection {
            agent_model: self.agent_model.clone(),
            vision_model: self.vision_model.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

fn default_ai_timeout() -> u64 {
    90
}

fn default_ai_max_retries() -> u32 {
    2
}

fn default_ai_backoff() -> u64 {
    1000
}

fn default_stream_idle_timeout() -> u64 {
    30
}

fn default_categories() -> Vec<String> {
    vec!["nutrition".to_string(), "exercise".to_string()]
}

fn default_language() -> String {
    "en".to_string()
}

// ============================================
// Sync
// ============================================

/// Remote sync server configuration
///
/// When enabled, every local mutation is also pushed to the server and
/// records from other devices are pulled in.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Enable/disable remote sync
    #[serde(default)]
    pub enabled: bool,

    /// Sync server URL (e.g., `https://healthlog.example.com`)
    pub server_url: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Identifier of this device, sent with every request
    pub device_id: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_sync_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient failures
    #[serde(default = "default_sync_max_retries")]
    pub max_retries: usize,

    /// Delay before a refresh signal triggers a reload
    #[serde(default = "default_refresh_delay")]
    pub refresh_delay_ms: u64,

    /// Delay before a cloud sync refreshes the recorded-dates index
    #[serde(default = "default_calendar_refresh_delay")]
    pub calendar_refresh_delay_ms: u64,

    /// Delay before the follow-up pull after a delete
    #[serde(default = "default_post_delete_pull_delay")]
    pub post_delete_pull_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: None,
            api_key: None,
            device_id: None,
            timeout_secs: default_sync_timeout(),
            max_retries: default_sync_max_retries(),
            refresh_delay_ms: default_refresh_delay(),
            calendar_refresh_delay_ms: default_calendar_refresh_delay(),
            post_delete_pull_delay_ms: default_post_delete_pull_delay(),
        }
    }
}

impl SyncConfig {
    /// Check if sync is properly configured and enabled
    pub fn is_ready(&self) -> bool {
        self.enabled && self.server_url.is_some() && self.api_key.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.server_url.is_none() {
            return Err(Error::Config(
                "sync.server_url is required when sync is enabled".to_string(),
            ));
        }
        if self.api_key.is_none() {
            return Err(Error::Config(
                "sync.api_key is required when sync is enabled".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "sync.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Device id from config, or a stable default derived from the hostname.
    pub fn device_id(&self) -> String {
        self.device_id.clone().unwrap_or_else(|| {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "healthlog-cli".to_string())
        })
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    pub fn calendar_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.calendar_refresh_delay_ms)
    }

    pub fn post_delete_pull_delay(&self) -> Duration {
        Duration::from_millis(self.post_delete_pull_delay_ms)
    }
}

fn default_sync_timeout() -> u64 {
    30
}

fn default_sync_max_retries() -> usize {
    3
}

fn default_refresh_delay() -> u64 {
    300
}

fn default_calendar_refresh_delay() -> u64 {
    500
}

fn default_post_delete_pull_delay() -> u64 {
    500
}

// ============================================
// Analysis
// ============================================

/// TEF analysis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Re-run TEF analysis automatically after food entries change
    #[serde(default = "default_auto_tef")]
    pub auto_tef: bool,

    /// Quiet period before an automatic analysis fires
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            auto_tef: default_auto_tef(),
            debounce_secs: default_debounce_secs(),
        }
    }
}

impl AnalysisConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

fn default_auto_tef() -> bool {
    true
}

fn default_debounce_secs() -> u64 {
    15
}

// ============================================
// Logging
// ============================================

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.sync.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/healthlog/config.toml` (~/.config/healthlog/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("healthlog").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/healthlog/` (~/.local/share/healthlog/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("healthlog")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/healthlog/` (~/.local/state/healthlog/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("healthlog")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/healthlog/data.db` (~/.local/share/healthlog/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityLevel, BmrFormula, Gender};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ai.request_timeout_secs, 90);
        assert_eq!(config.ai.max_retries, 2);
        assert_eq!(config.ai.stream_idle_timeout_secs, 30);
        assert_eq!(config.ai.categories, vec!["nutrition", "exercise"]);
        assert!(config.analysis.auto_tef);
        assert_eq!(config.analysis.debounce(), Duration::from_secs(15));
        assert_eq!(config.profile.weight, 70.0);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[profile]
weight = 62.5
height = 165
age = 41
gender = "female"
activity_level = "very_active"
bmr_formula = "harris-benedict"

[ai]
server_url = "https://healthlog.example.com"
max_retries = 4

[ai.agent_model]
name = "gpt-4o"
base_url = "https://api.openai.com/v1"
api_key = "sk-test"
source = "private"

[analysis]
auto_tef = false

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.profile.weight, 62.5);
        assert_eq!(config.profile.gender, Gender::Female);
        assert_eq!(config.profile.activity_level, ActivityLevel::VeryActive);
        assert_eq!(config.profile.bmr_formula, BmrFormula::HarrisBenedict);
        assert_eq!(config.ai.max_retries, 4);
        assert_eq!(config.ai.agent_model.source, ModelSource::Private);
        assert!(config.ai.validate().is_ok());
        assert!(!config.analysis.auto_tef);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_private_model_requires_all_fields() {
        let shared = ModelConfig::default();
        assert!(shared.validate("agent_model").is_ok());

        let private = ModelConfig {
            name: "my-model".to_string(),
            source: ModelSource::Private,
            ..Default::default()
        };
        let err = private.validate("agent_model").unwrap_err().to_string();
        assert!(err.contains("base_url"));
        assert!(err.contains("api_key"));
        assert!(!err.contains("name,"));
    }

    #[test]
    fn test_model_config_wire_names() {
        let model = ModelConfig {
            name: "gpt-4o".to_string(),
            base_url: "https://api.example.com".to_string(),
            api_key: String::new(),
            source: ModelSource::Shared,
        };
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["baseUrl"], "https://api.example.com");
        assert_eq!(json["source"], "shared");
        assert_eq!(json["apiKey"], "");
    }

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.refresh_delay(), Duration::from_millis(300));
        assert_eq!(config.post_delete_pull_delay(), Duration::from_millis(500));
        assert!(!config.is_ready());
    }

    #[test]
    fn test_sync_config_validation() {
        // Disabled config is always valid
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());

        // Enabled without credentials should fail
        let config = SyncConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Enabled with all credentials should pass
        let config = SyncConfig {
            enabled: true,
            server_url: Some("https://healthlog.example.com".to_string()),
            api_key: Some("hl_live_test".to_string()),
            device_id: Some("laptop".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.is_ready());
        assert_eq!(config.device_id(), "laptop");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\nenabled = true\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, "[analysis]\ndebounce_secs = 5\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.analysis.debounce_secs, 5);
    }
}
