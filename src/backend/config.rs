//! Reader configuration, loaded from `<config_dir>/manga-reader/config.toml`.
//!
//! Every key is optional; a missing file means defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;
use super::reader::ReadingMode;
use super::session::{PageQuality, SessionPolicy};

const APP_DIR: &str = "manga-reader";
const CONFIG_FILENAME: &str = "config.toml";

/// MangaDex rejects feed requests with a larger `limit`.
const MAX_BATCH_LIMIT: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub catalog: CatalogConfig,
    pub session: SessionConfig,
    pub reader: ReaderConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Translated language requested from the chapter feed.
    pub language: String,
    /// Serve compressed `data-saver` pages instead of originals.
    pub data_saver: bool,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mangadex.org".to_string(),
            user_agent: concat!("manga-reader/", env!("CARGO_PKG_VERSION")).to_string(),
            language: "en".to_string(),
            data_saver: true,
            request_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub batch_limit: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { batch_limit: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub refresh_threshold_secs: u64,
    pub check_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: 10 * 60,
            check_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub default_mode: ReadingMode,
    pub fallback_page_height: u32,
    pub fallback_screen_width: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            default_mode: ReadingMode::Vertical,
            fallback_page_height: 300,
            fallback_screen_width: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_memory_pages: usize,
    pub max_disk_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 50,
            max_disk_mb: 500,
        }
    }
}

impl Config {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILENAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Loads the file at `path`, or defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("api.base_url", "must not be empty"));
        }
        if self.api.language.trim().is_empty() {
            return Err(ConfigError::invalid("api.language", "must not be empty"));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "api.request_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.catalog.batch_limit == 0 || self.catalog.batch_limit > MAX_BATCH_LIMIT {
            return Err(ConfigError::invalid(
                "catalog.batch_limit",
                format!("must be between 1 and {MAX_BATCH_LIMIT}"),
            ));
        }
        if self.session.check_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "session.check_interval_secs",
                "must be greater than zero",
            ));
        }
        if self.session.check_interval_secs >= self.session.refresh_threshold_secs {
            return Err(ConfigError::invalid(
                "session.check_interval_secs",
                "must be shorter than session.refresh_threshold_secs",
            ));
        }
        if self.reader.fallback_page_height == 0 || self.reader.fallback_screen_width == 0 {
            return Err(ConfigError::invalid(
                "reader",
                "fallback page dimensions must be greater than zero",
            ));
        }
        if self.cache.max_memory_pages == 0 {
            return Err(ConfigError::invalid(
                "cache.max_memory_pages",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            refresh_threshold: Duration::from_secs(self.session.refresh_threshold_secs),
            check_interval: Duration::from_secs(self.session.check_interval_secs),
        }
    }

    pub fn page_quality(&self) -> PageQuality {
        if self.api.data_saver {
            PageQuality::DataSaver
        } else {
            PageQuality::Data
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_or_default(&dir.path().join("config.toml")).unwrap();

        assert_eq!(config.catalog.batch_limit, 50);
        assert_eq!(config.session.refresh_threshold_secs, 600);
        assert_eq!(config.session.check_interval_secs, 60);
        assert_eq!(config.reader.default_mode, ReadingMode::Vertical);
        assert_eq!(config.page_quality(), PageQuality::DataSaver);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[api]\nlanguage = \"fr\"\ndata_saver = false\n\n[reader]\ndefault_mode = \"horizontal\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.language, "fr");
        assert_eq!(config.page_quality(), PageQuality::Data);
        assert_eq!(config.reader.default_mode, ReadingMode::Horizontal);
        assert_eq!(config.api.base_url, "https://api.mangadex.org");
        assert_eq!(config.catalog.batch_limit, 50);
    }

    #[test]
    fn test_rejects_out_of_range_batch_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[catalog]\nbatch_limit = 0\n").unwrap();

        match Config::load(&path) {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "catalog.batch_limit"),
            other => panic!("expected invalid value, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_check_interval_longer_than_threshold() {
        let mut config = Config::default();
        config.session.check_interval_secs = 900;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[catalog\nbatch_limit = ").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_session_policy_durations() {
        let policy = Config::default().session_policy();
        assert_eq!(policy.refresh_threshold, Duration::from_secs(600));
        assert_eq!(policy.check_interval, Duration::from_secs(60));
    }
}
