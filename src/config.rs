use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default remote poll interval, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
/// Default timeout for a single remote request, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database holding local notes
    pub database_path: ConfigValue<PathBuf>,
    /// Base URL of the remote note service (e.g. "http://localhost:8080")
    pub server_url: ConfigValue<Option<String>>,
    /// How often each watched note is fetched from the server
    pub poll_interval_ms: ConfigValue<u64>,
    /// Timeout applied to every remote request
    pub request_timeout_ms: ConfigValue<u64>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    server_url: Option<String>,
    poll_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("notes.db"),
            ConfigSource::Default,
        );
        let mut server_url = ConfigValue::new(None, ConfigSource::Default);
        let mut poll_interval_ms = ConfigValue::new(DEFAULT_POLL_INTERVAL_MS, ConfigSource::Default);
        let mut request_timeout_ms =
            ConfigValue::new(DEFAULT_REQUEST_TIMEOUT_MS, ConfigSource::Default);
        let mut config_file = None;

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(url) = file_config.server_url {
                server_url = ConfigValue::new(Some(url), ConfigSource::File);
            }
            if let Some(ms) = file_config.poll_interval_ms {
                poll_interval_ms = ConfigValue::new(ms, ConfigSource::File);
            }
            if let Some(ms) = file_config.request_timeout_ms {
                request_timeout_ms = ConfigValue::new(ms, ConfigSource::File);
            }
        }

        if let Ok(db_path) = std::env::var("NOTESYNC_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("NOTESYNC_SERVER_URL") {
            server_url = ConfigValue::new(Some(url), ConfigSource::Environment);
        }
        if let Some(ms) = env_millis("NOTESYNC_POLL_INTERVAL_MS")? {
            poll_interval_ms = ConfigValue::new(ms, ConfigSource::Environment);
        }
        if let Some(ms) = env_millis("NOTESYNC_REQUEST_TIMEOUT_MS")? {
            request_timeout_ms = ConfigValue::new(ms, ConfigSource::Environment);
        }

        if poll_interval_ms.value == 0 {
            return Err(ConfigError::InvalidValue(
                "poll_interval_ms",
                "must be greater than zero".to_string(),
            ));
        }
        if request_timeout_ms.value == 0 {
            return Err(ConfigError::InvalidValue(
                "request_timeout_ms",
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            database_path,
            server_url,
            poll_interval_ms,
            request_timeout_ms,
            config_file,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.value)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.value)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/notesync/
    /// - macOS: ~/Library/Application Support/notesync/
    /// - Windows: %APPDATA%/notesync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notesync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/notesync/
    /// - macOS: ~/Library/Application Support/notesync/
    /// - Windows: %APPDATA%/notesync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notesync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn env_millis(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, format!("'{}' is not a number", raw))),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    ReadError(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {1}", .0.display())]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("notes.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert_eq!(config.poll_interval_ms.value, 3000);
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /custom/path/notes.sqlite").unwrap();
        writeln!(file, "server_url: http://notes.example.com").unwrap();
        writeln!(file, "poll_interval_ms: 500").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(
            config.database_path.value,
            PathBuf::from("/custom/path/notes.sqlite")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert_eq!(
            config.server_url.value.as_deref(),
            Some("http://notes.example.com")
        );
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.poll_interval_ms.source, ConfigSource::File);
        assert_eq!(config.request_timeout_ms.source, ConfigSource::Default);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_relative_database_path_resolves_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: data/notes.db").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data/notes.db")
        );
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "poll_interval_ms: 0").unwrap();

        let err = Config::load(Some(config_path)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("poll_interval_ms", _)));
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "poll_interval_ms: 1000").unwrap();

        std::env::set_var("NOTESYNC_POLL_INTERVAL_MS", "250");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.poll_interval_ms.value, 250);
        assert_eq!(config.poll_interval_ms.source, ConfigSource::Environment);

        std::env::remove_var("NOTESYNC_POLL_INTERVAL_MS");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
