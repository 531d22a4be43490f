//! Layered TOML configuration for Tether.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > global config file > defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tether_rpc::EngineConfig;
use tether_types::ConfigError;
use url::Url;

/// Method invoked by `tether tools` unless configured otherwise.
pub const DEFAULT_LIST_METHOD: &str = "tools/list";

/// Resolved configuration for one Tether invocation.
#[derive(Debug, Clone)]
pub struct TetherConfig {
    /// Event stream URL of the peer.
    pub url: Url,
    pub list_method: String,
    pub engine: EngineConfig,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettings {
    pub url: Option<String>,
    pub list_method: Option<String>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub url: Option<String>,
    pub list_method: Option<String>,
    pub response_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

impl TetherConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (`TETHER_URL`, `TETHER_LIST_METHOD`,
    ///    `TETHER_RESPONSE_TIMEOUT_MS`)
    /// 3. Global config (~/.tether/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = load_settings_file(&config_dir.join("config.toml"))?;
        Self::resolve(overrides, settings, config_dir, |key| std::env::var(key).ok())
    }

    /// Apply precedence over already-loaded settings. `env` looks up
    /// environment variables.
    pub fn resolve(
        overrides: CliOverrides,
        settings: SettingsFile,
        config_dir: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Resolve server URL: CLI > env > config file
        let raw_url = overrides
            .url
            .or_else(|| env("TETHER_URL"))
            .or(settings.server.url)
            .ok_or_else(|| ConfigError::MissingKey {
                key: "server url (pass --url, set TETHER_URL or add [server] url to ~/.tether/config.toml)"
                    .into(),
            })?;
        let url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidValue {
            key: "server.url".into(),
            message: format!("'{raw_url}': {e}"),
        })?;

        let list_method = overrides
            .list_method
            .or_else(|| env("TETHER_LIST_METHOD"))
            .or(settings.server.list_method)
            .unwrap_or_else(|| DEFAULT_LIST_METHOD.to_string());

        let mut engine = settings.engine;

        let env_timeout = env("TETHER_RESPONSE_TIMEOUT_MS")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "TETHER_RESPONSE_TIMEOUT_MS".into(),
                        message: format!("'{raw}': {e}"),
                    })
            })
            .transpose()?;
        if let Some(timeout_ms) = overrides.response_timeout_ms.or(env_timeout) {
            engine.response_timeout_ms = timeout_ms;
        }
        if let Some(max_retries) = overrides.max_retries {
            engine.retry.max_retries = max_retries;
        }

        engine.validate()?;

        Ok(TetherConfig {
            url,
            list_method,
            engine,
            config_dir,
        })
    }
}

/// Get the Tether config directory path (~/.tether/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TETHER_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tether")
}

/// Load and parse a TOML settings file. A missing file yields defaults.
pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!("No settings at {}: {e}", path.display());
            return Ok(SettingsFile::default());
        }
    };
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
