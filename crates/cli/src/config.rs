use proto::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DEFAULT_TEMPERATURE: f32 = 0.5;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TICK_MS: u64 = 100;

/// Top-level gemchat configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Gemini provider configuration.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Terminal UI configuration.
    #[serde(default)]
    pub tui: TuiConfig,
}

/// Gemini credentials, model, and generation knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key (`GEMINI_API_KEY` overrides at load time).
    #[serde(default)]
    pub api_key: String,
    /// Model ID, e.g. `gemini-2.0-flash`.
    #[serde(default)]
    pub model: String,
    /// Upper bound on generated tokens per answer.
    pub max_tokens: Option<u32>,
    /// Explicit API base URL. Uses the public endpoint when unset.
    pub base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Seconds to wait for the next stream read before giving up.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_stream_idle_timeout_secs() -> u64 {
    DEFAULT_STREAM_IDLE_TIMEOUT_SECS
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            max_tokens: None,
            base_url: None,
            temperature: default_temperature(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
        }
    }
}

impl GeminiConfig {
    /// Returns the explicit base URL when one is set and non-empty.
    pub fn effective_base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Idle timeout as a [`Duration`].
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

/// Terminal UI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuiConfig {
    /// Spinner tick period in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

impl Default for TuiConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

impl TuiConfig {
    /// Spinner tick period as a [`Duration`].
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let cwd = std::env::current_dir().ok()?.join("gemchat.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home_config = home_dir()?.join(".gemchat").join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        config.apply_env_overrides()?;

        debug!(
            model = %config.gemini.model,
            max_tokens = ?config.gemini.max_tokens,
            base_url = ?config.gemini.effective_base_url(),
            "Config loaded"
        );
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.gemini.api_key = key;
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            self.gemini.model = model;
        }
        if let Ok(raw) = std::env::var("GEMINI_MAX_TOKENS") {
            let tokens = raw
                .trim()
                .parse::<u32>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "GEMINI_MAX_TOKENS".to_string(),
                    reason: format!("{raw:?} is not a token count ({e})"),
                })?;
            self.gemini.max_tokens = Some(tokens);
        }
        if let Ok(url) = std::env::var("GEMINI_BASE_URL") {
            self.gemini.base_url = Some(url);
        }
        Ok(())
    }

    /// Replaces the model when a CLI override is given.
    pub fn with_model_override(mut self, model: Option<String>) -> Self {
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.gemini.model = model;
        }
        self
    }

    /// Checks that every required value is present and in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gemini.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "gemini.api_key (set GEMINI_API_KEY)".to_string(),
            ));
        }
        if self.gemini.model.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "gemini.model (set GEMINI_MODEL or pass --model)".to_string(),
            ));
        }
        match self.gemini.max_tokens {
            None => {
                return Err(ConfigError::MissingField(
                    "gemini.max_tokens (set GEMINI_MAX_TOKENS)".to_string(),
                ));
            }
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "gemini.max_tokens".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            Some(_) => {}
        }
        if !(0.0..=2.0).contains(&self.gemini.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "gemini.temperature".to_string(),
                reason: format!("{} is outside 0.0..=2.0", self.gemini.temperature),
            });
        }
        if self.gemini.stream_idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gemini.stream_idle_timeout_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.tui.tick_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tui.tick_ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads a `.env` file from the working directory (or a parent) into the process environment.
///
/// Values already set in the environment win.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenv::dotenv().ok()
}

/// `~/.gemchat`, used for logs and the fallback config file.
pub fn gemchat_home() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".gemchat"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
