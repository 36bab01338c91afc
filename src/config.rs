//! Configuration management for the veilshell config root.
//!
//! The config root (default `~/.veilshell`) holds `config.json`, the persona
//! catalog, the session database, and the Tor daemon's working directory.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default SOCKS port for the local Tor endpoint.
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Default control port for the local Tor endpoint.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Persona substituted when a referenced persona no longer resolves.
pub const DEFAULT_PERSONA_ID: &str = "anonymous";

/// Config file name inside the config root.
const CONFIG_FILENAME: &str = "config.json";

/// Session database filename inside the sessions directory.
const SESSION_DB_FILENAME: &str = "sessions.db";

/// Read an external SOCKS proxy URL from the environment.
pub fn socks_proxy_from_env() -> Option<String> {
    env::var("SOCKS_PROXY").ok().filter(|s| !s.is_empty())
}

/// Errors from configuration loading and mutation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(serde_json::Error),
    #[error("unknown configuration option: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Filesystem layout anchored at the config root.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base configuration directory.
    pub config_root: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        // ~/.veilshell, falling back to the current directory
        let config_root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".veilshell");
        Self { config_root }
    }
}

impl Settings {
    /// Create settings anchored at an explicit root.
    pub fn with_config_root(root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: root.into(),
        }
    }

    /// Resolve a user-supplied root argument, expanding `~`.
    pub fn from_root_arg(arg: &str) -> Self {
        let expanded = shellexpand::tilde(arg);
        Self {
            config_root: PathBuf::from(expanded.as_ref()),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_root.join(CONFIG_FILENAME)
    }

    pub fn personas_dir(&self) -> PathBuf {
        self.config_root.join("personas")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.config_root.join("sessions")
    }

    pub fn session_db_path(&self) -> PathBuf {
        self.sessions_dir().join(SESSION_DB_FILENAME)
    }

    /// Working directory handed to the Tor daemon (`DataDirectory`).
    pub fn tor_data_dir(&self) -> PathBuf {
        self.config_root.join("tor")
    }

    /// Profile cache wiped during panic teardown.
    pub fn cache_dir(&self) -> PathBuf {
        self.config_root.join("cache")
    }

    /// Scratch space wiped during panic teardown.
    pub fn temp_dir(&self) -> PathBuf {
        self.config_root.join("tmp")
    }

    /// Database URL for the session store.
    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.session_db_path().display())
    }

    /// Ensure the directory layout exists. Idempotent.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.config_root.clone(),
            self.personas_dir(),
            self.sessions_dir(),
            self.tor_data_dir(),
            self.cache_dir(),
            self.temp_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Tor daemon options (`tor.*` keys in config.json).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorConfig {
    /// Whether circuit supervision is enabled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Local SOCKS port the daemon listens on.
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,
    /// Local control port used for authentication and circuit renewal.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Start the daemon as part of application startup.
    #[serde(default)]
    pub auto_start: bool,
    /// Two-letter country codes for exit-node pinning. Empty disables pinning.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit_countries: Vec<String>,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socks_port: DEFAULT_SOCKS_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            auto_start: false,
            exit_countries: Vec::new(),
        }
    }
}

/// Security options (`security.*` keys in config.json).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Key chord the UI maps to the panic trigger.
    #[serde(default = "default_panic_key")]
    pub panic_key: String,
    /// Purge browsing history when the application exits normally.
    #[serde(default = "default_true")]
    pub clear_history_on_exit: bool,
    /// Force-disable JavaScript regardless of the active persona.
    #[serde(default)]
    pub disable_javascript: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            panic_key: default_panic_key(),
            clear_history_on_exit: true,
            disable_javascript: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_socks_port() -> u16 {
    DEFAULT_SOCKS_PORT
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_panic_key() -> String {
    "Ctrl+Shift+P".to_string()
}

fn default_persona_id() -> String {
    DEFAULT_PERSONA_ID.to_string()
}

/// Configuration file structure (`config.json` in the config root).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tor: TorConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    /// Persona applied to new tabs and substituted for dangling references.
    #[serde(default = "default_persona_id")]
    pub default_persona: String,
    /// External SOCKS endpoint override (`--tor-proxy` flag or SOCKS_PROXY).
    /// When set, the supervisor adopts this endpoint instead of spawning.
    #[serde(skip)]
    pub external_proxy: Option<String>,
    /// Path this config was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tor: TorConfig::default(),
            security: SecurityConfig::default(),
            default_persona: default_persona_id(),
            external_proxy: None,
            source_path: None,
        }
    }
}

impl Config {
    /// Load from the config root, falling back to defaults when no file exists.
    /// Environment overrides are applied either way.
    pub fn load(settings: &Settings) -> Result<Self, ConfigError> {
        let path = settings.config_path();
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }
        Ok(Self::load_from_path(&path)?.with_env_overrides())
    }

    /// Load configuration from a specific file path.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Persist to the config root as pretty-printed JSON.
    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        let path = settings.config_path();
        fs::write(&path, json).map_err(|e| ConfigError::Io { path, source: e })?;
        Ok(())
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        // SOCKS_PROXY points at an externally managed endpoint
        if let Some(proxy) = socks_proxy_from_env() {
            self.external_proxy = Some(proxy);
        }

        // VEILSHELL_NO_TOR=1 disables the supervisor entirely
        if env::var("VEILSHELL_NO_TOR")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            self.tor.enabled = false;
        }

        self
    }

    /// Apply CLI flag overrides.
    pub fn with_cli_overrides(mut self, force_tor: bool, tor_proxy: Option<String>) -> Self {
        if force_tor {
            self.tor.enabled = true;
            self.tor.auto_start = true;
        }
        if let Some(proxy) = tor_proxy {
            self.external_proxy = Some(proxy);
        }
        self
    }

    /// Check if this is the default config.
    pub fn is_default(&self) -> bool {
        self.tor == TorConfig::default()
            && self.security == SecurityConfig::default()
            && self.default_persona == DEFAULT_PERSONA_ID
    }

    /// Local SOCKS endpoint as host:port.
    pub fn socks_endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.tor.socks_port)
    }

    /// External endpoint override as host:port, if one is configured.
    /// Accepts bare `host:port` as well as `socks5://` / `socks5h://` URLs.
    pub fn external_endpoint(&self) -> Option<String> {
        self.external_proxy.as_deref().map(|raw| {
            raw.strip_prefix("socks5://")
                .or_else(|| raw.strip_prefix("socks5h://"))
                .unwrap_or(raw)
                .trim_end_matches('/')
                .to_string()
        })
    }

    /// Look up a recognized option by dotted key.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        use serde_json::json;
        match key {
            "tor.enabled" => Some(json!(self.tor.enabled)),
            "tor.socks_port" => Some(json!(self.tor.socks_port)),
            "tor.control_port" => Some(json!(self.tor.control_port)),
            "tor.auto_start" => Some(json!(self.tor.auto_start)),
            "tor.exit_countries" => Some(json!(self.tor.exit_countries)),
            "security.panic_key" => Some(json!(self.security.panic_key)),
            "security.clear_history_on_exit" => Some(json!(self.security.clear_history_on_exit)),
            "security.disable_javascript" => Some(json!(self.security.disable_javascript)),
            "default_persona" => Some(json!(self.default_persona)),
            _ => None,
        }
    }

    /// Set a recognized option by dotted key.
    /// Unknown keys and wrongly-typed values are rejected before any mutation.
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        match key {
            "tor.enabled" => self.tor.enabled = as_bool(key, &value)?,
            "tor.socks_port" => self.tor.socks_port = as_port(key, &value)?,
            "tor.control_port" => self.tor.control_port = as_port(key, &value)?,
            "tor.auto_start" => self.tor.auto_start = as_bool(key, &value)?,
            "tor.exit_countries" => self.tor.exit_countries = as_country_list(key, &value)?,
            "security.panic_key" => {
                let chord = as_string(key, &value)?;
                validate_panic_key(&chord)?;
                self.security.panic_key = chord;
            }
            "security.clear_history_on_exit" => {
                self.security.clear_history_on_exit = as_bool(key, &value)?
            }
            "security.disable_javascript" => {
                self.security.disable_javascript = as_bool(key, &value)?
            }
            "default_persona" => {
                let id = as_string(key, &value)?;
                if id.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        reason: "persona id must not be empty".to_string(),
                    });
                }
                self.default_persona = id;
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

fn as_bool(key: &str, value: &serde_json::Value) -> Result<bool, ConfigError> {
    value.as_bool().ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: "expected a boolean".to_string(),
    })
}

fn as_string(key: &str, value: &serde_json::Value) -> Result<String, ConfigError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a string".to_string(),
        })
}

fn as_port(key: &str, value: &serde_json::Value) -> Result<u16, ConfigError> {
    value
        .as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p != 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a port number (1-65535)".to_string(),
        })
}

fn as_country_list(key: &str, value: &serde_json::Value) -> Result<Vec<String>, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        reason: "expected a list of two-letter country codes".to_string(),
    };
    let items = value.as_array().ok_or_else(invalid)?;
    let mut countries = Vec::with_capacity(items.len());
    for item in items {
        let code = item.as_str().ok_or_else(invalid)?;
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }
        countries.push(code.to_lowercase());
    }
    Ok(countries)
}

/// Validate a panic key chord like `Ctrl+Shift+P`: at least one modifier
/// plus exactly one non-modifier key.
pub fn validate_panic_key(chord: &str) -> Result<(), ConfigError> {
    const MODIFIERS: [&str; 4] = ["Ctrl", "Shift", "Alt", "Meta"];

    let invalid = |reason: &str| ConfigError::InvalidValue {
        key: "security.panic_key".to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = chord.split('+').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(invalid("empty component in key chord"));
    }
    let (modifiers, keys): (Vec<&&str>, Vec<&&str>) =
        parts.iter().partition(|p| MODIFIERS.contains(p));
    if modifiers.is_empty() || keys.len() != 1 {
        return Err(invalid("expected a modifier+key chord like Ctrl+Shift+P"));
    }
    Ok(())
}
