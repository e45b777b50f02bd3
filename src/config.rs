// Configuration File Support
//
// Loads node configuration from a TOML file with environment variable
// overrides. Configuration files are read from the XDG config directory:
// ~/.config/meshsentinel/config.toml

use crate::error::NodeError;
use crate::mesh::config::MeshConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Mesh protocol configuration (ports, intervals, timeouts)
    pub mesh: MeshConfig,

    /// HTTP surface configuration
    pub http: HttpConfig,

    /// Optional LLM-clustering collaborator configuration
    pub ollama: OllamaConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Port the dashboard-facing HTTP API listens on (default: 5000)
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_addr: "0.0.0.0".to_string(),
        }
    }
}

/// Configuration for the optional LLM clustering collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11434,
            model: "llama3.2".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            mesh: MeshConfig::default(),
            http: HttpConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default XDG path, falling back to
    /// defaults if no file is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// the resulting configuration fails validation.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Default configuration file path: `~/.config/meshsentinel/config.toml`
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "meshsentinel", "MeshSentinel") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("meshsentinel")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides. Env vars take precedence over
    /// whatever was loaded from the config file.
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("MESHSENTINEL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("MESHSENTINEL_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(port) = std::env::var("MESHSENTINEL_TCP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.mesh.tcp_port = port;
            }
        }
        if let Ok(port) = std::env::var("MESHSENTINEL_UDP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.mesh.udp_port = port;
            }
        }
        if let Ok(secs) = std::env::var("MESHSENTINEL_PEER_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.mesh.peer_timeout_secs = secs;
            }
        }
        if let Ok(secs) = std::env::var("MESHSENTINEL_DISCOVERY_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.mesh.discovery_interval_secs = secs;
            }
        }

        if let Ok(port) = std::env::var("MESHSENTINEL_HTTP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.http.port = port;
            }
        }

        // Ollama's own conventional env vars, per spec §6
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            self.ollama.host = host;
        }
        if let Ok(port) = std::env::var("OLLAMA_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.ollama.port = port;
            }
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.ollama.model = model;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(NodeError::InvalidConfig(format!(
                    "invalid log level: {}. must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ))
                .into())
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(NodeError::InvalidConfig(format!(
                    "invalid log format: {}. must be one of: json, pretty, compact",
                    self.logging.format
                ))
                .into())
            }
        }

        self.mesh
            .validate()
            .map_err(|e| NodeError::InvalidConfig(format!("invalid mesh config: {e}")))?;

        if self.http.port == 0 {
            return Err(NodeError::InvalidConfig("http.port must be greater than 0".to_string()).into());
        }
        if self.http.port == self.mesh.tcp_port || self.http.port == self.mesh.udp_port {
            return Err(NodeError::InvalidConfig(
                "http.port must differ from mesh.tcp_port and mesh.udp_port".to_string(),
            )
            .into());
        }

        if self.ollama.port == 0 {
            return Err(NodeError::InvalidConfig("ollama.port must be greater than 0".to_string()).into());
        }
        if self.ollama.host.trim().is_empty() {
            return Err(NodeError::InvalidConfig("ollama.host must not be empty".to_string()).into());
        }

        Ok(())
    }

    /// Convert the configured log level string to a `tracing::Level`
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
