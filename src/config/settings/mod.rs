
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;

pub const APP_DIR_NAME: &str = "docs-rag";
pub const ACCESS_TOKEN_ENV: &str = "GRAPH_ACCESS_TOKEN";
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Where the knowledge base is persisted; defaults to `<base dir>/knowledge_base`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Ollama server used for embeddings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "all-minilm:latest".to_string(),
            batch_size: 32,
            timeout_seconds: 30,
        }
    }
}

/// Ollama server used for text generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "deepseek-r1:14b".to_string(),
            temperature: 0.5,
            timeout_seconds: 180,
        }
    }
}

/// Remote document library (a Microsoft Graph drive)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LibraryConfig {
    pub api_base: String,
    pub site_name: String,
    pub drive_name: String,
    /// Folder inside the drive to crawl from; empty means the drive root
    pub folder_path: String,
    pub timeout_seconds: u64,
    pub download_timeout_seconds: u64,
    pub max_download_bytes: u64,
    pub supported_extensions: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            api_base: "https://graph.microsoft.com/v1.0".to_string(),
            site_name: String::new(),
            drive_name: "Documents".to_string(),
            folder_path: String::new(),
            timeout_seconds: 15,
            download_timeout_seconds: 30,
            max_download_bytes: 50 * 1024 * 1024,
            supported_extensions: vec!["txt".to_string(), "docx".to_string(), "pdf".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Upper bound on the assembled context, in characters
    pub max_context_chars: usize,
    pub separator: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_context_chars: 3000,
            separator: "\n\n---\n\n".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid timeout: {0} (must be between 1 and 3600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid chunk size: {0} (must be between 1 and 100000)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid context budget: {0} (must be at least 100 characters)")]
    InvalidContextBudget(usize),
    #[error("Invalid download limit: {0} bytes")]
    InvalidDownloadLimit(u64),
    #[error("Invalid file extension: '{0}'")]
    InvalidExtension(String),
    #[error("Document library site name is not configured")]
    MissingSiteName,
    #[error("Document library drive name is not configured")]
    MissingDriveName,
    #[error("Access token not set: export {0}")]
    MissingAccessToken(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default application directory, e.g. `~/.config/docs-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Self>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();
        config
            .apply_env_overrides()
            .with_context(|| format!("Invalid {} value", OLLAMA_HOST_ENV))?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Hosts can be redirected without editing the file.
    ///
    /// `OLLAMA_HOST` takes the forms Ollama itself accepts: `host`, `host:port`
    /// or a full `scheme://host:port` URL. Parts it leaves out keep their configured value.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let Ok(value) = env::var(OLLAMA_HOST_ENV) else {
            return Ok(());
        };
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }

        let endpoint = parse_ollama_host(value)?;
        for (protocol, host, port) in [
            (
                &mut self.embedding.protocol,
                &mut self.embedding.host,
                &mut self.embedding.port,
            ),
            (
                &mut self.generation.protocol,
                &mut self.generation.host,
                &mut self.generation.port,
            ),
        ] {
            if let Some(scheme) = &endpoint.protocol {
                *protocol = scheme.clone();
            }
            *host = endpoint.host.clone();
            if let Some(explicit) = endpoint.port {
                *port = explicit;
            }
        }
        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.generation.validate()?;
        self.library.validate()?;
        self.validate_chunking_config()?;
        self.retrieval.validate()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(1..=100_000).contains(&config.size) {
            return Err(ConfigError::InvalidChunkSize(config.size));
        }

        if config.overlap >= config.size {
            return Err(ConfigError::OverlapTooLarge(config.overlap, config.size));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Directory holding the persisted index, metadata and manifest
    #[inline]
    pub fn knowledge_base_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("knowledge_base"))
    }
}

/// Endpoint parts named by `OLLAMA_HOST`
#[derive(Debug, PartialEq, Eq)]
struct OllamaHost {
    protocol: Option<String>,
    host: String,
    port: Option<u16>,
}

fn parse_ollama_host(value: &str) -> Result<OllamaHost, ConfigError> {
    let has_scheme = value.contains("://");
    let url_str = if has_scheme {
        value.to_string()
    } else {
        format!("http://{}", value)
    };
    let url = Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(value.to_string()))?;

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ConfigError::InvalidUrl(value.to_string()))?;

    Ok(OllamaHost {
        protocol: has_scheme.then(|| url.scheme().to_string()),
        host: host.to_string(),
        port: url.port(),
    })
}

fn validate_endpoint(protocol: &str, host: &str, port: u16) -> Result<Url, ConfigError> {
    if protocol != "http" && protocol != "https" {
        return Err(ConfigError::InvalidProtocol(protocol.to_string()));
    }

    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }

    let url_str = format!("{}://{}:{}", protocol, host, port);
    Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
}

fn validate_timeout(seconds: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&seconds) {
        return Err(ConfigError::InvalidTimeout(seconds));
    }
    Ok(())
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        validate_timeout(self.timeout_seconds)
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        validate_timeout(self.timeout_seconds)
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)
    }
}

impl LibraryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let api_base =
            Url::parse(&self.api_base).map_err(|_| ConfigError::InvalidUrl(self.api_base.clone()))?;
        if api_base.scheme() != "http" && api_base.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(api_base.scheme().to_string()));
        }

        validate_timeout(self.timeout_seconds)?;
        validate_timeout(self.download_timeout_seconds)?;

        if self.max_download_bytes == 0 {
            return Err(ConfigError::InvalidDownloadLimit(self.max_download_bytes));
        }

        if let Some(bad) = self
            .supported_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.contains('.') || ext.contains('/'))
        {
            return Err(ConfigError::InvalidExtension(bad.clone()));
        }

        Ok(())
    }

    /// Checks the settings a crawl needs beyond [`LibraryConfig::validate`]
    pub fn validate_for_crawl(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.site_name.trim().is_empty() {
            return Err(ConfigError::MissingSiteName);
        }
        if self.drive_name.trim().is_empty() {
            return Err(ConfigError::MissingDriveName);
        }
        Ok(())
    }

    /// Reads the bearer credential for the library API from the environment
    pub fn access_token() -> Result<String, ConfigError> {
        env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingAccessToken(ACCESS_TOKEN_ENV))
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }
        if self.max_context_chars < 100 {
            return Err(ConfigError::InvalidContextBudget(self.max_context_chars));
        }
        Ok(())
    }
}
