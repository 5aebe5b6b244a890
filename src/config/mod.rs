// Configuration management module
// TOML settings in the application directory, plus environment overrides

pub mod settings;


pub use settings::{
    Config, ConfigError, EmbeddingConfig, GenerationConfig, LibraryConfig, RetrievalConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Render the effective configuration as TOML
#[inline]
pub fn render_config(config: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}
