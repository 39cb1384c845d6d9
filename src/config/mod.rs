
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Upstream chat-completions API settings. The credential itself is
/// never stored here; only the name of the environment variable that
/// holds it. A missing variable fails at call time, not at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_report_max_tokens")]
    pub report_max_tokens: u32,

    #[serde(default = "default_simplify_max_tokens")]
    pub simplify_max_tokens: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            vision_model: default_vision_model(),
            text_model: default_text_model(),
            report_max_tokens: default_report_max_tokens(),
            simplify_max_tokens: default_simplify_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    31340
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_vision_model() -> String {
    "gpt-4o".to_string()
}
fn default_text_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_report_max_tokens() -> u32 {
    1500
}
fn default_simplify_max_tokens() -> u32 {
    1000
}
fn default_max_file_size_bytes() -> u64 {
    10_485_760 // 10 MB
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // Create default config file on first run
            let config = Config::default();
            config.save_template(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate().context("Configuration validation failed")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("api.base_url cannot be empty");
        }
        if self.api.vision_model.trim().is_empty() {
            anyhow::bail!("api.vision_model cannot be empty");
        }
        if self.api.text_model.trim().is_empty() {
            anyhow::bail!("api.text_model cannot be empty");
        }
        if self.api.report_max_tokens == 0 || self.api.simplify_max_tokens == 0 {
            anyhow::bail!("api token caps must be greater than zero");
        }
        if self.upload.max_file_size_bytes == 0 {
            anyhow::bail!("upload.max_file_size_bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

        Ok(base.home_dir().join(".medscan").join("config.toml"))
    }

    fn save_template(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let body = toml::to_string_pretty(self)?;
        let content = format!(
            "# medscan configuration\n\
             # The API credential is read from the environment variable named by\n\
             # api.api_key_env (default OPENAI_API_KEY), not from this file.\n\n{}",
            body
        );
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
