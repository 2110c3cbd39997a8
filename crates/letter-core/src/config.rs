//! Configuration management for the letter workflow

use crate::error::{LetterError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetterConfig {
    pub renderer: RendererConfig,
    pub mailer: MailerConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(alias = "url")] // Accept both 'base_url' and 'url'
    pub base_url: String,

    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailerConfig {
    #[serde(alias = "api_url")] // Accept both 'base_url' and 'api_url'
    pub base_url: String,

    #[serde(alias = "token")]
    pub api_key: String,

    #[serde(alias = "from")]
    pub from_address: String,

    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Ceiling on resend attempts for a failed letter
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Worker pool size for bulk operations
    #[serde(default = "default_bulk_parallelism")]
    pub bulk_parallelism: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            bulk_parallelism: default_bulk_parallelism(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// Default functions
fn default_call_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_bulk_parallelism() -> usize {
    4
}

fn default_data_dir() -> String {
    crate::paths::DEFAULT_DATA_ROOT.to_string()
}

fn default_port() -> u16 {
    8080
}

impl LetterConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LetterError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json_str(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LetterError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.renderer.base_url.is_empty() {
            return Err(LetterError::Config("Renderer base URL is required".to_string()));
        }

        if self.mailer.base_url.is_empty() || self.mailer.api_key.is_empty() {
            return Err(LetterError::Config(
                "Mailer base URL and API key are required".to_string(),
            ));
        }

        if !self.mailer.from_address.contains('@') {
            return Err(LetterError::Config(format!(
                "Mailer from address '{}' is not an email address",
                self.mailer.from_address
            )));
        }

        if self.workflow.bulk_parallelism == 0 {
            return Err(LetterError::Config(
                "Bulk parallelism must be at least 1".to_string(),
            ));
        }

        if self.renderer.timeout_secs == 0 || self.mailer.timeout_secs == 0 {
            return Err(LetterError::Config(
                "Collaborator timeouts must be at least one second".to_string(),
            ));
        }

        Ok(())
    }
}
