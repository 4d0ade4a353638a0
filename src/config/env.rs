use std::time::Duration;

use thiserror::Error;

use crate::{domain::ThresholdTable, tasks::decision::LabelPolicy};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openrouter: OpenRouterConfig,
    pub feed: FeedConfig,
    pub filter: FilterConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    /// Seeds the stored key on first start; the store stays authoritative.
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub pages_dir: String,
    pub debounce: Duration,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub thresholds: ThresholdTable,
    pub policy: LabelPolicy,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}
