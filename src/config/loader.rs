use std::{env, str::FromStr, time::Duration};

use super::env::{
    AppConfig, ConfigError, DirectoryConfig, FeedConfig, FilterConfig, LoggingConfig,
    OpenRouterConfig,
};
use crate::{
    ai::inference::OPENROUTER_API_URL,
    domain::{label::DEFAULT_THRESHOLD, Label, ThresholdTable},
    tasks::decision::LabelPolicy,
};

const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-70b-instruct";

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let openrouter = OpenRouterConfig {
            api_key: env::var("OPENROUTER_API_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            api_url: env::var("OPENROUTER_API_URL")
                .unwrap_or_else(|_| OPENROUTER_API_URL.to_string()),
            model: env::var("OPENROUTER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            max_tokens: parse_or("OPENROUTER_MAX_TOKENS", 200)?,
        };

        let feed = FeedConfig {
            pages_dir: env::var("PAGES_DIR").unwrap_or_else(|_| "pages".to_string()),
            debounce: Duration::from_millis(parse_or("SCAN_DEBOUNCE_MS", 250)?),
        };

        let filter = FilterConfig {
            thresholds: load_thresholds()?,
            policy: parse_or("LABEL_POLICY", LabelPolicy::FirstMatch)?,
        };

        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            db_filename: env::var("DB_FILENAME").unwrap_or_else(|_| "mutetheweb.db".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        Ok(Self {
            openrouter,
            feed,
            filter,
            directories,
            logging,
        })
    }
}

fn load_thresholds() -> Result<ThresholdTable, ConfigError> {
    let base = parse_threshold("FILTER_THRESHOLD")?.unwrap_or(DEFAULT_THRESHOLD);
    let mut table = ThresholdTable::uniform(base);
    for label in Label::ALL {
        let key = format!("FILTER_THRESHOLD_{}", label.as_str().to_ascii_uppercase());
        if let Some(value) = parse_threshold(&key)? {
            table = table.with(label, value);
        }
    }
    Ok(table)
}

fn parse_threshold(key: &str) -> Result<Option<f32>, ConfigError> {
    let Ok(raw) = env::var(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<f32>() {
        Ok(value) if (0.0..=1.0).contains(&value) => Ok(Some(value)),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            })
        }
        _ => Ok(default),
    }
}
