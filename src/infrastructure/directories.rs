use std::{fs, path::PathBuf};

use anyhow::{Context, Result};

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub logs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub pages_dir: PathBuf,
    pub db_path: PathBuf,
}

pub fn ensure_directories(config: &AppConfig) -> Result<ResolvedPaths> {
    let logs_dir = ensure_dir(&config.directories.logs_dir)?;
    let data_dir = ensure_dir(&config.directories.data_dir)?;
    let pages_dir = ensure_dir(&config.feed.pages_dir)?;
    let db_path = data_dir.join(&config.directories.db_filename);

    let marker = data_dir.join(".write-test");
    fs::write(&marker, b"ok")
        .with_context(|| format!("data directory {} is not writable", data_dir.display()))?;
    fs::remove_file(&marker)?;
    Ok(ResolvedPaths {
        logs_dir,
        data_dir,
        pages_dir,
        db_path,
    })
}

fn ensure_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    if !dir.exists() {
        fs::create_dir_all(&dir).with_context(|| format!("failed to create directory {path}"))?;
    }
    Ok(dir.canonicalize().unwrap_or(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::env::{DirectoryConfig, FeedConfig, FilterConfig, LoggingConfig, OpenRouterConfig},
        domain::ThresholdTable,
        tasks::decision::LabelPolicy,
    };
    use std::time::Duration;

    #[test]
    fn creates_missing_directories() {
        let root = tempfile::tempdir().unwrap();
        let at = |name: &str| root.path().join(name).to_string_lossy().into_owned();

        let config = AppConfig {
            openrouter: OpenRouterConfig {
                api_key: None,
                api_url: String::new(),
                model: String::new(),
                max_tokens: 200,
            },
            feed: FeedConfig {
                pages_dir: at("pages"),
                debounce: Duration::from_millis(250),
            },
            filter: FilterConfig {
                thresholds: ThresholdTable::default(),
                policy: LabelPolicy::default(),
            },
            directories: DirectoryConfig {
                logs_dir: at("logs"),
                data_dir: at("nested/data"),
                db_filename: "test.db".into(),
            },
            logging: LoggingConfig {
                level: "info".into(),
            },
        };

        let paths = ensure_directories(&config).unwrap();
        assert!(paths.pages_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert!(paths.db_path.starts_with(&paths.data_dir));
        assert!(!paths.data_dir.join(".write-test").exists());
    }
}
