use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::{config::OpenRouterConfig, domain::ScoreSet};

use super::inference::{build_request, parse_completion, HTTP_REFERER, X_TITLE};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("API key not set - configure an OpenRouter API key")]
    ApiKeyMissing,
    #[error("API request failed: {status}")]
    RequestFailed { status: StatusCode, body: String },
    #[error("API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// A request failure reported back over the control channel.
    #[error("{0}")]
    Relayed(String),
    #[error("classification context invalidated")]
    ContextInvalidated,
}

impl ClassifyError {
    pub fn kind(&self) -> ClassifyErrorKind {
        match self {
            ClassifyError::ApiKeyMissing => ClassifyErrorKind::ApiKeyMissing,
            ClassifyError::RequestFailed { .. }
            | ClassifyError::Transport(_)
            | ClassifyError::Relayed(_) => ClassifyErrorKind::RequestFailed,
            ClassifyError::ContextInvalidated => ClassifyErrorKind::ContextInvalidated,
        }
    }
}

/// Wire-friendly discriminant of [`ClassifyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassifyErrorKind {
    ApiKeyMissing,
    RequestFailed,
    ContextInvalidated,
}

/// Scores post text. `Ok(None)` means the model answered but not with a
/// usable score object.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Option<ScoreSet>, ClassifyError>;
}

pub struct OpenRouterClient {
    http: Client,
    config: OpenRouterConfig,
    api_key: RwLock<Option<String>>,
}

impl OpenRouterClient {
    pub fn new(http: Client, config: OpenRouterConfig) -> Self {
        let api_key = RwLock::new(config.api_key.clone());
        Self {
            http,
            config,
            api_key,
        }
    }

    /// Replaces the key used for subsequent requests. Blank clears it.
    pub fn set_api_key(&self, key: &str) {
        let key = key.trim();
        *self.api_key.write() = if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        };
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.read().is_some()
    }
}

#[async_trait]
impl Classifier for OpenRouterClient {
    async fn classify(&self, text: &str) -> Result<Option<ScoreSet>, ClassifyError> {
        let api_key = self
            .api_key
            .read()
            .clone()
            .ok_or(ClassifyError::ApiKeyMissing)?;

        tracing::debug!(
            target: "classifier",
            key_prefix = %api_key.chars().take(4).collect::<String>(),
            chars = text.chars().count(),
            "sending classification request"
        );

        let request = build_request(self.config.model.clone(), self.config.max_tokens, text);
        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&api_key)
            .header("HTTP-Referer", HTTP_REFERER)
            .header("X-Title", X_TITLE)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::RequestFailed { status, body });
        }

        let body = response.text().await?;
        let scores = parse_completion(&body);
        if let Some(scores) = &scores {
            tracing::debug!(target: "classifier", ?scores, "final content scores");
        }
        Ok(scores)
    }
}
