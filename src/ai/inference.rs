use serde::{Deserialize, Serialize};

use crate::domain::{Label, ScoreSet};

use super::extract::parse_scores;

pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const HTTP_REFERER: &str = "https://github.com/Shpigford/mutetheweb";
pub const X_TITLE: &str = "MuteTheWeb";

const SYSTEM_PROMPT: &str = "You are a content analyzer that exclusively responds with JSON. Never include any other text or explanation in your response.";

pub fn build_prompt(text: &str) -> String {
    let template = Label::ALL
        .iter()
        .map(|label| format!("    \"{}\": 0.0", label.as_str()))
        .collect::<Vec<_>>()
        .join(",\n");
    let definitions = Label::ALL
        .iter()
        .map(|label| format!("- \"{}\": 0.0 - {}", label.as_str(), label.definition()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze the following text and rate it on a scale of 0 to 1 for different characteristics. \
         Respond with ONLY a JSON object in this exact format, nothing else:\n\
         {{\n{template}\n}}\n\n\
         Here are definitions for each of the fields:\n{definitions}\n\n\
         Text: \"{text}\""
    )
}

pub fn build_request(model: String, max_tokens: u32, text: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system".into(),
                content: SYSTEM_PROMPT.into(),
            },
            ChatMessage {
                role: "user".into(),
                content: build_prompt(text),
            },
        ],
        provider: ProviderPreferences {
            ignore: vec!["Lambda".into()],
        },
        temperature: 0.0,
        max_tokens,
        top_p: 1.0,
        frequency_penalty: 0.0,
        presence_penalty: 0.0,
    }
}

/// Extracts scores from a completion body. `None` covers every way the body
/// can fail to yield a complete score object.
pub fn parse_completion(body: &str) -> Option<ScoreSet> {
    let completion: ChatCompletionResponse = match serde_json::from_str(body) {
        Ok(completion) => completion,
        Err(err) => {
            tracing::debug!(target: "classifier", error = %err, "completion body is not valid JSON");
            return None;
        }
    };

    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|msg| msg.content)
        .unwrap_or_default();
    let content = content.trim();
    tracing::debug!(target: "classifier", reply = %content, "raw model reply");

    let scores = parse_scores(content);
    if scores.is_none() {
        tracing::debug!(target: "classifier", reply = %content, "reply missing a complete score object");
    }
    scores
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub provider: ProviderPreferences,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ProviderPreferences {
    pub ignore: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: Option<ChatCompletionMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionMessage {
    pub content: Option<String>,
}
