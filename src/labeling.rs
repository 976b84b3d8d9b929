//! Rhetorical labeling providers.
//!
//! Defines the [`Labeler`] trait and its implementations:
//! - **[`DisabledLabeler`]**: always fails; used when labeling is not configured.
//! - **[`GeminiLabeler`]**: Google `generateContent` REST API.
//! - **[`OpenAILabeler`]**: OpenAI chat completions API.
//!
//! Both remote providers send the whole sentence batch in one prompt that
//! asks for a bare JSON array, then cut the reply down to the span between
//! the first `[` and the last `]` before parsing it.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::LabelingConfig;
use crate::labels::RawLabel;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

/// One sentence sent for labeling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentenceInput {
    pub sentence_number: i64,
    pub text: String,
}

/// A batch labeling capability. One call per `process` request.
#[async_trait]
pub trait Labeler: Send + Sync {
    /// Provider identifier, for logging.
    fn name(&self) -> &str;

    async fn label(&self, sentences: &[SentenceInput]) -> Result<Vec<RawLabel>>;
}

// ============ Disabled ============

pub struct DisabledLabeler;

#[async_trait]
impl Labeler for DisabledLabeler {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn label(&self, _sentences: &[SentenceInput]) -> Result<Vec<RawLabel>> {
        bail!("Labeling provider is disabled")
    }
}

// ============ Gemini ============

pub struct GeminiLabeler {
    config: LabelingConfig,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiLabeler {
    pub fn new(config: &LabelingConfig) -> Result<Self> {
        let (model, api_key, client) = provider_parts(config)?;
        Ok(Self {
            config: config.clone(),
            model,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Labeler for GeminiLabeler {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn label(&self, sentences: &[SentenceInput]) -> Result<Vec<RawLabel>> {
        let base = self.config.endpoint.as_deref().unwrap_or(GEMINI_ENDPOINT);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            base.trim_end_matches('/'),
            self.model,
            self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": build_prompt(sentences)? }] }],
            "generationConfig": { "temperature": 0.0 },
        });

        let json = post_with_retry(&self.client, &self.config, "Gemini", &url, None, &body).await?;
        let reply = gemini_reply_text(&json)?;
        parse_labels(&reply)
    }
}

fn gemini_reply_text(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidates"))?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ OpenAI ============

pub struct OpenAILabeler {
    config: LabelingConfig,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAILabeler {
    pub fn new(config: &LabelingConfig) -> Result<Self> {
        let (model, api_key, client) = provider_parts(config)?;
        Ok(Self {
            config: config.clone(),
            model,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Labeler for OpenAILabeler {
    fn name(&self) -> &str {
        "openai"
    }

    async fn label(&self, sentences: &[SentenceInput]) -> Result<Vec<RawLabel>> {
        let base = self.config.endpoint.as_deref().unwrap_or(OPENAI_ENDPOINT);
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{ "role": "user", "content": build_prompt(sentences)? }],
        });

        let auth = format!("Bearer {}", self.api_key);
        let json =
            post_with_retry(&self.client, &self.config, "OpenAI", &url, Some(&auth), &body).await?;
        let reply = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))?;
        parse_labels(reply)
    }
}

// ============ Shared ============

fn provider_parts(config: &LabelingConfig) -> Result<(String, String, reqwest::Client)> {
    let model = config.model.clone().ok_or_else(|| {
        anyhow::anyhow!("labeling.model required for {} provider", config.provider)
    })?;
    let key_env = config.key_env();
    let api_key = std::env::var(key_env)
        .map_err(|_| anyhow::anyhow!("{} environment variable not set", key_env))?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok((model, api_key, client))
}

async fn post_with_retry(
    client: &reqwest::Client,
    config: &LabelingConfig,
    provider: &str,
    url: &str,
    authorization: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider, attempt, ?delay, "retrying labeling request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(auth) = authorization {
            request = request.header("Authorization", auth);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return Ok(json);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        provider,
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", provider, status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Labeling failed after retries")))
}

/// The instruction sent to both providers.
pub fn build_prompt(sentences: &[SentenceInput]) -> Result<String> {
    let data = serde_json::to_string_pretty(sentences)?;
    Ok(format!(
        r#"I will give you a sequence of sentences extracted from an academic article or book. Identify the rhetorical function of each sentence in the context of the whole text. Return ONLY a JSON array of objects, where each object has:
- sentence_number: must match the provided number
- rhetorical_function: 1-3 keywords (e.g. Introduction, Background, Method, Results, Discussion, Conclusion), a colon, then 5-10 words of detail
- relevance: score from 0-100

Example response format:
[
  {{
    "sentence_number": 1,
    "rhetorical_function": "Introduction: Establishes the context and scope of the research",
    "relevance": 90
  }}
]

Do not include any text before or after the JSON array. Do not use markdown formatting.

Sentences to analyze:
{}
"#,
        data
    ))
}

/// Parse a model reply into raw labels.
///
/// Everything outside the first `[` and the last `]` is discarded. Entries
/// without a usable `sentence_number` are skipped; relevance may arrive as an
/// integer, a float or a numeric string.
pub fn parse_labels(reply: &str) -> Result<Vec<RawLabel>> {
    let start = reply.find('[');
    let end = reply.rfind(']');
    let span = match (start, end) {
        (Some(s), Some(e)) if e > s => &reply[s..=e],
        _ => bail!("No JSON array found in labeling response"),
    };

    let items: Vec<serde_json::Value> =
        serde_json::from_str(span).context("Labeling response is not a valid JSON array")?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let sentence_number = number_field(item.get("sentence_number")?)?;
            let function = item
                .get("rhetorical_function")
                .or_else(|| item.get("function"))
                .and_then(|f| f.as_str())
                .unwrap_or_default()
                .to_string();
            let relevance = item.get("relevance").and_then(number_field).unwrap_or(0);
            Some(RawLabel {
                sentence_number,
                function,
                relevance,
            })
        })
        .collect())
}

fn number_field(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Create the [`Labeler`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledLabeler`] |
/// | `"gemini"` | [`GeminiLabeler`] |
/// | `"openai"` | [`OpenAILabeler`] |
pub fn create_labeler(config: &LabelingConfig) -> Result<Box<dyn Labeler>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledLabeler)),
        "gemini" => Ok(Box::new(GeminiLabeler::new(config)?)),
        "openai" => Ok(Box::new(OpenAILabeler::new(config)?)),
        other => bail!("Unknown labeling provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_surrounding_text() {
        let reply = "Sure! ```json\n[{\"sentence_number\": 1, \"rhetorical_function\": \"Method: describes sampling\", \"relevance\": 80}]\n```";
        let labels = parse_labels(reply).unwrap();
        assert_eq!(
            labels,
            vec![RawLabel {
                sentence_number: 1,
                function: "Method: describes sampling".to_string(),
                relevance: 80,
            }]
        );
    }

    #[test]
    fn parse_accepts_loose_numbers() {
        let reply = r#"[
            {"sentence_number": "2", "rhetorical_function": "Results: x", "relevance": 72.6},
            {"sentence_number": 3, "rhetorical_function": "Discussion: y", "relevance": "15"},
            {"rhetorical_function": "orphan", "relevance": 10}
        ]"#;
        let labels = parse_labels(reply).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].sentence_number, 2);
        assert_eq!(labels[0].relevance, 73);
        assert_eq!(labels[1].relevance, 15);
    }

    #[test]
    fn parse_without_array_fails() {
        assert!(parse_labels("I cannot help with that.").is_err());
        assert!(parse_labels("] backwards [").is_err());
    }

    #[test]
    fn prompt_lists_every_sentence() {
        let prompt = build_prompt(&[
            SentenceInput {
                sentence_number: 1,
                text: "First sentence.".to_string(),
            },
            SentenceInput {
                sentence_number: 2,
                text: "Second one.".to_string(),
            },
        ])
        .unwrap();
        assert!(prompt.contains("\"sentence_number\": 2"));
        assert!(prompt.contains("Second one."));
    }

    #[test]
    fn gemini_reply_joins_parts() {
        let json = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "[{\"sentence_number\":1," }, { "text": "\"relevance\":5}]" }] } }]
        });
        let text = gemini_reply_text(&json).unwrap();
        assert_eq!(parse_labels(&text).unwrap()[0].relevance, 5);
    }

    #[tokio::test]
    async fn disabled_labeler_fails() {
        let labeler = create_labeler(&LabelingConfig::default()).unwrap();
        assert_eq!(labeler.name(), "disabled");
        assert!(labeler.label(&[]).await.is_err());
    }
}
