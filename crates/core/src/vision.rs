use crate::error::ExtractionError;
use crate::extractor::sniff_media_type;
use crate::traits::VisualDescriber;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_VISION_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_VISION_ENDPOINT: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub const DEFAULT_DESCRIBE_PROMPT: &str = "Analyze this screenshot and provide a detailed description focusing on:
1. UI elements (buttons, menus, forms, dialogs)
2. Text content and layout
3. Visual components (charts, images, icons)
4. Overall purpose and context
5. Any error messages or notifications
6. Color schemes and visual patterns

Be specific about what you see, the description is used to search screenshots later.";

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl VisionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_VISION_MODEL.to_string(),
            max_tokens: 500,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Describes screenshots through the Anthropic Messages API.
pub struct AnthropicDescriber {
    client: Client,
    config: VisionConfig,
}

impl AnthropicDescriber {
    pub fn new(config: VisionConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn request_body(&self, image: &[u8], prompt: &str) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": sniff_media_type(image),
                            "data": STANDARD.encode(image),
                        }
                    },
                    {
                        "type": "text",
                        "text": prompt,
                    }
                ]
            }]
        })
    }
}

#[async_trait]
impl VisualDescriber for AnthropicDescriber {
    async fn describe(
        &self,
        image: &[u8],
        instructions: Option<&str>,
    ) -> Result<String, ExtractionError> {
        let prompt = instructions.unwrap_or(DEFAULT_DESCRIBE_PROMPT);
        let response = self
            .client
            .post(format!(
                "{}/v1/messages",
                self.config.endpoint.trim_end_matches('/')
            ))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(image, prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::VisionFailed(format!("{status}: {body}")));
        }

        let parsed: Value = response.json().await?;
        response_text(&parsed).ok_or_else(|| ExtractionError::BadResponse {
            service: "anthropic".to_string(),
            details: "no text content block in response".to_string(),
        })
    }
}

fn response_text(parsed: &Value) -> Option<String> {
    let blocks = parsed.pointer("/content").and_then(Value::as_array)?;
    let text = blocks
        .iter()
        .filter(|block| block.pointer("/type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.pointer("/text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        None
    } else {
        Some(text.trim().to_string())
    }
}
