use crate::error::ExtractionError;
use crate::text::clean_ocr_text;
use crate::traits::TextExtractor;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs the `tesseract` binary, feeding the image on stdin.
#[derive(Debug, Clone)]
pub struct TesseractExtractor {
    pub binary: String,
    pub page_segmentation_mode: u8,
}

impl Default for TesseractExtractor {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            page_segmentation_mode: 6,
        }
    }
}

impl TesseractExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ExtractionError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "--psm"])
            .arg(self.page_segmentation_mode.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ExtractionError::OcrFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(clean_ocr_text(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    image_base64: String,
    media_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Option<Vec<OcrPage>>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// OCR through an HTTP service that accepts a base64 image.
pub struct HttpOcrExtractor {
    client: Client,
    config: OcrEndpointConfig,
}

impl HttpOcrExtractor {
    pub fn new(config: OcrEndpointConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TextExtractor for HttpOcrExtractor {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ExtractionError> {
        let payload = OcrRequest {
            image_base64: STANDARD.encode(image),
            media_type: sniff_media_type(image).to_string(),
        };

        let mut request = self.client.post(&self.config.endpoint).json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ExtractionError::OcrFailed(format!(
                "ocr request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: OcrResponse = response.json().await?;
        payload_to_text(&payload).ok_or_else(|| ExtractionError::BadResponse {
            service: self.config.endpoint.clone(),
            details: "response carried neither `text` nor `pages`".to_string(),
        })
    }
}

fn payload_to_text(payload: &OcrResponse) -> Option<String> {
    if let Some(pages) = &payload.pages {
        let joined = pages
            .iter()
            .filter_map(|page| page.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        return Some(clean_ocr_text(&joined));
    }

    payload.text.as_deref().map(clean_ocr_text)
}

/// MIME type from magic bytes; PNG when unknown.
pub fn sniff_media_type(image: &[u8]) -> &'static str {
    infer::get(image)
        .map(|kind| kind.mime_type())
        .filter(|mime| mime.starts_with("image/"))
        .unwrap_or("image/png")
}
