use crate::error::ExtractionError;
use crate::ingest::digest_bytes;
use crate::traits::{TextExtractor, VisualDescriber};
use crate::ScreenshotRecord;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Runs OCR and visual description side by side and merges them into a
/// record. A failing modality leaves its field `None`; it never aborts the
/// other one. The record comes back without an embedding and is not stored.
#[derive(Clone)]
pub struct RecordBuilder {
    extractor: Arc<dyn TextExtractor>,
    describer: Option<Arc<dyn VisualDescriber>>,
    instructions: Option<String>,
    timeout: Duration,
}

impl RecordBuilder {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        describer: Option<Arc<dyn VisualDescriber>>,
        timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            describer,
            instructions: None,
            timeout,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn describes_visuals(&self) -> bool {
        self.describer.is_some()
    }

    pub async fn build(&self, image: &[u8], source_name: &str) -> ScreenshotRecord {
        let ocr = bounded("ocr", self.timeout, self.extractor.extract_text(image));
        let vision = async {
            match &self.describer {
                Some(describer) => Some(
                    bounded(
                        "vision",
                        self.timeout,
                        describer.describe(image, self.instructions.as_deref()),
                    )
                    .await,
                ),
                None => None,
            }
        };

        let (extracted, described) = tokio::join!(ocr, vision);

        let extracted_text = match extracted {
            Ok(text) => Some(text),
            Err(error) => {
                warn!(source = source_name, error = %error, "text extraction failed");
                None
            }
        };

        let visual_description = match described {
            Some(Ok(description)) => Some(description),
            Some(Err(error)) => {
                warn!(source = source_name, error = %error, "visual description failed");
                None
            }
            None => None,
        };

        ScreenshotRecord::new(
            digest_bytes(image),
            source_name,
            extracted_text,
            visual_description,
            Utc::now(),
        )
    }
}

async fn bounded<F>(
    stage: &'static str,
    timeout: Duration,
    call: F,
) -> Result<String, ExtractionError>
where
    F: Future<Output = Result<String, ExtractionError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ExtractionError::Timeout { stage, timeout }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;

    pub(crate) struct FixedExtractor(pub Option<&'static str>);

    #[async_trait]
    impl TextExtractor for FixedExtractor {
        async fn extract_text(&self, _image: &[u8]) -> Result<String, ExtractionError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| ExtractionError::OcrFailed("tesseract missing".to_string()))
        }
    }

    pub(crate) struct FixedDescriber(pub Option<&'static str>);

    #[async_trait]
    impl VisualDescriber for FixedDescriber {
        async fn describe(
            &self,
            _image: &[u8],
            _instructions: Option<&str>,
        ) -> Result<String, ExtractionError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| ExtractionError::VisionFailed("503".to_string()))
        }
    }

    struct SlowDescriber;

    #[async_trait]
    impl VisualDescriber for SlowDescriber {
        async fn describe(
            &self,
            _image: &[u8],
            _instructions: Option<&str>,
        ) -> Result<String, ExtractionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    fn builder(ocr: Option<&'static str>, vision: Option<&'static str>) -> RecordBuilder {
        RecordBuilder::new(
            Arc::new(FixedExtractor(ocr)),
            Some(Arc::new(FixedDescriber(vision))),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn both_modalities_are_merged() {
        let record = builder(Some("Login failed"), Some("red error banner"))
            .build(b"image", "login.png")
            .await;

        assert_eq!(record.source_name, "login.png");
        assert_eq!(record.combined_text, "Login failed\nred error banner");
        assert_eq!(record.id, digest_bytes(b"image"));
        assert!(record.embedding.is_none());
    }

    #[tokio::test]
    async fn vision_failure_keeps_ocr_text() {
        let record = builder(Some("Login failed"), None)
            .build(b"image", "login.png")
            .await;

        assert_eq!(record.extracted_text.as_deref(), Some("Login failed"));
        assert!(record.visual_description.is_none());
        assert_eq!(record.combined_text, "Login failed");
    }

    #[tokio::test]
    async fn ocr_failure_keeps_description() {
        let record = builder(None, Some("blue dashboard"))
            .build(b"image", "dash.png")
            .await;

        assert!(record.extracted_text.is_none());
        assert_eq!(record.combined_text, "blue dashboard");
    }

    #[tokio::test]
    async fn both_empty_gives_empty_combined_text() {
        let record = builder(Some(""), Some("")).build(b"image", "blank.png").await;
        assert_eq!(record.combined_text, "");
        assert!(record.missing_parts().contains(&crate::MissingPart::Embedding));
    }

    #[tokio::test]
    async fn slow_describer_is_cut_off() {
        let builder = RecordBuilder::new(
            Arc::new(FixedExtractor(Some("text"))),
            Some(Arc::new(SlowDescriber)),
            Duration::from_millis(20),
        );
        let record = builder.build(b"image", "slow.png").await;
        assert!(record.visual_description.is_none());
        assert_eq!(record.extracted_text.as_deref(), Some("text"));
    }
}
