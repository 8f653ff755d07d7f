use crate::config::ConfidenceThresholds;
use crate::error::StoreError;
use crate::text::combine_texts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One processed screenshot. `None` in a text field means that modality
/// failed; `Some("")` means it ran and found nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRecord {
    pub id: String,
    pub source_name: String,
    #[serde(default)]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub visual_description: Option<String>,
    pub combined_text: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl ScreenshotRecord {
    pub fn new(
        id: impl Into<String>,
        source_name: impl Into<String>,
        extracted_text: Option<String>,
        visual_description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let combined_text = combine_texts(extracted_text.as_deref(), visual_description.as_deref());
        Self {
            id: id.into(),
            source_name: source_name.into(),
            extracted_text,
            visual_description,
            combined_text,
            embedding: None,
            created_at,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn missing_parts(&self) -> Vec<MissingPart> {
        let mut missing = Vec::new();
        if self.extracted_text.is_none() {
            missing.push(MissingPart::ExtractedText);
        }
        if self.visual_description.is_none() {
            missing.push(MissingPart::VisualDescription);
        }
        if self.embedding.is_none() {
            missing.push(MissingPart::Embedding);
        }
        missing
    }

    /// Embedding usable for ranking: present, of the expected length and non-zero.
    pub fn rankable_embedding(&self, dimensions: usize) -> Option<&[f32]> {
        self.embedding
            .as_deref()
            .filter(|vector| vector.len() == dimensions)
            .filter(|vector| vector.iter().any(|value| *value != 0.0))
    }

    pub fn validate(&self, dimensions: usize) -> Result<(), StoreError> {
        let invalid = |reason: String| StoreError::InvalidRecord {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id is empty".to_string()));
        }

        let derived = combine_texts(
            self.extracted_text.as_deref(),
            self.visual_description.as_deref(),
        );
        if derived != self.combined_text {
            return Err(invalid(
                "combined text does not match extracted text and visual description".to_string(),
            ));
        }

        if let Some(embedding) = &self.embedding {
            if embedding.len() != dimensions {
                return Err(invalid(format!(
                    "embedding dimension {} != {}",
                    embedding.len(),
                    dimensions
                )));
            }
            if embedding.iter().any(|value| !value.is_finite()) {
                return Err(invalid("embedding contains non-finite values".to_string()));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissingPart {
    ExtractedText,
    VisualDescription,
    Embedding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub record: ScreenshotRecord,
    /// Cosine similarity in [-1, 1].
    pub score: f64,
    pub confidence: Confidence,
}

impl QueryResult {
    pub fn display_score(&self) -> f64 {
        self.score.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    /// `None` uses the embedder's own cut-offs.
    pub thresholds: Option<ConfidenceThresholds>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            thresholds: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: ConfidenceThresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }
}

/// Raw image handed to the pipeline.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub source_name: String,
    pub bytes: Vec<u8>,
}

impl ImageInput {
    pub fn new(source_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            source_name: source_name.into(),
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ScreenshotRecord {
        ScreenshotRecord::new(
            "abc",
            "login.png",
            Some("Login failed".to_string()),
            Some("red banner".to_string()),
            Utc::now(),
        )
    }

    #[test]
    fn combined_text_is_derived_from_sources() {
        let record = record();
        assert_eq!(record.combined_text, "Login failed\nred banner");
        assert!(record.validate(3).is_ok());
    }

    #[test]
    fn edited_combined_text_is_invalid() {
        let mut record = record();
        record.combined_text.push_str(" extra");
        assert!(matches!(
            record.validate(3),
            Err(StoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn mismatched_embedding_length_is_invalid() {
        let record = record().with_embedding(vec![0.5, 0.5]);
        assert!(record.validate(3).is_err());
        assert!(record.validate(2).is_ok());
    }

    #[test]
    fn zero_embedding_is_not_rankable() {
        let zero = record().with_embedding(vec![0.0; 3]);
        assert!(zero.rankable_embedding(3).is_none());

        let real = record().with_embedding(vec![0.0, 1.0, 0.0]);
        assert!(real.rankable_embedding(3).is_some());
        assert!(real.rankable_embedding(4).is_none());
    }

    #[test]
    fn serializes_with_camel_case_schema() -> Result<(), Box<dyn std::error::Error>> {
        let value = serde_json::to_value(record().with_embedding(vec![1.0, 0.0, 0.0]))?;
        for field in [
            "id",
            "sourceName",
            "extractedText",
            "visualDescription",
            "combinedText",
            "embedding",
            "createdAt",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        Ok(())
    }

    #[test]
    fn missing_parts_reflect_failed_modalities() {
        let record = ScreenshotRecord::new("x", "x.png", None, Some("chart".into()), Utc::now());
        assert_eq!(
            record.missing_parts(),
            vec![MissingPart::ExtractedText, MissingPart::Embedding]
        );
    }
}
