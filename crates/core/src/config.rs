use crate::error::SearchError;
use crate::models::Confidence;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds every embedding call: each attempt gets `timeout`, retryable
/// failures are retried until `attempts` is spent.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(30),
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub concurrency: usize,
    pub embedding: RetryPolicy,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            embedding: RetryPolicy::default(),
        }
    }
}

/// Score cut-offs for confidence labels: `score >= high` is High,
/// `medium <= score < high` is Medium, anything lower is Low.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: 0.6,
            medium: 0.3,
        }
    }
}

impl ConfidenceThresholds {
    pub fn new(high: f64, medium: f64) -> Result<Self, SearchError> {
        if !high.is_finite() || !medium.is_finite() {
            return Err(SearchError::InvalidThresholds(format!(
                "thresholds must be finite (high={high}, medium={medium})"
            )));
        }
        if medium > high {
            return Err(SearchError::InvalidThresholds(format!(
                "medium {medium} is above high {high}"
            )));
        }
        Ok(Self { high, medium })
    }

    pub fn classify(&self, score: f64) -> Confidence {
        if score >= self.high {
            Confidence::High
        } else if score >= self.medium {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_label_scores() {
        let thresholds = ConfidenceThresholds::default();
        assert_eq!(thresholds.classify(0.6), Confidence::High);
        assert_eq!(thresholds.classify(0.59), Confidence::Medium);
        assert_eq!(thresholds.classify(0.3), Confidence::Medium);
        assert_eq!(thresholds.classify(0.29), Confidence::Low);
        assert_eq!(thresholds.classify(-0.4), Confidence::Low);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        assert!(ConfidenceThresholds::new(0.2, 0.5).is_err());
        assert!(ConfidenceThresholds::new(f64::NAN, 0.1).is_err());
        assert!(ConfidenceThresholds::new(0.5, 0.5).is_ok());
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy {
            attempts: 3,
            timeout: Duration::from_secs(1),
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }
}
