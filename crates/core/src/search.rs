use crate::config::{ConfidenceThresholds, RetryPolicy};
use crate::embeddings::{embed_with_retry, is_zero_vector, Embedder};
use crate::store::Store;
use crate::{QueryResult, ScreenshotRecord, SearchError, SearchQuery};
use std::sync::Arc;
use tracing::{debug, warn};

/// Embeds the query and ranks a snapshot of the store against it. Holds no
/// state between queries.
#[derive(Clone)]
pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    store: Store,
    retry: RetryPolicy,
}

impl SearchEngine {
    pub fn new(embedder: Arc<dyn Embedder>, store: Store) -> Self {
        Self {
            embedder,
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn try_search(&self, query: &SearchQuery) -> Result<Vec<QueryResult>, SearchError> {
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector =
            embed_with_retry(self.embedder.as_ref(), &query.text, &self.retry).await?;
        if is_zero_vector(&query_vector) {
            debug!(query = %query.text, "empty query vector, nothing to match");
            return Ok(Vec::new());
        }

        let thresholds = query
            .thresholds
            .unwrap_or_else(|| self.embedder.default_thresholds());
        let snapshot = self.store.get_all().await?;
        Ok(rank(&query_vector, snapshot, query.top_k, &thresholds))
    }

    /// Like [`SearchEngine::try_search`], but failures come back as an empty
    /// result after being logged.
    pub async fn search(&self, query: &SearchQuery) -> Vec<QueryResult> {
        match self.try_search(query).await {
            Ok(results) => results,
            Err(error) => {
                warn!(query = %query.text, error = %error, "search failed");
                Vec::new()
            }
        }
    }
}

/// Cosine similarity; 0 when either side has zero magnitude or the lengths differ.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() {
        return 0.0;
    }

    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }

    (dot / (left_norm.sqrt() * right_norm.sqrt())).clamp(-1.0, 1.0)
}

/// Scores every record with a usable embedding, orders by score, newest
/// first on ties (then id), and keeps `top_k`.
pub fn rank(
    query_vector: &[f32],
    records: Vec<ScreenshotRecord>,
    top_k: usize,
    thresholds: &ConfidenceThresholds,
) -> Vec<QueryResult> {
    let mut scored: Vec<(f64, ScreenshotRecord)> = records
        .into_iter()
        .filter_map(|record| {
            let score = cosine_similarity(
                query_vector,
                record.rankable_embedding(query_vector.len())?,
            );
            Some((score, record))
        })
        .collect();

    scored.sort_by(|(left_score, left), (right_score, right)| {
        right_score
            .total_cmp(left_score)
            .then_with(|| right.created_at.cmp(&left.created_at))
            .then_with(|| left.id.cmp(&right.id))
    });

    scored
        .into_iter()
        .take(top_k)
        .map(|(score, record)| QueryResult {
            record,
            score,
            confidence: thresholds.classify(score),
        })
        .collect()
}
