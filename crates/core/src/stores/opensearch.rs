use crate::traits::{BackendKind, RecordStore, RemoteBackend};
use crate::{ScreenshotRecord, StoreError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;
use url::Url;

const BACKEND: &str = "opensearch";
const PAGE_SIZE: usize = 500;

/// Remote document store over the OpenSearch REST API. Writes use the
/// record id as document id, so a second `put` overwrites the first.
pub struct OpenSearchStore {
    client: Client,
    endpoint: String,
    index_name: String,
    dimensions: usize,
}

impl OpenSearchStore {
    pub fn new(
        endpoint: impl Into<String>,
        index_name: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        let parsed = Url::parse(&endpoint)
            .map_err(|error| connect_error(format!("{endpoint}: {error}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(connect_error(format!("unsupported scheme in {endpoint}")));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| connect_error(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index_name: index_name.into(),
            dimensions,
        })
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.index_name)
    }

    fn mapping(&self) -> Value {
        json!({
            "settings": {
                "number_of_shards": 1,
                "number_of_replicas": 0
            },
            "mappings": {
                "_meta": {"dimensions": self.dimensions},
                "properties": {
                    "id": {"type": "keyword"},
                    "sourceName": {"type": "keyword"},
                    "extractedText": {"type": "text"},
                    "visualDescription": {"type": "text"},
                    "combinedText": {"type": "text"},
                    "embedding": {"type": "float", "index": false},
                    "createdAt": {"type": "date"}
                }
            }
        })
    }

    /// An existing index must have been created for the same embedding size.
    async fn check_dimensions(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(format!("{}/_mapping", self.index_url()))
            .send()
            .await
            .map_err(|error| connect_error(error.to_string()))?;

        if !response.status().is_success() {
            return Err(connect_error(format!(
                "mapping lookup failed with {}",
                response.status()
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| connect_error(error.to_string()))?;

        // keyed by the concrete index name, which differs when we were given an alias
        let stored = parsed
            .as_object()
            .and_then(|indices| {
                indices
                    .get(&self.index_name)
                    .or_else(|| indices.values().next())
            })
            .and_then(|index| index.pointer("/mappings/_meta/dimensions"))
            .and_then(Value::as_u64);

        match stored {
            Some(found) if found as usize != self.dimensions => {
                Err(StoreError::DimensionMismatch {
                    backend: format!("{BACKEND} index {}", self.index_name),
                    expected: self.dimensions,
                    found: found as usize,
                })
            }
            Some(_) => Ok(()),
            None => {
                warn!(index = %self.index_name, "index mapping has no dimensions metadata");
                Ok(())
            }
        }
    }

    async fn search_page(&self, search_after: Option<&Value>) -> Result<Vec<Value>, StoreError> {
        let mut body = json!({
            "size": PAGE_SIZE,
            "query": {"match_all": {}},
            "sort": [{"createdAt": "desc"}, {"id": "asc"}]
        });
        if let Some(cursor) = search_after {
            body["search_after"] = cursor.clone();
        }

        let response = self
            .client
            .post(format!("{}/_search", self.index_url()))
            .json(&body)
            .send()
            .await
            .map_err(|error| read_error(error.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error(response.status().to_string()));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| read_error(error.to_string()))?;

        Ok(parsed
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

fn connect_error(details: String) -> StoreError {
    StoreError::Connect {
        backend: BACKEND.to_string(),
        details,
    }
}

fn write_error(details: String) -> StoreError {
    StoreError::Write {
        backend: BACKEND.to_string(),
        details,
    }
}

fn read_error(details: String) -> StoreError {
    StoreError::Read {
        backend: BACKEND.to_string(),
        details,
    }
}

fn hit_to_record(hit: &Value) -> Result<ScreenshotRecord, StoreError> {
    let source = hit
        .pointer("/_source")
        .cloned()
        .ok_or_else(|| read_error("hit without _source".to_string()))?;
    Ok(serde_json::from_value(source)?)
}

#[async_trait]
impl RemoteBackend for OpenSearchStore {
    async fn connect(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .head(self.index_url())
            .send()
            .await
            .map_err(|error| connect_error(error.to_string()))?;

        if response.status() == StatusCode::OK {
            return self.check_dimensions().await;
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(connect_error(response.status().to_string()));
        }

        let response = self
            .client
            .put(self.index_url())
            .json(&self.mapping())
            .send()
            .await
            .map_err(|error| connect_error(error.to_string()))?;

        if !response.status().is_success() {
            return Err(connect_error(format!(
                "index setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl RecordStore for OpenSearchStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn name(&self) -> &str {
        BACKEND
    }

    async fn put(&self, record: ScreenshotRecord) -> Result<(), StoreError> {
        let response = self
            .client
            .put(format!("{}/_doc/{}", self.index_url(), record.id))
            .query(&[("refresh", "wait_for")])
            .json(&record)
            .send()
            .await
            .map_err(|error| write_error(error.to_string()))?;

        if !response.status().is_success() {
            return Err(write_error(format!("{} for {}", response.status(), record.id)));
        }

        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<ScreenshotRecord>, StoreError> {
        let mut records = Vec::new();
        let mut cursor: Option<Value> = None;

        loop {
            let hits = self.search_page(cursor.as_ref()).await?;
            for hit in &hits {
                records.push(hit_to_record(hit)?);
            }

            if hits.len() < PAGE_SIZE {
                break;
            }
            cursor = hits.last().and_then(|hit| hit.pointer("/sort")).cloned();
            if cursor.is_none() {
                break;
            }
        }

        Ok(records)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let response = self
            .client
            .delete(format!("{}/_doc/{}", self.index_url(), id))
            .query(&[("refresh", "wait_for")])
            .send()
            .await
            .map_err(|error| write_error(error.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(write_error(format!("{status} deleting {id}"))),
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/_delete_by_query", self.index_url()))
            .query(&[("refresh", "true")])
            .json(&json!({"query": {"match_all": {}}}))
            .send()
            .await
            .map_err(|error| write_error(error.to_string()))?;

        if !response.status().is_success() {
            return Err(write_error(response.status().to_string()));
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let response = self
            .client
            .get(format!("{}/_count", self.index_url()))
            .send()
            .await
            .map_err(|error| read_error(error.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error(response.status().to_string()));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| read_error(error.to_string()))?;

        parsed
            .pointer("/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| read_error("count missing from response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::LocalStore;
    use crate::Store;
    use axum::extract::{Path, State};
    use axum::routing::{get, head, post, put};
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use std::cmp::Ordering;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// In-memory stand-in for one OpenSearch index, served over HTTP.
    #[derive(Default)]
    struct FakeIndex {
        exists: bool,
        dimensions: Option<usize>,
        docs: BTreeMap<String, Value>,
        search_bodies: Vec<Value>,
    }

    type Shared = Arc<Mutex<FakeIndex>>;

    async fn index_exists(State(state): State<Shared>) -> StatusCode {
        if state.lock().await.exists {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        }
    }

    async fn create_index(State(state): State<Shared>, Json(body): Json<Value>) -> StatusCode {
        let mut index = state.lock().await;
        index.exists = true;
        index.dimensions = body
            .pointer("/mappings/_meta/dimensions")
            .and_then(Value::as_u64)
            .map(|dimensions| dimensions as usize);
        StatusCode::OK
    }

    async fn get_mapping(Path(name): Path<String>, State(state): State<Shared>) -> Json<Value> {
        let index = state.lock().await;
        let mut mappings = json!({"properties": {}});
        if let Some(dimensions) = index.dimensions {
            mappings["_meta"] = json!({"dimensions": dimensions});
        }
        let mut body = serde_json::Map::new();
        body.insert(name, json!({"mappings": mappings}));
        Json(Value::Object(body))
    }

    async fn put_doc(
        Path((_, id)): Path<(String, String)>,
        State(state): State<Shared>,
        Json(doc): Json<Value>,
    ) -> StatusCode {
        match state.lock().await.docs.insert(id, doc) {
            Some(_) => StatusCode::OK,
            None => StatusCode::CREATED,
        }
    }

    async fn delete_doc(
        Path((_, id)): Path<(String, String)>,
        State(state): State<Shared>,
    ) -> StatusCode {
        match state.lock().await.docs.remove(&id) {
            Some(_) => StatusCode::OK,
            None => StatusCode::NOT_FOUND,
        }
    }

    fn sort_key(doc: &Value) -> (String, String) {
        let field = |name: &str| doc[name].as_str().unwrap_or_default().to_string();
        (field("createdAt"), field("id"))
    }

    /// createdAt desc, then id asc.
    fn hit_order(left: &(String, String), right: &(String, String)) -> Ordering {
        right.0.cmp(&left.0).then_with(|| left.1.cmp(&right.1))
    }

    async fn search(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
        let mut index = state.lock().await;
        index.search_bodies.push(body.clone());

        let size = body["size"].as_u64().unwrap_or(10) as usize;
        let cursor = body["search_after"].as_array().map(|values| {
            let text = |position: usize| {
                values
                    .get(position)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            (text(0), text(1))
        });

        let mut keyed: Vec<((String, String), &Value)> =
            index.docs.values().map(|doc| (sort_key(doc), doc)).collect();
        keyed.sort_by(|(left, _), (right, _)| hit_order(left, right));

        let hits: Vec<Value> = keyed
            .into_iter()
            .filter(|(key, _)| {
                cursor
                    .as_ref()
                    .map_or(true, |cursor| hit_order(key, cursor) == Ordering::Greater)
            })
            .take(size)
            .map(|(key, doc)| json!({"_id": key.1, "_source": doc, "sort": [key.0, key.1]}))
            .collect();

        Json(json!({"hits": {"hits": hits}}))
    }

    async fn delete_by_query(State(state): State<Shared>) -> Json<Value> {
        let mut index = state.lock().await;
        let deleted = index.docs.len();
        index.docs.clear();
        Json(json!({"deleted": deleted}))
    }

    async fn count(State(state): State<Shared>) -> Json<Value> {
        Json(json!({"count": state.lock().await.docs.len()}))
    }

    async fn serve(
        index: FakeIndex,
    ) -> Result<(OpenSearchStore, Shared), Box<dyn std::error::Error>> {
        let state: Shared = Arc::new(Mutex::new(index));
        let app = Router::new()
            .route("/:index", head(index_exists).put(create_index))
            .route("/:index/_mapping", get(get_mapping))
            .route("/:index/_doc/:id", put(put_doc).delete(delete_doc))
            .route("/:index/_search", post(search))
            .route("/:index/_delete_by_query", post(delete_by_query))
            .route("/:index/_count", get(count))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let _server = tokio::spawn(async move { axum::serve(listener, app).await });

        let store = OpenSearchStore::new(
            format!("http://{address}"),
            "screenshots",
            2,
            Duration::from_secs(5),
        )?;
        Ok((store, state))
    }

    fn record(id: &str, text: &str, seconds: i64) -> ScreenshotRecord {
        let created_at = Utc
            .timestamp_opt(1_700_000_000 + seconds, 0)
            .single()
            .unwrap_or_else(Utc::now);
        ScreenshotRecord::new(id, format!("{id}.png"), Some(text.to_string()), None, created_at)
            .with_embedding(vec![1.0, 0.0])
    }

    #[test]
    fn invalid_endpoint_is_a_connect_error() {
        let result = OpenSearchStore::new("not a url", "screenshots", 4, Duration::from_secs(1));
        assert!(matches!(result, Err(StoreError::Connect { .. })));

        let result = OpenSearchStore::new("ftp://host", "screenshots", 4, Duration::from_secs(1));
        assert!(matches!(result, Err(StoreError::Connect { .. })));
    }

    #[test]
    fn trailing_slash_is_trimmed() -> Result<(), StoreError> {
        let store = OpenSearchStore::new(
            "http://localhost:9200/",
            "screenshots",
            4,
            Duration::from_secs(1),
        )?;
        assert_eq!(store.index_url(), "http://localhost:9200/screenshots");
        Ok(())
    }

    #[test]
    fn hits_decode_into_records() -> Result<(), StoreError> {
        let hit = json!({
            "_id": "abc",
            "_source": {
                "id": "abc",
                "sourceName": "login.png",
                "extractedText": "Login failed",
                "visualDescription": null,
                "combinedText": "Login failed",
                "embedding": [0.0, 1.0],
                "createdAt": "2024-05-01T10:00:00Z"
            },
            "sort": [1714557600000u64, "abc"]
        });

        let record = hit_to_record(&hit)?;
        assert_eq!(record.id, "abc");
        assert!(record.visual_description.is_none());
        assert_eq!(record.embedding, Some(vec![0.0, 1.0]));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_to_connect() -> Result<(), StoreError> {
        let store = OpenSearchStore::new(
            "http://127.0.0.1:1",
            "screenshots",
            4,
            Duration::from_secs(2),
        )?;
        assert!(matches!(
            store.connect().await,
            Err(StoreError::Connect { .. })
        ));
        Ok(())
    }
    #[tokio::test]
    async fn connect_creates_missing_index() -> TestResult {
        let (store, state) = serve(FakeIndex::default()).await?;
        store.connect().await?;

        let index = state.lock().await;
        assert!(index.exists);
        assert_eq!(index.dimensions, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn connect_accepts_index_with_same_dimensions() -> TestResult {
        let (store, _) = serve(FakeIndex {
            exists: true,
            dimensions: Some(2),
            ..FakeIndex::default()
        })
        .await?;
        store.connect().await?;
        Ok(())
    }

    #[tokio::test]
    async fn index_from_another_embedder_is_refused() -> TestResult {
        let (store, _) = serve(FakeIndex {
            exists: true,
            dimensions: Some(384),
            ..FakeIndex::default()
        })
        .await?;

        assert!(matches!(
            store.connect().await,
            Err(StoreError::DimensionMismatch {
                expected: 2,
                found: 384,
                ..
            })
        ));

        let selected =
            Store::select(Some(store), || async { Ok(LocalStore::in_memory()) }, 2).await?;
        assert_eq!(selected.kind(), BackendKind::Local);
        Ok(())
    }

    #[tokio::test]
    async fn put_with_same_id_overwrites() -> TestResult {
        let (store, _) = serve(FakeIndex::default()).await?;
        store.connect().await?;

        store.put(record("a", "first", 0)).await?;
        store.put(record("a", "second", 5)).await?;

        assert_eq!(store.count().await?, 1);
        let all = store.get_all().await?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].extracted_text.as_deref(), Some("second"));
        Ok(())
    }

    #[tokio::test]
    async fn get_all_follows_search_after_across_pages() -> TestResult {
        let mut docs = BTreeMap::new();
        for index in 0..=PAGE_SIZE {
            let id = format!("r{index:04}");
            let doc = serde_json::to_value(record(&id, "text", index as i64))?;
            docs.insert(id, doc);
        }
        let (store, state) = serve(FakeIndex {
            exists: true,
            dimensions: Some(2),
            docs,
            ..FakeIndex::default()
        })
        .await?;

        let all = store.get_all().await?;
        assert_eq!(all.len(), PAGE_SIZE + 1);
        assert_eq!(all[0].id, format!("r{PAGE_SIZE:04}"));
        assert_eq!(all[PAGE_SIZE].id, "r0000");

        let index = state.lock().await;
        assert_eq!(index.search_bodies.len(), 2);
        assert!(index.search_bodies[0].get("search_after").is_none());
        assert_eq!(index.search_bodies[1]["search_after"][1], json!("r0001"));
        Ok(())
    }

    #[tokio::test]
    async fn delete_reports_missing_ids_and_clear_empties() -> TestResult {
        let (store, _) = serve(FakeIndex::default()).await?;
        store.connect().await?;

        store.put(record("a", "login", 0)).await?;
        store.put(record("b", "dashboard", 1)).await?;
        assert!(store.delete("a").await?);
        assert!(!store.delete("a").await?);
        assert_eq!(store.count().await?, 1);

        store.clear().await?;
        assert_eq!(store.count().await?, 0);
        assert!(store.get_all().await?.is_empty());
        Ok(())
    }
}
