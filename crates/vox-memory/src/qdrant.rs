//! [`QdrantIndex`] – [`SemanticIndex`] backed by a Qdrant server.
//!
//! Talks to Qdrant's REST API (default `http://localhost:6333`):
//!
//! | operation           | request                                         |
//! |---------------------|-------------------------------------------------|
//! | collection exists?  | `GET  /collections/{name}/exists`               |
//! | (before Qdrant 1.8) | `GET  /collections/{name}`                      |
//! | create collection   | `PUT  /collections/{name}`                      |
//! | payload index       | `PUT  /collections/{name}/index`                |
//! | upsert              | `PUT  /collections/{name}/points?wait=true`     |
//! | query               | `POST /collections/{name}/points/query`         |
//! | delete by filter    | `POST /collections/{name}/points/delete?wait=true` |
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vox_memory::qdrant::QdrantIndex;
//! use vox_memory::semantic_index::{Distance, SemanticIndex};
//!
//! # async fn demo() -> Result<(), vox_memory::semantic_index::IndexError> {
//! let index =
//!     QdrantIndex::new("http://localhost:6333", "memories", None, Duration::from_secs(10))?;
//! // Requires a running Qdrant instance.
//! index.ensure_collection(384, Distance::Cosine).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;
use vox_types::IndexPayload;

use crate::semantic_index::{
    Condition, Distance, Filter, IndexEntry, IndexError, IndexHit, SemanticIndex,
};

/// Payload fields that get a Qdrant payload index on collection creation.
const INDEXED_FIELDS: [(&str, &str); 3] = [
    ("user_id", "keyword"),
    ("session_id", "keyword"),
    ("importance", "float"),
];

// ─────────────────────────────────────────────────────────────────────────────
// Wire helpers
// ─────────────────────────────────────────────────────────────────────────────

fn distance_name(distance: Distance) -> &'static str {
    match distance {
        Distance::Cosine => "Cosine",
        Distance::Dot => "Dot",
        Distance::Euclid => "Euclid",
    }
}

fn condition_to_json(condition: &Condition) -> Value {
    match condition {
        Condition::Match { field, value } => {
            json!({ "key": field.key(), "match": { "value": value } })
        }
        Condition::Range { field, gte } => json!({ "key": field.key(), "range": { "gte": gte } }),
    }
}

/// Render a [`Filter`] in Qdrant's filter syntax. The empty filter becomes
/// `{}`, which Qdrant treats as match-all.
pub(crate) fn filter_to_json(filter: &Filter) -> Value {
    let mut out = serde_json::Map::new();
    if !filter.must.is_empty() {
        out.insert("must".into(), filter.must.iter().map(condition_to_json).collect());
    }
    if !filter.must_not.is_empty() {
        out.insert("must_not".into(), filter.must_not.iter().map(condition_to_json).collect());
    }
    Value::Object(out)
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct ExistsResult {
    exists: bool,
}

#[derive(Deserialize)]
struct QueryResult {
    points: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    payload: Option<Value>,
}

fn hit_from_point(point: ScoredPoint) -> Result<IndexHit, IndexError> {
    let point_id = point
        .id
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| IndexError::BadResponse(format!("point id is not a UUID: {}", point.id)))?;
    let payload = point
        .payload
        .ok_or_else(|| IndexError::BadResponse(format!("point {point_id} has no payload")))?;
    let payload: IndexPayload = serde_json::from_value(payload)
        .map_err(|e| IndexError::BadResponse(format!("point {point_id} payload: {e}")))?;
    Ok(IndexHit { point_id, score: point.score, payload })
}

// ─────────────────────────────────────────────────────────────────────────────
// QdrantIndex
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client for one Qdrant collection.
pub struct QdrantIndex {
    base_url: String,
    collection: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantIndex {
    /// Point at `collection` on the server at `base_url`. `api_key`, when
    /// given, is sent as the `api-key` header. Requests give up after
    /// `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, IndexError> {
        let response = builder.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::CollectionMissing(self.collection.clone()));
        }
        Ok(response.error_for_status()?)
    }

    /// `/exists` arrived in Qdrant 1.8; older servers 404 on the route
    /// itself, so a 404 there falls back to fetching the collection info.
    async fn collection_exists(&self) -> Result<bool, IndexError> {
        let response = self.request(Method::GET, "/exists").send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            let envelope: Envelope<ExistsResult> = response.error_for_status()?.json().await?;
            return Ok(envelope.result.exists);
        }
        debug!(collection = %self.collection, "No /exists route; checking collection info");
        let response = self.request(Method::GET, "").send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }
}

#[async_trait]
impl SemanticIndex for QdrantIndex {
    async fn ensure_collection(
        &self,
        dimension: usize,
        distance: Distance,
    ) -> Result<(), IndexError> {
        if self.collection_exists().await? {
            debug!(collection = %self.collection, "Qdrant collection already exists");
            return Ok(());
        }
        let body = json!({
            "vectors": { "size": dimension, "distance": distance_name(distance) }
        });
        self.send(self.request(Method::PUT, "").json(&body)).await?;
        for (field_name, field_schema) in INDEXED_FIELDS {
            let body = json!({ "field_name": field_name, "field_schema": field_schema });
            self.send(self.request(Method::PUT, "/index?wait=true").json(&body))
                .await?;
        }
        info!(collection = %self.collection, dimension, "Created Qdrant collection");
        Ok(())
    }

    async fn upsert(&self, entry: IndexEntry) -> Result<(), IndexError> {
        let payload = serde_json::to_value(&entry.payload)
            .map_err(|e| IndexError::BadResponse(format!("payload serialisation: {e}")))?;
        let body = json!({
            "points": [{
                "id": entry.point_id.to_string(),
                "vector": entry.vector,
                "payload": payload,
            }]
        });
        self.send(self.request(Method::PUT, "/points?wait=true").json(&body))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        filter.validate()?;
        let body = json!({
            "query": vector,
            "filter": filter_to_json(filter),
            "limit": limit,
            "with_payload": true,
        });
        let envelope: Envelope<QueryResult> = self
            .send(self.request(Method::POST, "/points/query").json(&body))
            .await?
            .json()
            .await?;
        envelope.result.points.into_iter().map(hit_from_point).collect()
    }

    async fn delete_by_filter(&self, filter: &Filter) -> Result<(), IndexError> {
        filter.validate()?;
        let body = json!({ "filter": filter_to_json(filter) });
        self.send(self.request(Method::POST, "/points/delete?wait=true").json(&body))
            .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic_index::PayloadField;
    use vox_types::{MemoryKind, MemoryNode, SUMMARY_PREVIEW_CHARS};

    fn index() -> QdrantIndex {
        QdrantIndex::new(
            "http://localhost:6333/",
            "memories",
            None,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn urls_are_scoped_to_the_collection() {
        let idx = index();
        assert_eq!(
            idx.url("/points/query"),
            "http://localhost:6333/collections/memories/points/query",
        );
        assert_eq!(idx.url(""), "http://localhost:6333/collections/memories");
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let idx = QdrantIndex::new(
            "http://q",
            "c",
            Some(String::new()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(idx.api_key.is_none());
    }

    #[test]
    fn empty_filter_renders_as_empty_object() {
        assert_eq!(filter_to_json(&Filter::new()), json!({}));
    }

    #[test]
    fn cross_session_filter_renders_qdrant_syntax() {
        let filter = Filter::new()
            .must(Condition::matches(PayloadField::UserId, "user_123"))
            .must(Condition::at_least(PayloadField::Importance, 0.5))
            .must_not(Condition::matches(PayloadField::SessionId, "session_B"));
        assert_eq!(
            filter_to_json(&filter),
            json!({
                "must": [
                    { "key": "user_id", "match": { "value": "user_123" } },
                    { "key": "importance", "range": { "gte": 0.5 } }
                ],
                "must_not": [
                    { "key": "session_id", "match": { "value": "session_B" } }
                ]
            })
        );
    }

    #[test]
    fn kind_filter_uses_type_key() {
        let filter = Filter::new().must(Condition::matches(PayloadField::Kind, "preference"));
        assert_eq!(filter_to_json(&filter)["must"][0]["key"], "type");
    }

    #[test]
    fn distance_names_match_qdrant() {
        assert_eq!(distance_name(Distance::Cosine), "Cosine");
        assert_eq!(distance_name(Distance::Dot), "Dot");
        assert_eq!(distance_name(Distance::Euclid), "Euclid");
    }

    #[test]
    fn query_response_parses_into_hits() {
        let node = MemoryNode::new("u1", "s1", MemoryKind::Preference, "likes tea", 0.9, vec![]);
        let payload = IndexPayload::from_node(&node, SUMMARY_PREVIEW_CHARS);
        let point_id = Uuid::new_v4();
        let body = json!({
            "result": {
                "points": [{
                    "id": point_id.to_string(),
                    "version": 3,
                    "score": 0.87,
                    "payload": serde_json::to_value(&payload).unwrap()
                }]
            },
            "status": "ok",
            "time": 0.001
        });
        let envelope: Envelope<QueryResult> = serde_json::from_value(body).unwrap();
        let hits: Vec<IndexHit> = envelope
            .result
            .points
            .into_iter()
            .map(hit_from_point)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point_id, point_id);
        assert_eq!(hits[0].payload, payload);
    }

    #[test]
    fn numeric_point_id_is_a_bad_response() {
        let point = ScoredPoint { id: json!(42), score: 0.1, payload: Some(json!({})) };
        assert!(matches!(hit_from_point(point), Err(IndexError::BadResponse(_))));
    }

    #[test]
    fn missing_payload_is_a_bad_response() {
        let point = ScoredPoint {
            id: json!(Uuid::new_v4().to_string()),
            score: 0.1,
            payload: None,
        };
        assert!(matches!(hit_from_point(point), Err(IndexError::BadResponse(_))));
    }

    #[tokio::test]
    async fn malformed_filter_fails_before_any_request() {
        let idx = index();
        let filter = Filter::new().must(Condition::at_least(PayloadField::UserId, 0.1));
        let err = idx.query(&[1.0], &filter, 1).await.unwrap_err();
        assert!(matches!(err, IndexError::MalformedFilter(_)));
    }

    // ── HTTP status handling ─────────────────────────────────────────────────

    fn index_at(server: &mockito::Server) -> QdrantIndex {
        QdrantIndex::new(server.url(), "memories", None, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn existing_collection_is_not_recreated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/collections/memories/exists")
            .with_status(200)
            .with_body(r#"{"result":{"exists":true},"status":"ok","time":0.0}"#)
            .create_async()
            .await;
        let create = server
            .mock("PUT", "/collections/memories")
            .expect(0)
            .create_async()
            .await;

        index_at(&server).ensure_collection(4, Distance::Cosine).await.unwrap();
        create.assert_async().await;
    }

    #[tokio::test]
    async fn server_without_exists_route_falls_back_to_collection_info() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/collections/memories/exists")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/collections/memories")
            .with_status(200)
            .with_body(r#"{"result":{"status":"green"},"status":"ok","time":0.0}"#)
            .create_async()
            .await;
        let create = server
            .mock("PUT", "/collections/memories")
            .expect(0)
            .create_async()
            .await;

        let idx = index_at(&server);
        assert!(idx.collection_exists().await.unwrap());
        idx.ensure_collection(4, Distance::Cosine).await.unwrap();
        create.assert_async().await;
    }

    #[tokio::test]
    async fn collection_is_absent_when_both_routes_404() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/collections/memories/exists")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/collections/memories")
            .with_status(404)
            .create_async()
            .await;

        assert!(!index_at(&server).collection_exists().await.unwrap());
    }

    #[tokio::test]
    async fn exists_route_server_error_is_not_treated_as_absent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/collections/memories/exists")
            .with_status(500)
            .create_async()
            .await;

        let err = index_at(&server).collection_exists().await.unwrap_err();
        assert!(matches!(err, IndexError::Http(_)));
    }

    #[tokio::test]
    async fn query_404_means_the_collection_is_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/collections/memories/points/query")
            .with_status(404)
            .create_async()
            .await;

        let err = index_at(&server).query(&[1.0], &Filter::new(), 3).await.unwrap_err();
        assert!(matches!(err, IndexError::CollectionMissing(ref name) if name == "memories"));
    }
}
