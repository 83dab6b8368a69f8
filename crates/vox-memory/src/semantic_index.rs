//! Semantic Index – similarity search over promoted memories.
//!
//! The index is a retrieval accelerator, never a source of truth: every
//! [`IndexEntry`] can be rebuilt from the record store, and losing one only
//! costs searchability.
//!
//! [`SemanticIndex`] is the seam between the memory service and a concrete
//! vector store. Two implementations ship with the crate:
//!
//! * [`InMemoryIndex`] – brute-force scoring inside the process.
//! * [`QdrantIndex`][crate::qdrant::QdrantIndex] – a Qdrant server over HTTP.
//!
//! # Filters
//!
//! A [`Filter`] is a conjunction of `must` conditions and negated `must_not`
//! conditions over the typed [`PayloadField`]s. An empty filter matches every
//! entry.
//!
//! ```rust
//! use vox_memory::semantic_index::{Condition, Filter, PayloadField};
//!
//! let filter = Filter::new()
//!     .must(Condition::matches(PayloadField::UserId, "user_123"))
//!     .must(Condition::at_least(PayloadField::Importance, 0.7))
//!     .must_not(Condition::matches(PayloadField::SessionId, "session_B"));
//! assert_eq!(filter.must.len(), 2);
//! ```

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;
use vox_types::IndexPayload;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from semantic index operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The HTTP request to the index server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Collection does not exist: {0}")]
    CollectionMissing(String),
    #[error("Malformed filter: {0}")]
    MalformedFilter(String),
    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// The index server answered with something we could not interpret.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Entries and hits
// ─────────────────────────────────────────────────────────────────────────────

/// Similarity measure used to rank vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

impl Distance {
    /// Score `a` against `b`; higher is always more similar.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::Cosine => cosine_similarity(a, b),
            Distance::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Distance::Euclid => -a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// The index's copy of a promoted memory.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Point id, independent of the memory node id.
    pub point_id: Uuid,
    pub vector: Vec<f32>,
    pub payload: IndexPayload,
}

impl IndexEntry {
    /// Build an entry with a fresh point id.
    pub fn new(vector: Vec<f32>, payload: IndexPayload) -> Self {
        Self { point_id: Uuid::new_v4(), vector, payload }
    }
}

/// One ranked result of [`SemanticIndex::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub point_id: Uuid,
    pub score: f32,
    pub payload: IndexPayload,
}

// ─────────────────────────────────────────────────────────────────────────────
// Filter grammar
// ─────────────────────────────────────────────────────────────────────────────

/// Payload fields a filter may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadField {
    MemoryId,
    UserId,
    SessionId,
    Kind,
    Importance,
    CreatedAt,
}

impl PayloadField {
    /// Key under which the field is stored in the index payload.
    pub fn key(&self) -> &'static str {
        match self {
            PayloadField::MemoryId => "memory_id",
            PayloadField::UserId => "user_id",
            PayloadField::SessionId => "session_id",
            PayloadField::Kind => "type",
            PayloadField::Importance => "importance",
            PayloadField::CreatedAt => "created_at",
        }
    }

    /// Whether the field holds a number (range-filterable) rather than a
    /// keyword (match-filterable).
    pub fn is_numeric(&self) -> bool {
        matches!(self, PayloadField::Importance)
    }
}

/// A single predicate over one payload field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Exact keyword match.
    Match { field: PayloadField, value: String },
    /// Numeric lower bound (inclusive).
    Range { field: PayloadField, gte: f32 },
}

impl Condition {
    pub fn matches(field: PayloadField, value: impl Into<String>) -> Self {
        Condition::Match { field, value: value.into() }
    }

    pub fn at_least(field: PayloadField, gte: f32) -> Self {
        Condition::Range { field, gte }
    }

    /// Reject conditions whose predicate does not fit the field's type.
    pub fn validate(&self) -> Result<(), IndexError> {
        match self {
            Condition::Match { field, .. } if field.is_numeric() => {
                Err(IndexError::MalformedFilter(format!(
                    "keyword match on numeric field '{}'",
                    field.key()
                )))
            }
            Condition::Range { field, .. } if !field.is_numeric() => Err(
                IndexError::MalformedFilter(format!("range on keyword field '{}'", field.key())),
            ),
            Condition::Range { gte, .. } if !gte.is_finite() => Err(IndexError::MalformedFilter(
                format!("range bound must be finite, got {gte}"),
            )),
            _ => Ok(()),
        }
    }

    fn evaluate(&self, payload: &IndexPayload) -> bool {
        match self {
            Condition::Match { field, value } => match field {
                PayloadField::MemoryId => payload.memory_id.to_string() == *value,
                PayloadField::UserId => payload.user_id == *value,
                PayloadField::SessionId => payload.session_id == *value,
                PayloadField::Kind => payload.kind.as_str() == value.as_str(),
                PayloadField::CreatedAt => value
                    .parse::<chrono::DateTime<chrono::Utc>>()
                    .is_ok_and(|ts| ts == payload.created_at),
                PayloadField::Importance => false,
            },
            Condition::Range { field, gte } => match field {
                PayloadField::Importance => payload.importance >= *gte,
                _ => false,
            },
        }
    }
}

/// Conjunction of `must` conditions and negated `must_not` conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub must: Vec<Condition>,
    pub must_not: Vec<Condition>,
}

impl Filter {
    /// The empty filter; matches every entry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, condition: Condition) -> Self {
        self.must.push(condition);
        self
    }

    pub fn must_not(mut self, condition: Condition) -> Self {
        self.must_not.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        self.must.iter().chain(&self.must_not).try_for_each(Condition::validate)
    }

    /// Evaluate the filter against a payload. Call [`validate`][Self::validate]
    /// first; ill-typed conditions never match.
    pub fn accepts(&self, payload: &IndexPayload) -> bool {
        self.must.iter().all(|c| c.evaluate(payload))
            && !self.must_not.iter().any(|c| c.evaluate(payload))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SemanticIndex trait
// ─────────────────────────────────────────────────────────────────────────────

/// A vector store holding [`IndexEntry`] values with filterable payloads.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Create the collection and its payload indexes. Calling it again is a
    /// no-op.
    async fn ensure_collection(&self, dimension: usize, distance: Distance)
    -> Result<(), IndexError>;

    /// Insert `entry`, replacing any entry with the same point id.
    async fn upsert(&self, entry: IndexEntry) -> Result<(), IndexError>;

    /// Return up to `limit` entries satisfying `filter`, best score first.
    async fn query(
        &self,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError>;

    /// Remove every entry satisfying `filter`.
    async fn delete_by_filter(&self, filter: &Filter) -> Result<(), IndexError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// InMemoryIndex
// ─────────────────────────────────────────────────────────────────────────────

struct Collection {
    dimension: usize,
    distance: Distance,
    /// Insertion order doubles as the tie-break order for equal scores.
    entries: Vec<IndexEntry>,
}

/// Process-local [`SemanticIndex`] with brute-force scoring.
///
/// Nothing is persisted; the contents vanish with the process, which the
/// memory service tolerates because the record store stays authoritative.
#[derive(Default)]
pub struct InMemoryIndex {
    name: String,
    collection: RwLock<Option<Collection>>,
}

impl InMemoryIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), collection: RwLock::new(None) }
    }

    /// Number of stored entries (0 before the collection exists).
    pub async fn len(&self) -> usize {
        self.collection.read().await.as_ref().map_or(0, |c| c.entries.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn missing(&self) -> IndexError {
        IndexError::CollectionMissing(self.name.clone())
    }
}

#[async_trait]
impl SemanticIndex for InMemoryIndex {
    async fn ensure_collection(
        &self,
        dimension: usize,
        distance: Distance,
    ) -> Result<(), IndexError> {
        let mut guard = self.collection.write().await;
        match guard.as_ref() {
            Some(existing) => {
                if existing.dimension != dimension || existing.distance != distance {
                    warn!(
                        collection = %self.name,
                        existing_dimension = existing.dimension,
                        requested_dimension = dimension,
                        "Collection already exists with different parameters; keeping it"
                    );
                }
            }
            None => {
                *guard = Some(Collection { dimension, distance, entries: Vec::new() });
            }
        }
        Ok(())
    }

    async fn upsert(&self, entry: IndexEntry) -> Result<(), IndexError> {
        let mut guard = self.collection.write().await;
        let collection = guard.as_mut().ok_or_else(|| self.missing())?;
        if entry.vector.len() != collection.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: collection.dimension,
                got: entry.vector.len(),
            });
        }
        match collection.entries.iter_mut().find(|e| e.point_id == entry.point_id) {
            Some(slot) => *slot = entry,
            None => collection.entries.push(entry),
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        filter.validate()?;
        let guard = self.collection.read().await;
        let collection = guard.as_ref().ok_or_else(|| self.missing())?;
        if vector.len() != collection.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: collection.dimension,
                got: vector.len(),
            });
        }
        let mut hits: Vec<IndexHit> = collection
            .entries
            .iter()
            .filter(|e| filter.accepts(&e.payload))
            .map(|e| IndexHit {
                point_id: e.point_id,
                score: collection.distance.score(&e.vector, vector),
                payload: e.payload.clone(),
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_filter(&self, filter: &Filter) -> Result<(), IndexError> {
        filter.validate()?;
        let mut guard = self.collection.write().await;
        let collection = guard.as_mut().ok_or_else(|| self.missing())?;
        collection.entries.retain(|e| !filter.accepts(&e.payload));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vox_types::{MemoryKind, MemoryNode, SUMMARY_PREVIEW_CHARS};

    fn entry(user: &str, session: &str, importance: f32, vector: Vec<f32>) -> IndexEntry {
        let node = MemoryNode::new(
            user,
            session,
            MemoryKind::Episodic,
            "summary",
            importance,
            vec![],
        );
        IndexEntry::new(vector, IndexPayload::from_node(&node, SUMMARY_PREVIEW_CHARS))
    }

    async fn ready_index() -> InMemoryIndex {
        let index = InMemoryIndex::new("memories");
        index.ensure_collection(2, Distance::Cosine).await.unwrap();
        index
    }

    // ── cosine_similarity ────────────────────────────────────────────────────

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_returns_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn euclid_score_prefers_closer_vectors() {
        let near = Distance::Euclid.score(&[1.0, 1.0], &[1.0, 0.9]);
        let far = Distance::Euclid.score(&[1.0, 1.0], &[-3.0, 4.0]);
        assert!(near > far);
    }

    // ── filters ──────────────────────────────────────────────────────────────

    #[test]
    fn empty_filter_accepts_everything() {
        let e = entry("u1", "s1", 0.5, vec![1.0, 0.0]);
        assert!(Filter::new().is_empty());
        assert!(Filter::new().accepts(&e.payload));
    }

    #[test]
    fn must_and_must_not_combine() {
        let e = entry("u1", "s1", 0.8, vec![1.0, 0.0]);
        let cross_session = Filter::new()
            .must(Condition::matches(PayloadField::UserId, "u1"))
            .must(Condition::at_least(PayloadField::Importance, 0.7))
            .must_not(Condition::matches(PayloadField::SessionId, "s2"));
        assert!(cross_session.accepts(&e.payload));

        let excludes_own_session = cross_session
            .clone()
            .must_not(Condition::matches(PayloadField::SessionId, "s1"));
        assert!(!excludes_own_session.accepts(&e.payload));
    }

    #[test]
    fn range_bound_is_inclusive() {
        let e = entry("u1", "s1", 0.7, vec![1.0, 0.0]);
        let filter = Filter::new().must(Condition::at_least(PayloadField::Importance, 0.7));
        assert!(filter.accepts(&e.payload));
    }

    #[test]
    fn kind_and_memory_id_match() {
        let e = entry("u1", "s1", 0.5, vec![1.0, 0.0]);
        let filter = Filter::new()
            .must(Condition::matches(PayloadField::Kind, "episodic"))
            .must(Condition::matches(PayloadField::MemoryId, e.payload.memory_id.to_string()));
        assert!(filter.accepts(&e.payload));
    }

    #[test]
    fn range_on_keyword_field_is_malformed() {
        let filter = Filter::new().must(Condition::at_least(PayloadField::UserId, 0.5));
        assert!(matches!(filter.validate(), Err(IndexError::MalformedFilter(_))));
    }

    #[test]
    fn match_on_numeric_field_is_malformed() {
        let filter = Filter::new().must_not(Condition::matches(PayloadField::Importance, "0.5"));
        assert!(matches!(filter.validate(), Err(IndexError::MalformedFilter(_))));
    }

    // ── InMemoryIndex ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn query_ranks_by_similarity() {
        let index = ready_index().await;
        let far = entry("u1", "s1", 0.5, vec![0.0, 1.0]);
        let near = entry("u1", "s1", 0.5, vec![1.0, 0.1]);
        index.upsert(far.clone()).await.unwrap();
        index.upsert(near.clone()).await.unwrap();

        let hits = index.query(&[1.0, 0.0], &Filter::new(), 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].point_id, near.point_id);
        assert_eq!(hits[1].point_id, far.point_id);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn query_respects_limit_and_filter() {
        let index = ready_index().await;
        for _ in 0..4 {
            index.upsert(entry("u1", "s1", 0.5, vec![1.0, 0.0])).await.unwrap();
        }
        index.upsert(entry("u2", "s1", 0.5, vec![1.0, 0.0])).await.unwrap();

        let only_u2 = Filter::new().must(Condition::matches(PayloadField::UserId, "u2"));
        assert_eq!(index.query(&[1.0, 0.0], &only_u2, 10).await.unwrap().len(), 1);
        assert_eq!(index.query(&[1.0, 0.0], &Filter::new(), 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() {
        let index = ready_index().await;
        let first = entry("u1", "s1", 0.5, vec![1.0, 0.0]);
        let second = entry("u1", "s1", 0.5, vec![2.0, 0.0]);
        index.upsert(first.clone()).await.unwrap();
        index.upsert(second.clone()).await.unwrap();

        let hits = index.query(&[1.0, 0.0], &Filter::new(), 2).await.unwrap();
        assert_eq!(hits[0].point_id, first.point_id);
        assert_eq!(hits[1].point_id, second.point_id);
    }

    #[tokio::test]
    async fn no_match_returns_empty() {
        let index = ready_index().await;
        index.upsert(entry("u1", "s1", 0.5, vec![1.0, 0.0])).await.unwrap();
        let filter = Filter::new().must(Condition::matches(PayloadField::UserId, "nobody"));
        assert!(index.query(&[1.0, 0.0], &filter, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_same_point_id() {
        let index = ready_index().await;
        let mut e = entry("u1", "s1", 0.5, vec![1.0, 0.0]);
        index.upsert(e.clone()).await.unwrap();
        e.vector = vec![0.0, 1.0];
        index.upsert(e.clone()).await.unwrap();

        assert_eq!(index.len().await, 1);
        let hits = index.query(&[0.0, 1.0], &Filter::new(), 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent() {
        let index = ready_index().await;
        index.upsert(entry("u1", "s1", 0.5, vec![1.0, 0.0])).await.unwrap();
        index.ensure_collection(2, Distance::Cosine).await.unwrap();
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn operations_before_ensure_collection_fail() {
        let index = InMemoryIndex::new("memories");
        let err = index.query(&[1.0, 0.0], &Filter::new(), 1).await.unwrap_err();
        assert!(matches!(err, IndexError::CollectionMissing(name) if name == "memories"));
        let err = index.upsert(entry("u1", "s1", 0.5, vec![1.0, 0.0])).await.unwrap_err();
        assert!(matches!(err, IndexError::CollectionMissing(_)));
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let index = ready_index().await;
        let err = index.upsert(entry("u1", "s1", 0.5, vec![1.0, 0.0, 0.0])).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, got: 3 }));
        let err = index.query(&[1.0], &Filter::new(), 1).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, got: 1 }));
    }

    #[tokio::test]
    async fn delete_by_filter_scopes_and_empty_filter_wipes() {
        let index = ready_index().await;
        index.upsert(entry("u1", "s1", 0.5, vec![1.0, 0.0])).await.unwrap();
        index.upsert(entry("u1", "s2", 0.5, vec![1.0, 0.0])).await.unwrap();
        index.upsert(entry("u2", "s1", 0.5, vec![1.0, 0.0])).await.unwrap();

        let u1 = Filter::new().must(Condition::matches(PayloadField::UserId, "u1"));
        index.delete_by_filter(&u1).await.unwrap();
        assert_eq!(index.len().await, 1);

        index.delete_by_filter(&Filter::new()).await.unwrap();
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_filter_is_rejected_by_query() {
        let index = ready_index().await;
        let filter = Filter::new().must(Condition::at_least(PayloadField::SessionId, 0.1));
        let err = index.query(&[1.0, 0.0], &filter, 1).await.unwrap_err();
        assert!(matches!(err, IndexError::MalformedFilter(_)));
    }
}
