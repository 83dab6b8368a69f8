//! [`MemoryService`] – ingestion, promotion and hybrid retrieval.
//!
//! Binds the [`RecordStore`] (source of truth) and a [`SemanticIndex`]
//! (eventually consistent cache) into the workflows a conversational agent
//! needs:
//!
//! 1. **Ingest** – [`add_message`][MemoryService::add_message] logs every
//!    turn to the record store.
//! 2. **Promote** – [`promote_memory`][MemoryService::promote_memory] always
//!    writes a [`MemoryNode`]; nodes more important than the promotion
//!    threshold are also embedded and indexed.
//! 3. **Recall** – [`retrieve_context`][MemoryService::retrieve_context]
//!    fuses session-local and cross-session similarity hits, resolved
//!    against the record store.
//!
//! The two writes of a promotion are not atomic. A node may exist before (or
//! without) its index entry, and an index entry may outlive its node; the
//! retrieval path skips the latter silently.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vox_memory::{HashEmbedder, InMemoryIndex, MemoryConfig, MemoryService, RecordStore};
//! use vox_types::{MemoryKind, Role};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let service = MemoryService::new(
//!     Arc::new(RecordStore::open_in_memory().unwrap()),
//!     Arc::new(InMemoryIndex::new("memories")),
//!     Arc::new(HashEmbedder::new(384)),
//!     MemoryConfig::default(),
//! );
//! service.init().await.unwrap();
//!
//! service.add_message("user_123", "session_A", Role::User, "I strictly code in Python").unwrap();
//! service
//!     .promote_memory(
//!         "user_123",
//!         "session_A",
//!         "User prefers Python over Java",
//!         0.9,
//!         MemoryKind::Preference,
//!         &[],
//!     )
//!     .await
//!     .unwrap();
//!
//! let memories = service
//!     .retrieve_context("user_123", "session_B", "write a sorting algorithm in python")
//!     .await
//!     .unwrap();
//! assert_eq!(memories[0].summary, "User prefers Python over Java");
//! # });
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use vox_types::{IndexPayload, MemoryKind, MemoryNode, Message, Role, SUMMARY_PREVIEW_CHARS};

use crate::context::ConversationContext;
use crate::embedder::{EmbedError, Embedder};
use crate::record_store::{RecordStore, StorageError};
use crate::semantic_index::{
    Condition, Distance, Filter, IndexEntry, IndexError, IndexHit, PayloadField, SemanticIndex,
};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Hard failures surfaced to callers of the memory service.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Record store error: {0}")]
    Storage(#[from] StorageError),
    #[error("Semantic index error: {0}")]
    Index(#[from] IndexError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbedError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning knobs for promotion and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Nodes strictly more important than this are indexed.
    pub promotion_threshold: f32,
    /// Minimum importance for a memory to be recalled outside its session.
    pub global_recall_threshold: f32,
    /// Maximum session-local hits per retrieval.
    pub session_recall_limit: usize,
    /// Maximum cross-session hits per retrieval.
    pub global_recall_limit: usize,
    /// Characters of the summary copied into the index payload.
    pub summary_preview_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 0.3,
            global_recall_threshold: 0.7,
            session_recall_limit: 3,
            global_recall_limit: 3,
            summary_preview_chars: SUMMARY_PREVIEW_CHARS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to the index half of a promotion.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexStatus {
    /// Indexed under the given point id.
    Indexed(Uuid),
    /// Importance did not exceed the promotion threshold.
    BelowThreshold,
    /// Embedding or upsert failed; the node exists but is not searchable.
    Failed(String),
}

/// Outcome of [`MemoryService::promote_memory`].
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub memory_id: Uuid,
    pub index: IndexStatus,
}

impl Promotion {
    pub fn is_indexed(&self) -> bool {
        matches!(self.index, IndexStatus::Indexed(_))
    }
}

/// Which memories a [`MemoryService::clear_memories`] call removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    User(String),
    All,
}

/// Outcome of [`MemoryService::clear_memories`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearReport {
    pub scope: ClearScope,
    /// Memory nodes removed from the record store.
    pub memory_nodes_deleted: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryService
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrates the record store, the semantic index and the embedder.
///
/// All collaborators are injected; the caller owns their lifecycle through
/// [`init`][Self::init] and [`shutdown`][Self::shutdown].
pub struct MemoryService {
    records: Arc<RecordStore>,
    index: Arc<dyn SemanticIndex>,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
}

impl MemoryService {
    pub fn new(
        records: Arc<RecordStore>,
        index: Arc<dyn SemanticIndex>,
        embedder: Arc<dyn Embedder>,
        config: MemoryConfig,
    ) -> Self {
        Self { records, index, embedder, config }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Create the index collection sized for the embedder, using cosine
    /// similarity. Safe to call more than once.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), MemoryError> {
        let dimension = self.embedder.dimension();
        self.index.ensure_collection(dimension, Distance::Cosine).await?;
        info!(dimension, "Memory service ready");
        Ok(())
    }

    /// Log one conversational turn and return its id.
    #[instrument(skip(self, content), fields(content_len = content.len()))]
    pub fn add_message(
        &self,
        user_id: &str,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Uuid, MemoryError> {
        let msg = Message::new(user_id, session_id, role, content);
        self.records.insert_message(&msg)?;
        debug!(message_id = %msg.id, "Message stored");
        Ok(msg.id)
    }

    /// Turn a summary into a durable [`MemoryNode`] and, when important
    /// enough, make it searchable.
    ///
    /// Only the record-store write can fail the call. A failure to embed or
    /// index is logged and reported as [`IndexStatus::Failed`].
    #[instrument(skip(self, summary, raw_refs), fields(memory_id = tracing::field::Empty))]
    pub async fn promote_memory(
        &self,
        user_id: &str,
        session_id: &str,
        summary: &str,
        importance: f32,
        kind: MemoryKind,
        raw_refs: &[Uuid],
    ) -> Result<Promotion, MemoryError> {
        let node =
            MemoryNode::new(user_id, session_id, kind, summary, importance, raw_refs.to_vec());
        tracing::Span::current().record("memory_id", tracing::field::display(node.id));
        self.records.insert_memory_node(&node)?;

        if importance <= self.config.promotion_threshold {
            debug!(importance, "Memory stored without indexing");
            return Ok(Promotion { memory_id: node.id, index: IndexStatus::BelowThreshold });
        }

        let index = match self.index_node(&node).await {
            Ok(point_id) => {
                info!(%point_id, importance, "Memory promoted to semantic index");
                IndexStatus::Indexed(point_id)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Memory stored but not indexed; it stays unsearchable until re-indexed"
                );
                IndexStatus::Failed(e.to_string())
            }
        };
        Ok(Promotion { memory_id: node.id, index })
    }

    async fn index_node(&self, node: &MemoryNode) -> Result<Uuid, MemoryError> {
        let vector = self.embedder.embed(&node.summary).await?;
        let entry = IndexEntry::new(
            vector,
            IndexPayload::from_node(node, self.config.summary_preview_chars),
        );
        let point_id = entry.point_id;
        self.index.upsert(entry).await?;
        Ok(point_id)
    }

    /// Recall the memories most relevant to `query` for this user.
    ///
    /// Session-local hits come first, then important memories from other
    /// sessions. Each memory appears once, at its first position. Memories
    /// whose node has vanished from the record store are skipped. Every
    /// returned node has its `last_used_at` advanced.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn retrieve_context(
        &self,
        user_id: &str,
        session_id: &str,
        query: &str,
    ) -> Result<Vec<MemoryNode>, MemoryError> {
        let vector = self.embedder.embed(query).await?;

        let local_filter = Filter::new()
            .must(Condition::matches(PayloadField::UserId, user_id))
            .must(Condition::matches(PayloadField::SessionId, session_id));
        let session_hits = self
            .index
            .query(&vector, &local_filter, self.config.session_recall_limit)
            .await?;

        let global_filter = Filter::new()
            .must(Condition::matches(PayloadField::UserId, user_id))
            .must(Condition::at_least(
                PayloadField::Importance,
                self.config.global_recall_threshold,
            ))
            .must_not(Condition::matches(PayloadField::SessionId, session_id));
        let global_hits = self
            .index
            .query(&vector, &global_filter, self.config.global_recall_limit)
            .await?;

        debug!(
            session_hits = session_hits.len(),
            global_hits = global_hits.len(),
            "Index recall complete"
        );
        self.resolve_hits(session_hits.into_iter().chain(global_hits))
    }

    /// Deduplicate hits by memory id and fetch the full nodes in order.
    fn resolve_hits(
        &self,
        hits: impl Iterator<Item = IndexHit>,
    ) -> Result<Vec<MemoryNode>, MemoryError> {
        let mut seen = HashSet::new();
        let mut memories = Vec::new();
        for hit in hits {
            let memory_id = hit.payload.memory_id;
            if !seen.insert(memory_id) {
                continue;
            }
            let Some(mut node) = self.records.find_memory_node(memory_id)? else {
                debug!(
                    %memory_id,
                    point_id = %hit.point_id,
                    "Index entry has no memory node; skipping"
                );
                continue;
            };
            let used_at = vox_types::now();
            if self.records.update_last_used(memory_id, used_at)? {
                node.last_used_at = used_at;
            }
            memories.push(node);
        }
        Ok(memories)
    }

    /// Rebuild the index entries of every indexable node a user owns.
    ///
    /// Existing entries for each node are dropped first, so the call is
    /// idempotent. Returns the number of nodes indexed.
    #[instrument(skip(self))]
    pub async fn reindex(&self, user_id: &str) -> Result<usize, MemoryError> {
        let mut indexed = 0;
        for node in self.records.list_memory_nodes(user_id)? {
            if node.importance <= self.config.promotion_threshold {
                continue;
            }
            let stale = Filter::new()
                .must(Condition::matches(PayloadField::MemoryId, node.id.to_string()));
            self.index.delete_by_filter(&stale).await?;
            self.index_node(&node).await?;
            indexed += 1;
        }
        info!(indexed, "Reindexed memories");
        Ok(indexed)
    }

    /// The latest `limit` messages of a session, oldest first.
    pub fn get_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, MemoryError> {
        Ok(self.records.list_recent_messages(session_id, limit)?)
    }

    /// Recalled memories plus recent history, ready to be rendered into a
    /// prompt.
    pub async fn assemble_context(
        &self,
        user_id: &str,
        session_id: &str,
        query: &str,
        history_limit: usize,
    ) -> Result<ConversationContext, MemoryError> {
        let memories = self.retrieve_context(user_id, session_id, query).await?;
        let history = self.get_recent_messages(session_id, history_limit)?;
        Ok(ConversationContext { memories, history })
    }

    /// Delete memories from both stores: one user's, or everyone's when
    /// `user_id` is `None`. Messages are kept as an audit trail.
    #[instrument(skip(self))]
    pub async fn clear_memories(
        &self,
        user_id: Option<&str>,
    ) -> Result<ClearReport, MemoryError> {
        let (scope, deleted, filter) = match user_id {
            Some(user_id) => (
                ClearScope::User(user_id.to_string()),
                self.records.delete_memory_nodes_by_user(user_id)?,
                Filter::new().must(Condition::matches(PayloadField::UserId, user_id)),
            ),
            None => {
                warn!("Deleting ALL memories");
                (ClearScope::All, self.records.delete_all_memory_nodes()?, Filter::new())
            }
        };
        if let Err(e) = self.index.delete_by_filter(&filter).await {
            warn!(
                error = %e,
                deleted,
                scope = ?scope,
                "Memory nodes deleted but their index entries remain"
            );
            return Err(e.into());
        }
        info!(deleted, scope = ?scope, "Memories cleared");
        Ok(ClearReport { scope, memory_nodes_deleted: deleted })
    }

    /// Close the record store if this service holds the last handle to it.
    pub fn shutdown(self) -> Result<(), MemoryError> {
        match Arc::try_unwrap(self.records) {
            Ok(records) => records.close()?,
            Err(_) => debug!("Record store still shared; leaving it open"),
        }
        info!("Memory service shut down");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
