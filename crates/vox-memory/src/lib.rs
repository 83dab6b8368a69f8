//! `vox-memory` – Hybrid conversational memory.
//!
//! Pairs an authoritative SQLite record store with a vector index that acts
//! as an eventually consistent search cache, so an agent can recall what
//! matters across sessions without replaying whole transcripts.
//!
//! # Modules
//!
//! - [`record_store`] – [`RecordStore`]: durable log of messages and memory
//!   nodes on SQLite.
//! - [`semantic_index`] – the [`SemanticIndex`] trait, the filter grammar and
//!   [`InMemoryIndex`].
//! - [`qdrant`] – [`QdrantIndex`][qdrant::QdrantIndex]: the same trait over
//!   Qdrant's REST API.
//! - [`embedder`] – the [`Embedder`] trait with Ollama-backed and hashing
//!   implementations.
//! - [`service`] – [`MemoryService`]: ingestion, promotion, hybrid retrieval
//!   and clearing.
//! - [`context`] – [`ConversationContext`]: recalled memories plus recent
//!   history, rendered for a prompt.

pub mod context;
pub mod embedder;
pub mod qdrant;
pub mod record_store;
pub mod semantic_index;
pub mod service;

pub use context::ConversationContext;
pub use embedder::{EmbedError, Embedder, HashEmbedder, OllamaEmbedder};
pub use qdrant::QdrantIndex;
pub use record_store::{RecordStore, StorageError};
pub use semantic_index::{Distance, Filter, IndexError, InMemoryIndex, SemanticIndex};
pub use service::{
    ClearReport, ClearScope, IndexStatus, MemoryConfig, MemoryError, MemoryService, Promotion,
};
