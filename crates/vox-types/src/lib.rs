//! Shared data model for the Vox memory subsystem.
//!
//! Every crate in the workspace speaks in terms of these types: the record
//! store persists [`Message`] and [`MemoryNode`] values, and the semantic
//! index carries an [`IndexPayload`] next to each vector.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Number of summary characters copied into an [`IndexPayload`].
pub const SUMMARY_PREVIEW_CHARS: usize = 100;

/// Current UTC time truncated to microseconds.
///
/// Storage keeps microsecond precision, so every timestamp the workspace
/// creates goes through here to survive a round-trip unchanged.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Returned when a string does not name a known enum variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Role
// ─────────────────────────────────────────────────────────────────────────────

/// Who produced a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(UnknownVariant { kind: "role", value: other.to_string() }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryKind
// ─────────────────────────────────────────────────────────────────────────────

/// Category of a promoted memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Something that happened in a conversation.
    #[default]
    Episodic,
    /// A fact about the world or the user.
    Semantic,
    /// A stated like, dislike or habit of the user.
    Preference,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Preference => "preference",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(MemoryKind::Episodic),
            "semantic" => Ok(MemoryKind::Semantic),
            "preference" => Ok(MemoryKind::Preference),
            other => Err(UnknownVariant { kind: "memory kind", value: other.to_string() }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// A single conversational turn. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Construct a message with a fresh id stamped with the current time.
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            role,
            content: content.into(),
            created_at: now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryNode
// ─────────────────────────────────────────────────────────────────────────────

/// A durable summary derived from one or more messages.
///
/// `importance` is supplied by whoever promotes the memory and is never
/// recomputed. `last_used_at` only moves forward, once per retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: Uuid,
    pub user_id: String,
    /// Session the memory was learned in.
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub summary: String,
    /// Source message ids, in the order given at promotion.
    pub raw_refs: Vec<Uuid>,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl MemoryNode {
    /// Construct a node with a fresh id. Both timestamps start at now.
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        kind: MemoryKind,
        summary: impl Into<String>,
        importance: f32,
        raw_refs: Vec<Uuid>,
    ) -> Self {
        let timestamp = now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            kind,
            summary: summary.into(),
            raw_refs,
            importance,
            created_at: timestamp,
            last_used_at: timestamp,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Index payload
// ─────────────────────────────────────────────────────────────────────────────

/// Filterable metadata stored next to each vector in the semantic index.
///
/// `memory_id` is a non-owning back-reference to [`MemoryNode::id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPayload {
    pub memory_id: Uuid,
    pub user_id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub summary_preview: String,
}

impl IndexPayload {
    /// Derive the payload for `node`, keeping at most `preview_chars`
    /// characters of its summary.
    pub fn from_node(node: &MemoryNode, preview_chars: usize) -> Self {
        Self {
            memory_id: node.id,
            user_id: node.user_id.clone(),
            session_id: node.session_id.clone(),
            kind: node.kind,
            importance: node.importance,
            created_at: node.created_at,
            summary_preview: node.summary.chars().take(preview_chars).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_and_displays_lowercase() {
        for role in [Role::User, Role::Assistant, Role::System] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        let err = "robot".parse::<Role>().unwrap_err();
        assert!(err.to_string().contains("robot"));
    }

    #[test]
    fn memory_kind_defaults_to_episodic() {
        assert_eq!(MemoryKind::default(), MemoryKind::Episodic);
        assert_eq!("preference".parse::<MemoryKind>().unwrap(), MemoryKind::Preference);
        assert!("Preference".parse::<MemoryKind>().is_err());
    }

    #[test]
    fn memory_node_serializes_kind_as_type() {
        let node = MemoryNode::new("u1", "s1", MemoryKind::Preference, "likes tea", 0.8, vec![]);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "preference");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn new_node_starts_with_equal_timestamps() {
        let node = MemoryNode::new("u1", "s1", MemoryKind::Episodic, "x", 0.1, vec![]);
        assert_eq!(node.created_at, node.last_used_at);
    }

    #[test]
    fn now_has_microsecond_precision() {
        let ts = now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn payload_preview_is_truncated_on_char_boundary() {
        let summary = "é".repeat(150);
        let node = MemoryNode::new("u1", "s1", MemoryKind::Semantic, summary, 0.5, vec![]);
        let payload = IndexPayload::from_node(&node, SUMMARY_PREVIEW_CHARS);
        assert_eq!(payload.summary_preview.chars().count(), SUMMARY_PREVIEW_CHARS);
        assert_eq!(payload.memory_id, node.id);
        assert_eq!(payload.kind, MemoryKind::Semantic);
    }

    #[test]
    fn payload_keeps_short_summary_whole() {
        let node = MemoryNode::new("u1", "s1", MemoryKind::Episodic, "short", 0.5, vec![]);
        let payload = IndexPayload::from_node(&node, SUMMARY_PREVIEW_CHARS);
        assert_eq!(payload.summary_preview, "short");
    }
}
