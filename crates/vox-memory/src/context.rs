//! Prompt-ready view of what the agent remembers.

use std::fmt;

use vox_types::{MemoryNode, Message};

/// Recalled memories plus the tail of the current session.
///
/// `Display` renders the two blocks a language model is shown:
///
/// ```text
/// RECALLED MEMORIES:
/// [PREFERENCE] (Imp: 0.9): User prefers Python over Java
///
/// RECENT CHAT HISTORY:
/// user: Can you write a sorting algorithm for me?
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    pub memories: Vec<MemoryNode>,
    pub history: Vec<Message>,
}

impl ConversationContext {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty() && self.history.is_empty()
    }
}

impl fmt::Display for ConversationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RECALLED MEMORIES:")?;
        if self.memories.is_empty() {
            writeln!(f, "(none)")?;
        }
        for mem in &self.memories {
            writeln!(
                f,
                "[{}] (Imp: {}): {}",
                mem.kind.as_str().to_uppercase(),
                mem.importance,
                mem.summary
            )?;
        }
        writeln!(f)?;
        writeln!(f, "RECENT CHAT HISTORY:")?;
        if self.history.is_empty() {
            writeln!(f, "(none)")?;
        }
        for msg in &self.history {
            writeln!(f, "{}: {}", msg.role, msg.content)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_types::{MemoryKind, Role};

    #[test]
    fn renders_memories_then_history() {
        let ctx = ConversationContext {
            memories: vec![MemoryNode::new(
                "u1",
                "A",
                MemoryKind::Preference,
                "User prefers Python over Java",
                0.9,
                vec![],
            )],
            history: vec![
                Message::new("u1", "B", Role::User, "Can you write a sorting algorithm?"),
                Message::new("u1", "B", Role::Assistant, "Here is a bubble sort in Python"),
            ],
        };
        let text = ctx.to_string();
        assert_eq!(
            text,
            "RECALLED MEMORIES:\n\
             [PREFERENCE] (Imp: 0.9): User prefers Python over Java\n\
             \n\
             RECENT CHAT HISTORY:\n\
             user: Can you write a sorting algorithm?\n\
             assistant: Here is a bubble sort in Python\n"
        );
    }

    #[test]
    fn empty_blocks_say_none() {
        let ctx = ConversationContext::default();
        assert!(ctx.is_empty());
        assert_eq!(ctx.to_string(), "RECALLED MEMORIES:\n(none)\n\nRECENT CHAT HISTORY:\n(none)\n");
    }
}
