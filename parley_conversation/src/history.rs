//! Conversation history management.
//!
//! This module owns the resident history and the two trimming rules applied
//! to it: pairwise front-trimming against a character budget before a
//! request, and front-dropping against an item budget after a turn.

use parley_core::{ChatMessage, Role};
use tracing::debug;

/// Bounds applied to conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Maximum number of messages kept in resident history
    pub max_messages: usize,
    /// Maximum characters in the context sent with a request
    pub max_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            max_chars: 16_000,
        }
    }
}

impl HistoryConfig {
    /// Both bounds are floored at 1.
    #[must_use]
    pub fn new(max_messages: usize, max_chars: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            max_chars: max_chars.max(1),
        }
    }

    #[must_use]
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max.max(1);
        self
    }

    #[must_use]
    pub fn with_max_chars(mut self, max: usize) -> Self {
        self.max_chars = max.max(1);
        self
    }
}

/// Resident conversation history, oldest message first.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    config: HistoryConfig,
    messages: Vec<ChatMessage>,
}

impl ConversationStore {
    #[must_use]
    pub const fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Build the input list for a request carrying `user_text`.
    ///
    /// While history plus the new message exceeds the character budget, the
    /// oldest two messages (one user/assistant pair) are dropped. The trim is
    /// committed to resident history immediately; the new message itself is
    /// not, that happens in [`Self::commit_turn`]. A message that alone
    /// exceeds the budget is still returned, untruncated, once history is
    /// empty.
    pub fn build_context(&mut self, user_text: &str) -> Vec<ChatMessage> {
        let message = ChatMessage::user(user_text);
        let mut total = total_chars(&self.messages) + message.char_count();
        let mut dropped = 0_usize;

        while !self.messages.is_empty() && total > self.config.max_chars {
            let n = self.messages.len().min(2);
            total -= total_chars(&self.messages[..n]);
            self.messages.drain(..n);
            dropped += n;
        }

        if dropped > 0 {
            debug!(
                "Trimmed {dropped} messages to fit context budget of {} chars",
                self.config.max_chars
            );
        }

        let mut context = Vec::with_capacity(self.messages.len() + 1);
        context.extend(self.messages.iter().cloned());
        context.push(message);
        context
    }

    /// Append a completed turn, then drop the oldest messages beyond the
    /// item budget.
    pub fn commit_turn(&mut self, user_text: &str, assistant_text: &str) {
        self.messages.push(ChatMessage::user(user_text));
        self.messages.push(ChatMessage::assistant(assistant_text));
        self.enforce_item_limit();
    }

    /// Replace the bounds and re-apply the item budget right away.
    pub fn reconfigure(&mut self, config: HistoryConfig) {
        self.config = config;
        self.enforce_item_limit();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get conversation statistics.
    #[must_use]
    pub fn stats(&self) -> HistoryStats {
        let total_chars = total_chars(&self.messages);
        let user_count = self.messages.iter().filter(|m| m.role == Role::User).count();
        let assistant_count = self
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();

        HistoryStats {
            total_messages: self.messages.len(),
            user_messages: user_count,
            assistant_messages: assistant_count,
            total_characters: total_chars,
            estimated_tokens: total_chars / 4, // Rough estimate: 4 chars per token
        }
    }

    fn enforce_item_limit(&mut self) {
        let excess = self.messages.len().saturating_sub(self.config.max_messages);
        if excess > 0 {
            self.messages.drain(..excess);
            debug!(
                "Dropped {excess} oldest messages to keep history at {}",
                self.config.max_messages
            );
        }
    }
}

/// Statistics about conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub total_characters: usize,
    pub estimated_tokens: usize,
}

fn total_chars(messages: &[ChatMessage]) -> usize {
    messages.iter().map(ChatMessage::char_count).sum()
}
