pub mod commands;
pub mod config;
pub mod matcher;
pub mod repository;
pub mod safety;
pub mod selector;
pub mod service;
pub mod store;

pub use commands::{AccessGate, Command, CommandDispatcher, COMMAND_PREFIX};
pub use config::{HuiyingConfig, OneBotConfig, Settings, SettingsSource, StorageConfig};
pub use matcher::{match_message, KeywordMatch, MatchEngine, PatternError};
pub use repository::{
    default_keywords, JsonFileRepository, MemoryRepository, RepositoryError, RuleRepository,
};
pub use service::{AutoReplyService, Mutation, ReplyState};
pub use store::{AddOutcome, KeywordStore};

use serde::{Deserialize, Serialize};

/// A normalized inbound text message from any host platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Trimmed text content.
    pub text: String,
    /// Identity of whoever sent the message (e.g. a QQ number).
    pub sender_id: String,
    /// Where the message came from; replies go back here.
    pub origin: String,
}

impl InboundMessage {
    pub fn new(text: &str, sender_id: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            text: text.trim().to_string(),
            sender_id: sender_id.into(),
            origin: origin.into(),
        }
    }

    /// Whether the text is a command invocation rather than chat.
    pub fn is_command(&self) -> bool {
        self.text.starts_with(COMMAND_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_trims_text() {
        let msg = InboundMessage::new("  你好呀 \n", "10001", "onebot:private:10001");
        assert_eq!(msg.text, "你好呀");
        assert!(!msg.is_command());
    }

    #[test]
    fn test_inbound_message_command_detection() {
        let msg = InboundMessage::new(" /kr list", "10001", "onebot:group:42");
        assert!(msg.is_command());
    }
}
