//! Turn Events
//!
//! Events emitted by the turn orchestrator to whoever drives a turn: the
//! session controller in-process, or the daemon's wire protocol. The stream
//! for one turn is:
//!
//! ```text
//! Conversation{id}            (only when the turn is contact-associated)
//! Token / Message ...         (model output, passed through unmodified)
//! Conversation{id,name,desc}  (after persistence, labels refreshed)
//! Finished | Failed           (terminal)
//! ```

use serde::{Deserialize, Serialize};

use crate::store::types::{ChatMessage, ConversationId};

/// Conversation metadata reported during a turn.
///
/// The first event of a contact-associated turn carries only the id (so the
/// caller can adopt it before any model output, even if streaming later
/// fails); the post-persistence event carries the refreshed labels too.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationUpdate {
    /// Conversation id, canonical for this and subsequent turns
    pub id: ConversationId,
    /// Refreshed short label, when labels were derived
    pub name: Option<String>,
    /// Refreshed longer label, when labels were derived
    pub description: Option<String>,
}

impl ConversationUpdate {
    /// An update carrying only the conversation id
    #[must_use]
    pub fn id_only(id: ConversationId) -> Self {
        Self {
            id,
            name: None,
            description: None,
        }
    }
}

/// One event of a turn's output stream
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TurnEvent {
    /// Conversation metadata (id adoption, then refreshed labels)
    Conversation(ConversationUpdate),
    /// A token of the in-progress model response
    Token(String),
    /// A complete message appended mid-stream
    Message(ChatMessage),
    /// Terminal: the turn completed; carries the final full message set
    Finished {
        /// Every message of the turn, history included, in order
        messages: Vec<ChatMessage>,
    },
    /// Terminal: the turn failed after the stream started
    Failed {
        /// Error description for display
        error: String,
    },
}

impl TurnEvent {
    /// Whether this event ends the turn stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(TurnEvent::Finished { messages: vec![] }.is_terminal());
        assert!(TurnEvent::Failed {
            error: "x".to_string()
        }
        .is_terminal());
        assert!(!TurnEvent::Token("t".to_string()).is_terminal());
    }

    #[test]
    fn test_serde_round_trip() {
        let event = TurnEvent::Conversation(ConversationUpdate::id_only(ConversationId::from(
            "con_1",
        )));
        let json = serde_json::to_string(&event).unwrap();
        let back: TurnEvent = serde_json::from_str(&json).unwrap();
        match back {
            TurnEvent::Conversation(update) => {
                assert_eq!(update.id, ConversationId::from("con_1"));
                assert!(update.name.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
