//! Client Session State Machine
//!
//! Client-local state for one chat surface (one browser tab's worth of
//! state): the active conversation, the restored history buffer, the live
//! streaming buffer, and the epoch counter that keeps them from bleeding
//! into each other across conversation switches.
//!
//! # Design Philosophy
//!
//! [`SessionState`] is a plain serializable value and every transition is a
//! synchronous method, with no I/O and no rendering environment, so the state
//! machine is deterministic to unit test. [`ChatSession`] binds that state
//! to an orchestrator and performs the remote calls around the transitions.
//!
//! # Epoch Isolation
//!
//! Restored history and live streaming state are never merged across a
//! switch. Selecting or clearing a conversation increments the epoch and
//! replaces the buffers wholesale; turn events stamped with an older epoch
//! are discarded. This is what prevents a message from showing up both in
//! the restored buffer and in live state after a switch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::TurnEvent;
use crate::orchestrator::{Bot, ConversationSummary, Orchestrator};
use crate::store::types::{BotId, ChatMessage, ContactId, ConversationId, StoredMessage};
use crate::store::ConversationStore;
use crate::turn::TurnRequest;

// ============================================================================
// Pure state
// ============================================================================

/// Serializable client session state
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Resolved contact id; None means anonymous/ephemeral mode
    pub contact_id: Option<ContactId>,
    /// Bot chosen for subsequent turns
    pub selected_bot_id: Option<BotId>,
    /// Conversation the surface is showing; None means fresh conversation
    pub active_conversation_id: Option<ConversationId>,
    /// Historical messages loaded for the active conversation; None means
    /// no history (fresh conversation)
    pub restored_messages: Option<Vec<StoredMessage>>,
    /// Monotonic counter; incremented on every switch to invalidate live
    /// streaming state wholesale
    pub epoch: u64,
    /// Monotonic counter; incremented when a turn's final conversation
    /// event arrives, signalling the sidebar to reload its listing
    pub sidebar_refresh: u64,
}

impl SessionState {
    /// Fresh state: anonymous, no conversation, epoch zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to a conversation whose history has been fetched
    pub fn conversation_selected(
        &mut self,
        id: ConversationId,
        messages: Vec<StoredMessage>,
    ) {
        self.active_conversation_id = Some(id);
        self.restored_messages = Some(messages);
        self.epoch += 1;
    }

    /// Start a fresh conversation
    pub fn conversation_cleared(&mut self) {
        self.active_conversation_id = None;
        self.restored_messages = None;
        self.epoch += 1;
    }

    /// Record a deletion; returns true when the active conversation was the
    /// one deleted (in which case the state reset to fresh)
    pub fn conversation_deleted(&mut self, id: &ConversationId) -> bool {
        if self.active_conversation_id.as_ref() == Some(id) {
            self.conversation_cleared();
            return true;
        }
        false
    }

    /// Adopt a conversation id reported during a turn of the given epoch.
    ///
    /// Stale epochs are ignored: the turn belongs to state that has since
    /// been switched away from.
    pub fn conversation_adopted(&mut self, epoch: u64, id: ConversationId) -> bool {
        if epoch != self.epoch {
            return false;
        }
        if self.active_conversation_id.is_none() {
            self.active_conversation_id = Some(id);
        }
        true
    }

    /// Record a completed turn of the given epoch (bumps the sidebar)
    pub fn turn_labelled(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.sidebar_refresh += 1;
        true
    }
}

// ============================================================================
// Turn stream
// ============================================================================

/// The event stream of one submitted turn, stamped with the epoch it was
/// started under
pub struct TurnStream {
    epoch: u64,
    rx: mpsc::Receiver<TurnEvent>,
}

impl TurnStream {
    /// Epoch the turn was submitted under
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Next event, or None once the turn's task is done
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.rx.recv().await
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Client session controller bound to an orchestrator
pub struct ChatSession<S: ConversationStore + 'static> {
    orchestrator: Arc<Orchestrator<S>>,
    state: SessionState,
    /// Messages completed during the current epoch's live turns
    live: Vec<ChatMessage>,
    /// Token accumulator for the in-flight response
    partial: String,
    /// Most recent turn failure, for display
    last_error: Option<String>,
}

impl<S: ConversationStore + 'static> ChatSession<S> {
    /// Create a session over an orchestrator
    pub fn new(orchestrator: Arc<Orchestrator<S>>) -> Self {
        Self {
            orchestrator,
            state: SessionState::new(),
            live: Vec::new(),
            partial: String::new(),
            last_error: None,
        }
    }

    /// Current state (read-only)
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Messages completed live in the current epoch
    #[must_use]
    pub fn live_messages(&self) -> &[ChatMessage] {
        &self.live
    }

    /// Most recent turn failure, if any
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Clear a displayed failure
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Everything the surface should render: restored history, live
    /// messages, then the in-flight partial response
    #[must_use]
    pub fn visible_messages(&self) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self
            .state
            .restored_messages
            .iter()
            .flatten()
            .map(StoredMessage::to_chat)
            .collect();
        messages.extend(self.live.iter().cloned());
        if !self.partial.is_empty() {
            messages.push(ChatMessage::bot(self.partial.clone()));
        }
        messages
    }

    /// Resolve the contact for the authenticated user.
    ///
    /// Failure degrades to anonymous mode (turns still stream, nothing
    /// persists) instead of failing the session.
    pub async fn connect(&mut self) {
        match self.orchestrator.ensure_contact().await {
            Ok(contact_id) => {
                debug!(contact = %contact_id, "session connected");
                self.state.contact_id = Some(contact_id);
            }
            Err(error) => {
                warn!(%error, "contact resolution failed, running anonymously");
                self.state.contact_id = None;
            }
        }
    }

    /// Choose the bot for subsequent turns
    pub fn select_bot(&mut self, bot_id: Option<BotId>) {
        self.state.selected_bot_id = bot_id;
    }

    /// Bots available to this session.
    ///
    /// Failure degrades the picker to an empty list rather than failing
    /// the session.
    pub async fn list_bots(&self) -> Vec<Bot> {
        match self.orchestrator.list_bots().await {
            Ok(bots) => bots,
            Err(error) => {
                warn!(%error, "bot listing failed, picker disabled");
                Vec::new()
            }
        }
    }

    /// The sidebar listing; empty in anonymous mode
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        match &self.state.contact_id {
            Some(contact_id) => self.orchestrator.list_conversations(contact_id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Switch to an existing conversation, replacing all live state
    pub async fn select_conversation(&mut self, id: ConversationId) -> Result<()> {
        let messages = self.orchestrator.fetch_messages(&id).await?;
        self.state.conversation_selected(id, messages);
        self.live.clear();
        self.partial.clear();
        Ok(())
    }

    /// Start a fresh conversation, replacing all live state
    pub fn new_conversation(&mut self) {
        self.state.conversation_cleared();
        self.live.clear();
        self.partial.clear();
    }

    /// Delete a conversation; deleting the active one resets to fresh
    pub async fn delete_conversation(&mut self, id: &ConversationId) -> Result<()> {
        self.orchestrator.delete_conversation(id).await?;
        if self.state.conversation_deleted(id) {
            self.live.clear();
            self.partial.clear();
        }
        Ok(())
    }

    /// Submit a turn with the given user input.
    ///
    /// The outgoing history is restored messages, live messages, then the
    /// new user message. Feed the returned stream's events back through
    /// [`ChatSession::apply_event`].
    pub async fn submit(&mut self, text: impl Into<String>) -> Result<TurnStream> {
        let user_message = ChatMessage::user(text);

        let mut outgoing: Vec<ChatMessage> = self
            .state
            .restored_messages
            .iter()
            .flatten()
            .map(StoredMessage::to_chat)
            .collect();
        outgoing.extend(self.live.iter().cloned());
        outgoing.push(user_message.clone());

        let rx = self
            .orchestrator
            .complete_turn(TurnRequest {
                bot_id: self.state.selected_bot_id.clone(),
                contact_id: self.state.contact_id.clone(),
                conversation_id: self.state.active_conversation_id.clone(),
                messages: outgoing,
            })
            .await?;

        self.live.push(user_message);
        Ok(TurnStream {
            epoch: self.state.epoch,
            rx,
        })
    }

    /// Apply one turn event to the session.
    ///
    /// Events from a stale epoch (the user switched conversations while the
    /// turn was streaming) are discarded wholesale. Returns whether the
    /// event was applied.
    pub fn apply_event(&mut self, epoch: u64, event: &TurnEvent) -> bool {
        if epoch != self.state.epoch {
            return false;
        }

        match event {
            TurnEvent::Conversation(update) => {
                self.state.conversation_adopted(epoch, update.id.clone());
                if update.name.is_some() {
                    self.state.turn_labelled(epoch);
                }
            }
            TurnEvent::Token(token) => {
                self.partial.push_str(token);
            }
            TurnEvent::Message(message) => {
                self.live.push(message.clone());
            }
            TurnEvent::Finished { messages } => {
                // The final set is authoritative: everything beyond the
                // restored prefix becomes the live buffer.
                let restored_len = self
                    .state
                    .restored_messages
                    .as_ref()
                    .map_or(0, Vec::len);
                self.live = messages.iter().skip(restored_len).cloned().collect();
                self.partial.clear();
            }
            TurnEvent::Failed { error } => {
                if !self.partial.is_empty() {
                    let partial = std::mem::take(&mut self.partial);
                    self.live.push(ChatMessage::bot(partial));
                }
                self.last_error = Some(error.clone());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::MessageKind;
    use pretty_assertions::assert_eq;

    fn stored(id: &str, kind: MessageKind, text: &str) -> StoredMessage {
        StoredMessage {
            id: crate::store::types::MessageId::from(id),
            kind,
            text: text.to_string(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_select_increments_epoch_and_replaces_history() {
        let mut state = SessionState::new();
        state.conversation_selected(
            ConversationId::from("con_a"),
            vec![stored("msg_1", MessageKind::User, "hi")],
        );
        assert_eq!(state.epoch, 1);
        assert_eq!(
            state.active_conversation_id,
            Some(ConversationId::from("con_a"))
        );
        assert_eq!(state.restored_messages.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_resets_conversation() {
        let mut state = SessionState::new();
        state.conversation_selected(ConversationId::from("con_a"), vec![]);
        state.conversation_cleared();
        assert_eq!(state.epoch, 2);
        assert!(state.active_conversation_id.is_none());
        assert!(state.restored_messages.is_none());
    }

    #[test]
    fn test_deleting_active_conversation_resets() {
        let mut state = SessionState::new();
        state.conversation_selected(ConversationId::from("con_a"), vec![]);
        assert!(state.conversation_deleted(&ConversationId::from("con_a")));
        assert!(state.active_conversation_id.is_none());
        assert!(state.restored_messages.is_none());
    }

    #[test]
    fn test_deleting_other_conversation_keeps_state() {
        let mut state = SessionState::new();
        state.conversation_selected(ConversationId::from("con_a"), vec![]);
        assert!(!state.conversation_deleted(&ConversationId::from("con_b")));
        assert_eq!(
            state.active_conversation_id,
            Some(ConversationId::from("con_a"))
        );
    }

    #[test]
    fn test_adoption_ignores_stale_epoch() {
        let mut state = SessionState::new();
        state.conversation_cleared(); // epoch 1
        assert!(!state.conversation_adopted(0, ConversationId::from("con_x")));
        assert!(state.active_conversation_id.is_none());
        assert!(state.conversation_adopted(1, ConversationId::from("con_x")));
        assert_eq!(
            state.active_conversation_id,
            Some(ConversationId::from("con_x"))
        );
    }

    #[test]
    fn test_adoption_does_not_replace_existing_id() {
        let mut state = SessionState::new();
        state.conversation_selected(ConversationId::from("con_a"), vec![]);
        state.conversation_adopted(1, ConversationId::from("con_b"));
        assert_eq!(
            state.active_conversation_id,
            Some(ConversationId::from("con_a"))
        );
    }

    #[test]
    fn test_sidebar_refresh_counts_labelled_turns() {
        let mut state = SessionState::new();
        assert!(state.turn_labelled(0));
        assert!(state.turn_labelled(0));
        assert_eq!(state.sidebar_refresh, 2);
        state.conversation_cleared();
        assert!(!state.turn_labelled(0));
        assert_eq!(state.sidebar_refresh, 2);
    }
}
