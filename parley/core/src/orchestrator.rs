//! Turn Orchestrator
//!
//! The server-side brain of parley. It owns the conversation-store binding
//! and the session provider, gates every operation on an authenticated
//! session, and runs the per-turn protocol:
//!
//! ```text
//! Idle → Resolving → Streaming → Persisting → Done
//!          │            │            │
//!          └────────────┴────────────┴──→ Failed
//! ```
//!
//! - **Resolving**: [`crate::turn::begin_turn`] creates or resumes the
//!   conversation, emit its id before any model output.
//! - **Streaming**: the store's completion stream is forwarded to the
//!   caller unmodified.
//! - **Persisting**: [`crate::turn::end_turn`] writes the turn's new
//!   messages and refresh the labels. Runs even when the caller has gone
//!   away, so an aborted stream never silently loses the user's message.
//!
//! # Design Philosophy
//!
//! The orchestrator is surface-agnostic: it doesn't know whether a session
//! controller calls it in-process or the daemon drives it over a socket.
//! Everything it needs from the environment arrives through two traits
//! ([`ConversationStore`], [`SessionProvider`]) and one config struct.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::auth::{AuthSession, SessionProvider};
use crate::error::{Error, Result};
use crate::events::TurnEvent;
use crate::fingerprint::derive_fingerprint;
use crate::store::types::{
    BotId, ChatMessage, CompletionRequest, ContactId, ConversationId, EnsureContactRequest,
    ListQuery, ModelEvent, Persona, SortOrder, StoredMessage,
};
use crate::store::ConversationStore;
use crate::turn::{self, TurnRequest};

/// Capacity of the per-turn event channel
const TURN_CHANNEL_CAPACITY: usize = 100;

/// A bot as presented to clients (name/description fallbacks applied)
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Bot {
    /// Store-assigned bot id
    pub id: BotId,
    /// Display name ("Unnamed Bot" when the store has none)
    pub name: String,
    /// Description (empty when the store has none)
    pub description: String,
}

/// A conversation as presented in the sidebar listing
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Store-assigned conversation id
    pub id: ConversationId,
    /// Short label (empty until first derived)
    pub name: String,
    /// Longer label (empty until first derived)
    pub description: String,
    /// Creation timestamp as reported by the store
    pub created_at: String,
}

/// Orchestrator configuration, resolved once at startup
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Bots exposed to clients; None exposes every bot the credential sees
    pub allowed_bot_ids: Option<Vec<String>>,
    /// Model used for bot-less turns
    pub fallback_model: String,
    /// Page size for conversation listings
    pub conversation_page_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            allowed_bot_ids: None,
            fallback_model: turn::FALLBACK_MODEL.to_string(),
            conversation_page_size: 50,
        }
    }
}

/// The orchestrator: session-gated operations over the conversation store
pub struct Orchestrator<S> {
    store: Arc<S>,
    sessions: Arc<dyn SessionProvider>,
    config: OrchestratorConfig,
}

impl<S: ConversationStore + 'static> Orchestrator<S> {
    /// Create an orchestrator over a store binding and session source
    pub fn new(
        store: Arc<S>,
        sessions: Arc<dyn SessionProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            config,
        }
    }

    /// The store binding (shared with the session controller for tests)
    #[must_use]
    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Resolve the authenticated session or fail before any remote call
    async fn require_session(&self) -> Result<AuthSession> {
        self.sessions
            .current_session()
            .await
            .ok_or(Error::Unauthorized)
    }

    /// Ensure a contact record exists for the authenticated user.
    ///
    /// Derives the fingerprint from the session email and upserts
    /// idempotently: repeated calls resolve to the same contact id.
    pub async fn ensure_contact(&self) -> Result<ContactId> {
        let session = self.require_session().await?;
        let fingerprint = derive_fingerprint(&session.identity.email);
        let contact = self
            .store
            .ensure_contact(EnsureContactRequest {
                fingerprint: fingerprint.to_string(),
                email: session.identity.email.clone(),
                name: session.identity.name.clone().unwrap_or_default(),
            })
            .await?;
        debug!(contact = %contact.id, "contact ensured");
        Ok(contact.id)
    }

    /// List the bots exposed to this deployment.
    ///
    /// When an allow-list is configured only those bots are returned;
    /// otherwise every bot the credential sees. Missing names fall back to
    /// a placeholder.
    pub async fn list_bots(&self) -> Result<Vec<Bot>> {
        self.require_session().await?;
        let records = self.store.list_bots().await?;

        let allowed = self.config.allowed_bot_ids.as_deref();
        Ok(records
            .into_iter()
            .filter(|record| {
                allowed.is_none_or(|ids| ids.iter().any(|id| id == record.id.as_str()))
            })
            .map(|record| Bot {
                id: record.id,
                name: record
                    .name
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| "Unnamed Bot".to_string()),
                description: record.description.unwrap_or_default(),
            })
            .collect())
    }

    /// List a contact's conversations, most recent first
    pub async fn list_conversations(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<ConversationSummary>> {
        self.require_session().await?;
        let records = self
            .store
            .list_conversations(
                contact_id,
                ListQuery {
                    order: SortOrder::Desc,
                    take: self.config.conversation_page_size,
                },
            )
            .await?;
        Ok(records
            .into_iter()
            .map(|record| ConversationSummary {
                id: record.id,
                name: record.name.unwrap_or_default(),
                description: record.description.unwrap_or_default(),
                created_at: record.created_at,
            })
            .collect())
    }

    /// Fetch a conversation's transcript for restoring into a session.
    ///
    /// Only user/bot messages are returned; timestamps are normalized to
    /// RFC-3339 UTC with milliseconds.
    pub async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>> {
        self.require_session().await?;
        let messages = self.store.list_messages(conversation_id).await?;
        Ok(messages
            .into_iter()
            .filter(|message| message.kind.is_visible())
            .map(|mut message| {
                message.created_at = normalize_timestamp(&message.created_at);
                message
            })
            .collect())
    }

    /// Delete a conversation. Terminal: no further turns may reference it.
    pub async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        self.require_session().await?;
        self.store.delete_conversation(conversation_id).await
            .map_err(Error::from)
    }

    /// Run one turn: resolve the conversation, stream the model response,
    /// persist the outcome.
    ///
    /// Returns the turn's event stream. The stream always ends with a
    /// terminal event ([`TurnEvent::Finished`] or [`TurnEvent::Failed`]).
    /// Dropping the receiver aborts delivery but not persistence: the
    /// forwarding task keeps draining the model stream and still runs the
    /// persisting phase on whatever arrived.
    pub async fn complete_turn(&self, request: TurnRequest) -> Result<mpsc::Receiver<TurnEvent>> {
        let session = self.require_session().await?;

        // Resolving: conversation create-or-resume, before any model output
        let (handle, opening) = turn::begin_turn(self.store.as_ref(), &request).await?;

        let persona = match request.bot_id.clone() {
            Some(bot_id) => Persona::Bot(bot_id),
            None => Persona::Inline {
                backstory: turn::fallback_backstory(session.identity.display_name()),
                model: self.config.fallback_model.clone(),
            },
        };

        let completion = CompletionRequest {
            persona,
            contact_id: request.contact_id.clone(),
            messages: request.messages.clone(),
            functions: vec![turn::current_time_function()],
        };

        // Streaming: the store's event stream passes through unmodified
        let mut model_rx = self.store.stream_completion(completion).await?;

        let (tx, rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
        let store = Arc::clone(&self.store);
        let submitted = request.messages;

        tokio::spawn(async move {
            if let Some(update) = opening {
                let _ = tx.send(TurnEvent::Conversation(update)).await;
            }

            let mut partial = String::new();
            let mut appended: Vec<ChatMessage> = Vec::new();
            let mut final_messages: Option<Vec<ChatMessage>> = None;
            let mut stream_error: Option<String> = None;

            while let Some(event) = model_rx.recv().await {
                match event {
                    ModelEvent::Token(token) => {
                        partial.push_str(&token);
                        let _ = tx.send(TurnEvent::Token(token)).await;
                    }
                    ModelEvent::Message(message) => {
                        appended.push(message.clone());
                        let _ = tx.send(TurnEvent::Message(message)).await;
                    }
                    ModelEvent::Finished { messages } => {
                        final_messages = Some(messages);
                    }
                    ModelEvent::Error(message) => {
                        warn!(error = %message, "model stream reported an error");
                        stream_error = Some(message);
                    }
                }
            }

            // Persisting: runs on completion and abort alike. Without a
            // final set, reconcile from what the stream delivered so an
            // aborted turn never silently loses the user's message.
            let final_messages = final_messages.unwrap_or_else(|| {
                let mut reconciled = submitted;
                reconciled.append(&mut appended);
                if !partial.is_empty() {
                    reconciled.push(ChatMessage::bot(partial));
                }
                if stream_error.is_none() {
                    stream_error = Some("stream ended before completion".to_string());
                }
                reconciled
            });

            match turn::end_turn(store.as_ref(), &handle, &final_messages).await {
                Ok(Some(update)) => {
                    let _ = tx.send(TurnEvent::Conversation(update)).await;
                }
                Ok(None) => {}
                Err(err) => {
                    error!(%err, "failed to persist turn");
                    let _ = tx
                        .send(TurnEvent::Failed {
                            error: err.to_string(),
                        })
                        .await;
                    return;
                }
            }

            let terminal = match stream_error {
                Some(message) => TurnEvent::Failed {
                    error: Error::StreamAbort(message).to_string(),
                },
                None => TurnEvent::Finished {
                    messages: final_messages,
                },
            };
            let _ = tx.send(terminal).await;
        });

        Ok(rx)
    }
}

/// Normalize a store timestamp to RFC-3339 UTC with milliseconds.
///
/// Unparseable timestamps pass through untouched.
fn normalize_timestamp(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw).map_or_else(
        |_| raw.to_string(),
        |parsed| {
            parsed
                .with_timezone(&chrono::Utc)
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_timestamp_to_utc_millis() {
        assert_eq!(
            normalize_timestamp("2024-06-01T12:30:00+02:00"),
            "2024-06-01T10:30:00.000Z"
        );
    }

    #[test]
    fn test_normalize_timestamp_passthrough_on_garbage() {
        assert_eq!(normalize_timestamp("not a time"), "not a time");
    }

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.fallback_model, "gpt-4o");
        assert_eq!(config.conversation_page_size, 50);
        assert!(config.allowed_bot_ids.is_none());
    }
}
