//! Conversation Store Boundary
//!
//! The remote conversation store is an opaque collaborator: it owns every
//! durable record (contacts, bots, conversations, messages) and runs the
//! hosted model. This module pins the boundary down to a single trait with
//! exactly the operations the orchestration core consumes, so any concrete
//! binding (the HTTP platform client or the in-memory test store) is
//! interchangeable.
//!
//! # Ordering Invariant
//!
//! The store persists messages in call order; there is no explicit sequence
//! field. Callers that care about transcript order (the turn orchestrator
//! does) must issue `create_message` calls sequentially.

pub mod http;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use http::{HttpStore, HttpStoreConfig};
pub use memory::MemoryStore;
pub use types::{
    AgentFunction, BotId, BotRecord, ChatMessage, CompletionRequest, ContactId, ContactRef,
    ConversationId, ConversationLabel, ConversationRecord, ConversationRef,
    CreateConversationRequest, EnsureContactRequest, ListQuery, MessageId, MessageKind,
    ModelEvent, NewMessage, Persona, SortOrder, StoredMessage,
};

/// Errors from the remote conversation store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The HTTP transport failed (connection, TLS, body read)
    #[error("conversation store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store rejected the call
    #[error("conversation store rejected the call ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// A store response could not be decoded
    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The referenced record does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The store call timed out
    #[error("conversation store call timed out")]
    Timeout,
}

/// Result alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The nine operations consumed from the remote conversation store.
///
/// All durable state lives behind this trait. Implementations must make
/// `ensure_contact` idempotent on the fingerprint and must preserve
/// `create_message` call order as the persisted transcript order.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Idempotent contact upsert keyed on the fingerprint
    async fn ensure_contact(&self, request: EnsureContactRequest) -> StoreResult<ContactRef>;

    /// List every bot configuration visible to this credential
    async fn list_bots(&self) -> StoreResult<Vec<BotRecord>>;

    /// Create a conversation owned by a contact
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> StoreResult<ConversationRef>;

    /// Replace a conversation's name/description labels
    async fn update_conversation(
        &self,
        id: &ConversationId,
        label: ConversationLabel,
    ) -> StoreResult<()>;

    /// Delete a conversation and, transitively, its messages
    async fn delete_conversation(&self, id: &ConversationId) -> StoreResult<()>;

    /// List a contact's conversations
    async fn list_conversations(
        &self,
        contact_id: &ContactId,
        query: ListQuery,
    ) -> StoreResult<Vec<ConversationRecord>>;

    /// List a conversation's messages in persisted order
    async fn list_messages(&self, id: &ConversationId) -> StoreResult<Vec<StoredMessage>>;

    /// Append one message to a conversation
    async fn create_message(
        &self,
        id: &ConversationId,
        message: NewMessage,
    ) -> StoreResult<MessageId>;

    /// Run one streaming turn completion against the hosted model.
    ///
    /// The returned channel yields pass-through [`ModelEvent`]s and closes
    /// after [`ModelEvent::Finished`] (or an error). The store does not
    /// persist anything on behalf of this call; persistence is the turn
    /// orchestrator's job.
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> StoreResult<mpsc::Receiver<ModelEvent>>;
}
