//! Conversation Store Data Model
//!
//! Entity and request types crossing the remote-store boundary. Ids are
//! store-assigned opaque strings wrapped in newtypes; wire field names are
//! camelCase to match the platform API.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap a raw store-assigned id
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw id string
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Store-assigned id of a contact record
    ContactId
);
string_id!(
    /// Store-assigned id of a bot configuration
    BotId
);
string_id!(
    /// Store-assigned id of a conversation
    ConversationId
);
string_id!(
    /// Store-assigned id of a persisted message
    MessageId
);

// ============================================================================
// Messages
// ============================================================================

/// Author kind of a message.
///
/// The wire carries more kinds than consumers ever see (context markers,
/// activation records, and so on); everything that is not `user` or `bot`
/// folds into [`MessageKind::Other`] and is filtered from consumer-facing
/// views.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Authored by the end user
    User,
    /// Authored by the agent
    Bot,
    /// Any other wire type (filtered from consumer views)
    #[serde(other)]
    Other,
}

impl MessageKind {
    /// Whether messages of this kind appear in transcripts
    #[must_use]
    pub fn is_visible(self) -> bool {
        matches!(self, Self::User | Self::Bot)
    }
}

/// A message as exchanged within a turn (no storage metadata)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message text
    pub text: String,
}

impl ChatMessage {
    /// Create a user-authored message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::User,
            text: text.into(),
        }
    }

    /// Create a bot-authored message
    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Bot,
            text: text.into(),
        }
    }
}

/// A persisted message as returned by the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Store-assigned id
    pub id: MessageId,
    /// Author kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message text
    pub text: String,
    /// Creation timestamp as reported by the store
    pub created_at: String,
}

impl StoredMessage {
    /// Project onto the turn-level message shape
    #[must_use]
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            kind: self.kind,
            text: self.text.clone(),
        }
    }
}

/// Payload for persisting one message
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewMessage {
    /// Author kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message text
    pub text: String,
}

impl From<&ChatMessage> for NewMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            kind: message.kind,
            text: message.text.clone(),
        }
    }
}

// ============================================================================
// Contacts, bots, conversations
// ============================================================================

/// Idempotent contact upsert payload
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnsureContactRequest {
    /// Deterministic identity fingerprint (the unique key)
    pub fingerprint: String,
    /// Email address
    pub email: String,
    /// Display name (may be empty)
    pub name: String,
}

/// Reference to an ensured contact
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactRef {
    /// Store-assigned contact id
    pub id: ContactId,
}

/// A bot configuration as stored on the platform
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotRecord {
    /// Store-assigned bot id
    pub id: BotId,
    /// Configured name, when present
    pub name: Option<String>,
    /// Configured description, when present
    pub description: Option<String>,
}

/// Payload for creating a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// Contact the conversation belongs to for its lifetime
    pub contact_id: ContactId,
    /// Bot the conversation is pinned to, if one was chosen
    pub bot_id: Option<BotId>,
}

/// Reference to a created conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationRef {
    /// Store-assigned conversation id
    pub id: ConversationId,
}

/// Conversation sidebar labels
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationLabel {
    /// Short label
    pub name: String,
    /// Longer label
    pub description: String,
}

/// A conversation as listed by the store
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Store-assigned conversation id
    pub id: ConversationId,
    /// Current short label, when set
    pub name: Option<String>,
    /// Current longer label, when set
    pub description: Option<String>,
    /// Creation timestamp as reported by the store
    pub created_at: String,
}

/// Sort direction for listings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first
    Asc,
    /// Newest first
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

/// Pagination and ordering for conversation listings
#[derive(Clone, Copy, Debug)]
pub struct ListQuery {
    /// Sort direction on creation time
    pub order: SortOrder,
    /// Maximum number of records to return
    pub take: usize,
}

// ============================================================================
// Turn completion
// ============================================================================

/// Agent configuration for a completion call
#[derive(Clone, Debug)]
pub enum Persona {
    /// A named platform bot; its full configuration lives server-side
    Bot(BotId),
    /// Inline fallback persona when no bot was chosen
    Inline {
        /// System backstory text
        backstory: String,
        /// Model identifier
        model: String,
    },
}

/// A capability offered to the model for the duration of one turn.
///
/// Handlers take no arguments; richer function calling is out of scope.
#[derive(Clone)]
pub struct AgentFunction {
    /// Function name as exposed to the model
    pub name: String,
    /// Human-readable description
    pub description: String,
    handler: Arc<dyn Fn() -> serde_json::Value + Send + Sync>,
}

impl AgentFunction {
    /// Create a capability from a name, description, and handler
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl Fn() -> serde_json::Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            handler: Arc::new(handler),
        }
    }

    /// Run the handler and return its result value
    #[must_use]
    pub fn invoke(&self) -> serde_json::Value {
        (self.handler)()
    }
}

impl fmt::Debug for AgentFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentFunction")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A streaming turn-completion request
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    /// Agent configuration
    pub persona: Persona,
    /// Contact the turn is attributed to, when known
    pub contact_id: Option<ContactId>,
    /// Full message history for the turn (stateless on the wire)
    pub messages: Vec<ChatMessage>,
    /// Capabilities offered to the model
    pub functions: Vec<AgentFunction>,
}

/// Events produced by the store's completion stream
#[derive(Clone, Debug)]
pub enum ModelEvent {
    /// A token of the in-progress response
    Token(String),
    /// A complete message appended mid-stream (e.g. a function round trip)
    Message(ChatMessage),
    /// Stream finished; carries the final full message set
    Finished {
        /// Every message of the turn, history included, in order
        messages: Vec<ChatMessage>,
    },
    /// The stream failed
    Error(String),
}
