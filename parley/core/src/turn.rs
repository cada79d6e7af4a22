//! Turn Protocol
//!
//! The two explicit phases that bracket every streamed turn, plus the label
//! derivation that keeps the conversation sidebar readable.
//!
//! Each turn is stateless on the wire (the client resends the full message
//! history) but must be reconciled against the server-held conversation
//! record:
//!
//! - [`begin_turn`] creates-or-resumes the conversation exactly once and
//!   reports its id before any model output, so the caller can adopt it even
//!   if streaming later fails. Turns without a contact id skip persistence
//!   entirely (anonymous mode).
//! - [`end_turn`] persists the messages this turn added and refreshes the
//!   conversation labels. It runs on normal completion and after aborts
//!   alike, against whatever partial message set the stream delivered.
//!
//! # New-Message Boundary
//!
//! The messages to persist are the suffix of the final message list starting
//! at `submitted_len - 1`. The client-submitted history already contains the
//! just-typed user message, and the final list contains it too; starting one
//! short of the submitted length persists that user message exactly once,
//! never doubled and never dropped, along with every message the stream
//! appended. This offset assumes the model endpoint never removes or
//! reorders prior history.

use chrono::{SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::ConversationUpdate;
use crate::store::types::{
    AgentFunction, BotId, ChatMessage, ContactId, ConversationId, ConversationLabel,
    CreateConversationRequest, MessageKind, NewMessage,
};
use crate::store::ConversationStore;

/// One turn as submitted by the client
#[derive(Clone, Debug)]
pub struct TurnRequest {
    /// Named bot to complete with; None selects the inline fallback persona
    pub bot_id: Option<BotId>,
    /// Contact the turn belongs to; None makes the turn anonymous
    pub contact_id: Option<ContactId>,
    /// Conversation to resume; None creates one on the first persistent turn
    pub conversation_id: Option<ConversationId>,
    /// Full history: restored messages, live messages, then the new user
    /// message last
    pub messages: Vec<ChatMessage>,
}

/// Model used when no bot id is supplied
pub const FALLBACK_MODEL: &str = "gpt-4o";

/// Label shown before any user text exists
pub const PLACEHOLDER_NAME: &str = "New conversation";

/// How many user messages feed the label
const LABEL_SOURCE_MESSAGES: usize = 3;

/// Maximum label name length, in characters
const NAME_MAX_CHARS: usize = 80;

/// Maximum label description length, in characters
const DESCRIPTION_MAX_CHARS: usize = 200;

/// Inline persona used when no bot id is supplied.
///
/// The full persona of a named bot lives server-side; this is only the
/// fallback for bot-less turns.
#[must_use]
pub fn fallback_backstory(user_name: &str) -> String {
    format!(
        "You are a helpful AI assistant. You are friendly, concise, and \
         knowledgeable. You help users with their questions and tasks. \
         The current user is {user_name}."
    )
}

/// The fixed capability offered to the model on every turn: the current
/// wall-clock time in RFC-3339 form.
#[must_use]
pub fn current_time_function() -> AgentFunction {
    AgentFunction::new("getCurrentTime", "Gets the current date and time", || {
        serde_json::json!({
            "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    })
}

/// Resolution produced by [`begin_turn`], consumed by [`end_turn`]
#[derive(Clone, Debug)]
pub struct TurnHandle {
    conversation_id: Option<ConversationId>,
    submitted_len: usize,
}

impl TurnHandle {
    /// The conversation this turn persists into, if any
    #[must_use]
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// Whether this turn persists at all
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.conversation_id.is_some()
    }
}

/// Resolve the conversation for a turn.
///
/// Without a contact id the turn is anonymous: no conversation is created
/// or associated and persistence is skipped. With a contact id, a missing
/// conversation id means this is the session's first turn and a new
/// conversation is created; the returned update (carrying the id only) must
/// reach the caller before any model output.
pub async fn begin_turn<S>(
    store: &S,
    request: &TurnRequest,
) -> Result<(TurnHandle, Option<ConversationUpdate>)>
where
    S: ConversationStore + ?Sized,
{
    let submitted_len = request.messages.len();

    let Some(contact_id) = request.contact_id.clone() else {
        debug!("anonymous turn, persistence skipped");
        return Ok((
            TurnHandle {
                conversation_id: None,
                submitted_len,
            },
            None,
        ));
    };

    let conversation_id = match request.conversation_id.clone() {
        Some(id) => id,
        None => {
            let created = store
                .create_conversation(CreateConversationRequest {
                    contact_id,
                    bot_id: request.bot_id.clone(),
                })
                .await?;
            debug!(conversation = %created.id, "created conversation");
            created.id
        }
    };

    let update = ConversationUpdate::id_only(conversation_id.clone());
    Ok((
        TurnHandle {
            conversation_id: Some(conversation_id),
            submitted_len,
        },
        Some(update),
    ))
}

/// Persist the turn's new messages and refresh the conversation labels.
///
/// Messages are written sequentially so persisted order matches stream
/// order. A failing label update is tolerated (the messages already
/// persisted remain valid and a stale label is acceptable), but failing
/// message writes propagate.
pub async fn end_turn<S>(
    store: &S,
    handle: &TurnHandle,
    final_messages: &[ChatMessage],
) -> Result<Option<ConversationUpdate>>
where
    S: ConversationStore + ?Sized,
{
    let Some(conversation_id) = &handle.conversation_id else {
        return Ok(None);
    };

    let new_messages = new_message_suffix(handle.submitted_len, final_messages);
    if new_messages.is_empty() {
        return Ok(None);
    }

    for message in new_messages {
        store
            .create_message(conversation_id, NewMessage::from(message))
            .await?;
    }

    let label = derive_label(final_messages);
    if let Err(error) = store
        .update_conversation(conversation_id, label.clone())
        .await
    {
        warn!(conversation = %conversation_id, %error, "label update failed");
    }

    Ok(Some(ConversationUpdate {
        id: conversation_id.clone(),
        name: Some(label.name),
        description: Some(label.description),
    }))
}

/// The slice of `final_messages` this turn must persist.
///
/// See the module docs for why the boundary sits at `submitted_len - 1`.
#[must_use]
pub fn new_message_suffix(submitted_len: usize, final_messages: &[ChatMessage]) -> &[ChatMessage] {
    let boundary = submitted_len.saturating_sub(1).min(final_messages.len());
    &final_messages[boundary..]
}

/// Derive sidebar labels from the turn's message set.
///
/// Up to the first three user-authored texts are joined and truncated:
/// 80 characters for the name, 200 for the description. With no user text
/// yet, the name falls back to a placeholder and the description stays
/// empty.
#[must_use]
pub fn derive_label(messages: &[ChatMessage]) -> ConversationLabel {
    let joined = messages
        .iter()
        .filter(|m| m.kind == MessageKind::User)
        .take(LABEL_SOURCE_MESSAGES)
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let name = truncate_chars(&joined, NAME_MAX_CHARS);
    ConversationLabel {
        name: if name.is_empty() {
            PLACEHOLDER_NAME.to_string()
        } else {
            name
        },
        description: truncate_chars(&joined, DESCRIPTION_MAX_CHARS),
    }
}

/// Character-boundary-safe prefix truncation
fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn history(texts: &[(&str, MessageKind)]) -> Vec<ChatMessage> {
        texts
            .iter()
            .map(|(text, kind)| ChatMessage {
                kind: *kind,
                text: (*text).to_string(),
            })
            .collect()
    }

    #[test]
    fn test_boundary_single_reply() {
        // Client submitted 3 messages (the last being the fresh user
        // message); the stream appended one bot reply. The suffix persists
        // that user message exactly once plus the reply.
        let final_messages = history(&[
            ("old question", MessageKind::User),
            ("old answer", MessageKind::Bot),
            ("new question", MessageKind::User),
            ("new answer", MessageKind::Bot),
        ]);
        let suffix = new_message_suffix(3, &final_messages);
        assert_eq!(
            suffix,
            &final_messages[2..],
            "suffix must start at the just-added user message"
        );
    }

    #[test]
    fn test_boundary_function_round_trip() {
        // A function round trip inserted an extra message before the reply;
        // the suffix grows by exactly that message, order preserved.
        let final_messages = history(&[
            ("what time is it", MessageKind::User),
            ("checking the clock", MessageKind::Bot),
            ("it is noon", MessageKind::Bot),
        ]);
        let suffix = new_message_suffix(1, &final_messages);
        assert_eq!(suffix.len(), 3);
        assert_eq!(suffix[1].text, "checking the clock");
        assert_eq!(suffix[2].text, "it is noon");
    }

    #[test]
    fn test_boundary_no_new_messages() {
        let final_messages = history(&[("hi", MessageKind::User)]);
        // Stream returned nothing beyond the submitted set minus one:
        // submitted 2, final 1 -> empty suffix, nothing persisted.
        assert!(new_message_suffix(2, &final_messages).is_empty());
    }

    #[test]
    fn test_boundary_empty_submission() {
        let final_messages = history(&[("unprompted", MessageKind::Bot)]);
        // Degenerate zero-length submission must not underflow.
        assert_eq!(new_message_suffix(0, &final_messages).len(), 1);
    }

    #[test]
    fn test_label_truncation_exact() {
        let long = "x".repeat(500);
        let label = derive_label(&[ChatMessage::user(long)]);
        assert_eq!(label.name.chars().count(), 80);
        assert_eq!(label.description.chars().count(), 200);
    }

    #[test]
    fn test_label_placeholder_without_user_text() {
        let label = derive_label(&[ChatMessage::bot("greetings")]);
        assert_eq!(label.name, PLACEHOLDER_NAME);
        assert_eq!(label.description, "");
    }

    #[test]
    fn test_label_joins_first_three_user_texts() {
        let messages = history(&[
            ("one", MessageKind::User),
            ("ignored", MessageKind::Bot),
            ("two", MessageKind::User),
            ("three", MessageKind::User),
            ("four", MessageKind::User),
        ]);
        let label = derive_label(&messages);
        assert_eq!(label.name, "one two three");
    }

    #[test]
    fn test_label_truncation_multibyte_safe() {
        let label = derive_label(&[ChatMessage::user("é".repeat(300))]);
        assert_eq!(label.name.chars().count(), 80);
    }

    #[test]
    fn test_fallback_backstory_interpolates_name() {
        let backstory = fallback_backstory("Alice");
        assert!(backstory.contains("The current user is Alice."));
    }

    #[test]
    fn test_current_time_function_shape() {
        let function = current_time_function();
        assert_eq!(function.name, "getCurrentTime");
        let result = function.invoke();
        let time = result.get("time").and_then(|v| v.as_str()).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok());
    }
}
