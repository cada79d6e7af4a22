//! In-Memory Conversation Store
//!
//! Complete [`ConversationStore`] implementation backed by process memory.
//! Used by the property tests and for headless development without platform
//! credentials.
//!
//! The model side is simulated by a pluggable responder closure: given the
//! submitted history it returns the messages the "model" appends. The last
//! bot reply is delivered token by token so consumers exercise the same
//! streaming path as the HTTP binding.
//!
//! Call counts for the idempotent/exactly-once operations are recorded so
//! tests can observe them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::{
    BotRecord, ChatMessage, CompletionRequest, ContactId, ContactRef, ConversationId,
    ConversationLabel, ConversationRecord, ConversationRef, CreateConversationRequest,
    EnsureContactRequest, ListQuery, MessageId, ModelEvent, NewMessage, SortOrder, StoredMessage,
};
use super::{ConversationStore, StoreError, StoreResult};

/// Simulated model: submitted history in, appended messages out
pub type Responder = dyn Fn(&[ChatMessage]) -> Vec<ChatMessage> + Send + Sync;

#[derive(Clone)]
struct StoredContact {
    id: ContactId,
    #[allow(dead_code)]
    email: String,
}

#[derive(Clone)]
struct StoredConversation {
    id: ConversationId,
    contact_id: ContactId,
    name: Option<String>,
    description: Option<String>,
    created_at: String,
    seq: u64,
    messages: Vec<StoredMessage>,
}

#[derive(Default)]
struct Inner {
    /// Contacts keyed by fingerprint (the idempotency key)
    contacts: HashMap<String, StoredContact>,
    conversations: HashMap<ConversationId, StoredConversation>,
    bots: Vec<BotRecord>,
    seq: u64,
}

/// In-memory store with observable call counts
pub struct MemoryStore {
    inner: Mutex<Inner>,
    responder: RwLock<Arc<Responder>>,
    last_functions: Mutex<Vec<String>>,
    ensure_contact_calls: AtomicUsize,
    create_conversation_calls: AtomicUsize,
    create_message_calls: AtomicUsize,
}

impl MemoryStore {
    /// Create a store whose responder echoes the last user message
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            responder: RwLock::new(Arc::new(default_responder)),
            last_functions: Mutex::new(Vec::new()),
            ensure_contact_calls: AtomicUsize::new(0),
            create_conversation_calls: AtomicUsize::new(0),
            create_message_calls: AtomicUsize::new(0),
        }
    }

    /// Replace the simulated model
    pub fn set_responder(&self, responder: impl Fn(&[ChatMessage]) -> Vec<ChatMessage> + Send + Sync + 'static) {
        *self.responder.write() = Arc::new(responder);
    }

    /// Make a set of bots listable
    pub fn seed_bots(&self, bots: Vec<BotRecord>) {
        self.inner.lock().bots = bots;
    }

    /// How many times `ensure_contact` was called
    #[must_use]
    pub fn ensure_contact_calls(&self) -> usize {
        self.ensure_contact_calls.load(Ordering::SeqCst)
    }

    /// How many times `create_conversation` was called
    #[must_use]
    pub fn create_conversation_calls(&self) -> usize {
        self.create_conversation_calls.load(Ordering::SeqCst)
    }

    /// How many times `create_message` was called
    #[must_use]
    pub fn create_message_calls(&self) -> usize {
        self.create_message_calls.load(Ordering::SeqCst)
    }

    /// Number of stored contact records
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.inner.lock().contacts.len()
    }

    /// Persisted message `(kind-discriminant, text)` pairs for a conversation
    #[must_use]
    pub fn message_log(&self, id: &ConversationId) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .conversations
            .get(id)
            .map(|c| c.messages.iter().map(StoredMessage::to_chat).collect())
            .unwrap_or_default()
    }

    /// Current label of a conversation
    #[must_use]
    pub fn label(&self, id: &ConversationId) -> Option<ConversationLabel> {
        self.inner.lock().conversations.get(id).map(|c| ConversationLabel {
            name: c.name.clone().unwrap_or_default(),
            description: c.description.clone().unwrap_or_default(),
        })
    }

    /// Function names offered on the most recent completion call
    #[must_use]
    pub fn last_offered_functions(&self) -> Vec<String> {
        self.last_functions.lock().clone()
    }

    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn default_responder(history: &[ChatMessage]) -> Vec<ChatMessage> {
    let reply = history
        .iter()
        .rev()
        .find(|m| m.kind == super::types::MessageKind::User)
        .map_or_else(
            || "Hello! How can I help?".to_string(),
            |m| format!("You said: {}", m.text),
        );
    vec![ChatMessage::bot(reply)]
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn ensure_contact(&self, request: EnsureContactRequest) -> StoreResult<ContactRef> {
        self.ensure_contact_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        let contact = inner
            .contacts
            .entry(request.fingerprint)
            .or_insert_with(|| StoredContact {
                id: ContactId::new(format!("ctc_{}", Uuid::new_v4().simple())),
                email: request.email,
            });
        Ok(ContactRef {
            id: contact.id.clone(),
        })
    }

    async fn list_bots(&self) -> StoreResult<Vec<BotRecord>> {
        Ok(self.inner.lock().bots.clone())
    }

    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> StoreResult<ConversationRef> {
        self.create_conversation_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let conversation = StoredConversation {
            id: ConversationId::new(format!("con_{}", Uuid::new_v4().simple())),
            contact_id: request.contact_id,
            name: None,
            description: None,
            created_at: Self::now(),
            seq: inner.seq,
            messages: Vec::new(),
        };
        let id = conversation.id.clone();
        inner.conversations.insert(id.clone(), conversation);
        Ok(ConversationRef { id })
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        label: ConversationLabel,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let conversation = inner
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        conversation.name = Some(label.name);
        conversation.description = Some(label.description);
        Ok(())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> StoreResult<()> {
        self.inner
            .lock()
            .conversations
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }

    async fn list_conversations(
        &self,
        contact_id: &ContactId,
        query: ListQuery,
    ) -> StoreResult<Vec<ConversationRecord>> {
        let inner = self.inner.lock();
        let mut owned: Vec<&StoredConversation> = inner
            .conversations
            .values()
            .filter(|c| &c.contact_id == contact_id)
            .collect();
        owned.sort_by_key(|c| c.seq);
        if query.order == SortOrder::Desc {
            owned.reverse();
        }
        Ok(owned
            .into_iter()
            .take(query.take)
            .map(|c| ConversationRecord {
                id: c.id.clone(),
                name: c.name.clone(),
                description: c.description.clone(),
                created_at: c.created_at.clone(),
            })
            .collect())
    }

    async fn list_messages(&self, id: &ConversationId) -> StoreResult<Vec<StoredMessage>> {
        self.inner
            .lock()
            .conversations
            .get(id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }

    async fn create_message(
        &self,
        id: &ConversationId,
        message: NewMessage,
    ) -> StoreResult<MessageId> {
        self.create_message_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        let conversation = inner
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        let stored = StoredMessage {
            id: MessageId::new(format!("msg_{}", Uuid::new_v4().simple())),
            kind: message.kind,
            text: message.text,
            created_at: Self::now(),
        };
        let message_id = stored.id.clone();
        conversation.messages.push(stored);
        Ok(message_id)
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> StoreResult<mpsc::Receiver<ModelEvent>> {
        *self.last_functions.lock() = request.functions.iter().map(|f| f.name.clone()).collect();

        let replies = {
            let responder = self.responder.read();
            (responder.as_ref())(&request.messages)
        };
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut all_messages = request.messages;

            for (index, reply) in replies.iter().enumerate() {
                if index + 1 == replies.len() {
                    // Stream the final reply token by token
                    for token in reply.text.split_inclusive(' ') {
                        let _ = tx.send(ModelEvent::Token(token.to_string())).await;
                    }
                } else {
                    let _ = tx.send(ModelEvent::Message(reply.clone())).await;
                }
            }

            all_messages.extend(replies);
            let _ = tx
                .send(ModelEvent::Finished {
                    messages: all_messages,
                })
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::MessageKind;

    fn ensure_request(fingerprint: &str) -> EnsureContactRequest {
        EnsureContactRequest {
            fingerprint: fingerprint.to_string(),
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ensure_contact_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.ensure_contact(ensure_request("fp-1")).await.unwrap();
        let second = store.ensure_contact(ensure_request("fp-1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.contact_count(), 1);
        assert_eq!(store.ensure_contact_calls(), 2);
    }

    #[tokio::test]
    async fn test_message_order_is_call_order() {
        let store = MemoryStore::new();
        let contact = store.ensure_contact(ensure_request("fp-1")).await.unwrap();
        let conversation = store
            .create_conversation(CreateConversationRequest {
                contact_id: contact.id,
                bot_id: None,
            })
            .await
            .unwrap();

        for text in ["one", "two", "three"] {
            store
                .create_message(
                    &conversation.id,
                    NewMessage {
                        kind: MessageKind::User,
                        text: text.to_string(),
                    },
                )
                .await
                .unwrap();
        }

        let listed = store.list_messages(&conversation.id).await.unwrap();
        let texts: Vec<&str> = listed.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_list_conversations_desc_and_take() {
        let store = MemoryStore::new();
        let contact = store.ensure_contact(ensure_request("fp-1")).await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let conversation = store
                .create_conversation(CreateConversationRequest {
                    contact_id: contact.id.clone(),
                    bot_id: None,
                })
                .await
                .unwrap();
            ids.push(conversation.id);
        }

        let listed = store
            .list_conversations(
                &contact.id,
                ListQuery {
                    order: SortOrder::Desc,
                    take: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, ids[2]);
        assert_eq!(listed[1].id, ids[1]);
    }

    #[tokio::test]
    async fn test_deleted_conversation_is_gone() {
        let store = MemoryStore::new();
        let contact = store.ensure_contact(ensure_request("fp-1")).await.unwrap();
        let conversation = store
            .create_conversation(CreateConversationRequest {
                contact_id: contact.id,
                bot_id: None,
            })
            .await
            .unwrap();

        store.delete_conversation(&conversation.id).await.unwrap();
        assert!(matches!(
            store.list_messages(&conversation.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_tokens_reassemble_reply() {
        let store = MemoryStore::new();
        let mut rx = store
            .stream_completion(CompletionRequest {
                persona: crate::store::types::Persona::Inline {
                    backstory: String::new(),
                    model: "test".to_string(),
                },
                contact_id: None,
                messages: vec![ChatMessage::user("hello there")],
                functions: vec![],
            })
            .await
            .unwrap();

        let mut tokens = String::new();
        let mut finished = None;
        while let Some(event) = rx.recv().await {
            match event {
                ModelEvent::Token(t) => tokens.push_str(&t),
                ModelEvent::Finished { messages } => finished = Some(messages),
                _ => {}
            }
        }

        let finished = finished.unwrap();
        assert_eq!(finished.len(), 2);
        assert_eq!(tokens, finished[1].text);
        assert_eq!(finished[1].text, "You said: hello there");
    }
}
