//! Hosted Platform Binding
//!
//! [`ConversationStore`] implementation over the hosted conversation
//! platform's REST API. All durable records live on the platform; this
//! binding is a thin, stateless HTTP client.
//!
//! # Streaming
//!
//! Turn completions are a single POST whose response body is
//! newline-delimited JSON events:
//!
//! ```text
//! {"type":"token","data":{"text":"Hel"}}
//! {"type":"token","data":{"text":"lo"}}
//! {"type":"function","data":{"id":"cal_1","name":"getCurrentTime"}}
//! {"type":"message","data":{"type":"bot","text":"..."}}
//! {"type":"finished","data":{"messages":[...]}}
//! ```
//!
//! `function` events are answered out-of-band: the locally registered
//! handler runs and its result is POSTed to the platform's callback
//! endpoint, after which the platform resumes the stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{
    AgentFunction, BotRecord, ChatMessage, CompletionRequest, ContactId, ContactRef,
    ConversationId, ConversationLabel, ConversationRecord, ConversationRef,
    CreateConversationRequest, EnsureContactRequest, ListQuery, MessageId, ModelEvent, NewMessage,
    Persona, StoredMessage,
};
use super::{ConversationStore, StoreError, StoreResult};

/// Capacity of the completion event channel
const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Configuration for the platform binding
#[derive(Clone, Debug)]
pub struct HttpStoreConfig {
    /// Base URL of the platform API (no trailing slash)
    pub base_url: String,
    /// API credential sent as a bearer token
    pub api_secret: String,
    /// Per-request timeout for non-streaming calls
    pub request_timeout: Duration,
}

impl HttpStoreConfig {
    /// Create a configuration with the default request timeout
    pub fn new(base_url: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_secret: api_secret.into(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Reqwest-backed platform client
#[derive(Clone)]
pub struct HttpStore {
    config: HttpStoreConfig,
    http_client: reqwest::Client,
}

/// `{"items": [...]}` listing envelope used by the platform
#[derive(serde::Deserialize)]
struct Items<T> {
    items: Vec<T>,
}

impl HttpStore {
    /// Create a client from configuration.
    ///
    /// Fails when the underlying HTTP client cannot be constructed (e.g. no
    /// TLS backend available).
    pub fn new(config: HttpStoreConfig) -> StoreResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.config.api_secret)
    }

    /// Map a transport error, distinguishing timeouts
    fn map_transport(error: reqwest::Error) -> StoreError {
        if error.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Transport(error)
        }
    }

    /// Surface non-2xx responses as API errors
    async fn check(response: reqwest::Response) -> StoreResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(message));
        }
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> StoreResult<T>
    where
        B: serde::Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .authorized(self.http_client.post(self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(Self::map_transport)?;
        let response = Self::check(response).await?;
        response.json().await.map_err(Self::map_transport)
    }

    async fn get_json<T>(&self, path: &str) -> StoreResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .authorized(self.http_client.get(self.url(path)))
            .send()
            .await
            .map_err(Self::map_transport)?;
        let response = Self::check(response).await?;
        response.json().await.map_err(Self::map_transport)
    }

    /// Build the completion POST body
    fn completion_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": request.messages,
            "functions": request
                .functions
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "name": f.name,
                        "description": f.description,
                        "parameters": {},
                    })
                })
                .collect::<Vec<_>>(),
        });

        match &request.persona {
            Persona::Bot(bot_id) => {
                body["botId"] = serde_json::json!(bot_id);
            }
            Persona::Inline { backstory, model } => {
                body["backstory"] = serde_json::json!(backstory);
                body["model"] = serde_json::json!(model);
            }
        }

        if let Some(contact_id) = &request.contact_id {
            body["contactId"] = serde_json::json!(contact_id);
        }

        body
    }

    /// Answer a `function` stream event via the callback endpoint
    async fn answer_function_call(
        client: &reqwest::Client,
        base_url: &str,
        secret: &str,
        call_id: &str,
        functions: &[AgentFunction],
        name: &str,
    ) {
        let Some(function) = functions.iter().find(|f| f.name == name) else {
            warn!(function = name, "model called an unregistered function");
            return;
        };

        let result = function.invoke();
        let url = format!(
            "{}/v1/conversation/complete/function/{}",
            base_url.trim_end_matches('/'),
            call_id
        );

        if let Err(error) = client
            .post(url)
            .bearer_auth(secret)
            .json(&serde_json::json!({ "result": result }))
            .send()
            .await
        {
            warn!(%error, function = name, "failed to deliver function result");
        }
    }
}

/// One decoded line of the completion stream
#[derive(Debug)]
enum WireEvent {
    Token(String),
    Message(ChatMessage),
    Function { id: String, name: String },
    Finished(Vec<ChatMessage>),
}

/// Decode one newline-delimited stream event.
///
/// Unknown or malformed lines are skipped (forward compatibility with new
/// platform event types).
fn parse_event_line(line: &str) -> Option<WireEvent> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let data = value.get("data")?;

    match value.get("type")?.as_str()? {
        "token" => Some(WireEvent::Token(data.get("text")?.as_str()?.to_string())),
        "message" => serde_json::from_value(data.clone()).ok().map(WireEvent::Message),
        "function" => Some(WireEvent::Function {
            id: data.get("id")?.as_str()?.to_string(),
            name: data.get("name")?.as_str()?.to_string(),
        }),
        "finished" => serde_json::from_value(data.get("messages")?.clone())
            .ok()
            .map(WireEvent::Finished),
        other => {
            debug!(event = other, "skipping unrecognized stream event");
            None
        }
    }
}

#[async_trait]
impl ConversationStore for HttpStore {
    async fn ensure_contact(&self, request: EnsureContactRequest) -> StoreResult<ContactRef> {
        self.post_json("/v1/contact/ensure", &request).await
    }

    async fn list_bots(&self) -> StoreResult<Vec<BotRecord>> {
        let envelope: Items<BotRecord> = self.get_json("/v1/bot/list").await?;
        Ok(envelope.items)
    }

    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> StoreResult<ConversationRef> {
        self.post_json("/v1/conversation/create", &request).await
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        label: ConversationLabel,
    ) -> StoreResult<()> {
        let path = format!("/v1/conversation/{id}/update");
        let _: serde_json::Value = self.post_json(&path, &label).await?;
        Ok(())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> StoreResult<()> {
        let path = format!("/v1/conversation/{id}/delete");
        let _: serde_json::Value = self.post_json(&path, &serde_json::json!({})).await?;
        Ok(())
    }

    async fn list_conversations(
        &self,
        contact_id: &ContactId,
        query: ListQuery,
    ) -> StoreResult<Vec<ConversationRecord>> {
        let path = format!(
            "/v1/contact/{contact_id}/conversation/list?order={}&take={}",
            query.order, query.take
        );
        let envelope: Items<ConversationRecord> = self.get_json(&path).await?;
        Ok(envelope.items)
    }

    async fn list_messages(&self, id: &ConversationId) -> StoreResult<Vec<StoredMessage>> {
        let path = format!("/v1/conversation/{id}/message/list");
        let envelope: Items<StoredMessage> = self.get_json(&path).await?;
        Ok(envelope.items)
    }

    async fn create_message(
        &self,
        id: &ConversationId,
        message: NewMessage,
    ) -> StoreResult<MessageId> {
        let path = format!("/v1/conversation/{id}/message/create");
        let created: serde_json::Value = self.post_json(&path, &message).await?;
        let id = created
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::NotFound("message id in create response".to_string()))?;
        Ok(MessageId::new(id))
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> StoreResult<mpsc::Receiver<ModelEvent>> {
        let body = Self::completion_body(&request);
        let response = self
            .authorized(
                self.http_client
                    .post(self.url("/v1/conversation/complete"))
                    // Streams run as long as the model talks; the default
                    // request timeout would cut long turns short.
                    .timeout(Duration::from_secs(600)),
            )
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport)?;
        let response = Self::check(response).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let mut stream = response.bytes_stream();
        let client = self.http_client.clone();
        let base_url = self.config.base_url.clone();
        let secret = self.config.api_secret.clone();
        let functions = request.functions;

        tokio::spawn(async move {
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        let _ = tx.send(ModelEvent::Error(error.to_string())).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Parse newline-delimited JSON events
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer = buffer[pos + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }

                    match parse_event_line(&line) {
                        Some(WireEvent::Token(text)) => {
                            // Receiver may already be dropped; keep draining
                            // so the platform sees the turn through.
                            let _ = tx.send(ModelEvent::Token(text)).await;
                        }
                        Some(WireEvent::Message(message)) => {
                            let _ = tx.send(ModelEvent::Message(message)).await;
                        }
                        Some(WireEvent::Function { id, name }) => {
                            Self::answer_function_call(
                                &client, &base_url, &secret, &id, &functions, &name,
                            )
                            .await;
                        }
                        Some(WireEvent::Finished(messages)) => {
                            let _ = tx.send(ModelEvent::Finished { messages }).await;
                            return;
                        }
                        None => {}
                    }
                }
            }

            // Stream ended without a finished event; the channel closing
            // signals the abort to the consumer.
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{BotId, MessageKind};

    #[test]
    fn test_completion_body_with_bot() {
        let request = CompletionRequest {
            persona: Persona::Bot(BotId::from("bot_1")),
            contact_id: Some(ContactId::from("ctc_1")),
            messages: vec![ChatMessage::user("hi")],
            functions: vec![],
        };
        let body = HttpStore::completion_body(&request);
        assert_eq!(body["botId"], "bot_1");
        assert_eq!(body["contactId"], "ctc_1");
        assert_eq!(body["messages"][0]["type"], "user");
        assert!(body.get("backstory").is_none());
    }

    #[test]
    fn test_completion_body_with_inline_persona() {
        let request = CompletionRequest {
            persona: Persona::Inline {
                backstory: "You are terse.".to_string(),
                model: "gpt-4o".to_string(),
            },
            contact_id: None,
            messages: vec![],
            functions: vec![AgentFunction::new("getCurrentTime", "time", || {
                serde_json::json!({})
            })],
        };
        let body = HttpStore::completion_body(&request);
        assert_eq!(body["backstory"], "You are terse.");
        assert_eq!(body["model"], "gpt-4o");
        assert!(body.get("contactId").is_none());
        assert_eq!(body["functions"][0]["name"], "getCurrentTime");
    }

    #[test]
    fn test_parse_token_event() {
        let event = parse_event_line(r#"{"type":"token","data":{"text":"Hel"}}"#);
        assert!(matches!(event, Some(WireEvent::Token(t)) if t == "Hel"));
    }

    #[test]
    fn test_parse_finished_event() {
        let line = r#"{"type":"finished","data":{"messages":[{"type":"user","text":"hi"},{"type":"bot","text":"hello"}]}}"#;
        match parse_event_line(line) {
            Some(WireEvent::Finished(messages)) => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[1].kind, MessageKind::Bot);
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_skips_unknown_and_garbage() {
        assert!(parse_event_line(r#"{"type":"usage","data":{"tokens":12}}"#).is_none());
        assert!(parse_event_line("not json").is_none());
    }
}
