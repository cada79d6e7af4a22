//! Daemon Server
//!
//! Serves the chat orchestrator to thin clients over a Unix socket using a
//! JSON-lines protocol: one JSON object per line, each carrying a caller
//! chosen `id` that is echoed on every reply.
//!
//! # Protocol
//!
//! ```text
//! → {"id":1,"op":"handshake","token":"...","email":"alice@example.com","name":"Alice"}
//! ← {"id":1,"reply":"handshake_ack"}
//! → {"id":2,"op":"ensure_contact"}
//! ← {"id":2,"reply":"contact","contact_id":"ctc_..."}
//! → {"id":3,"op":"submit_turn","messages":[...],...}
//! ← {"id":3,"reply":"turn_event","event":{...}}      (repeated)
//! ← {"id":3,"reply":"turn_done"}
//! ```
//!
//! The handshake must be the first request on a connection; its identity
//! becomes the connection's authenticated session (expiring after 24 hours,
//! matching the upstream identity provider's session lifetime). Requests on
//! a connection are handled sequentially, so turn event streams are never
//! interleaved with other replies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use parley_core::auth::{AuthSession, Identity, StaticSessionProvider};
use parley_core::store::types::{BotId, ChatMessage, ContactId, ConversationId, StoredMessage};
use parley_core::{
    Bot, ConversationStore, ConversationSummary, Orchestrator, OrchestratorConfig, TurnEvent,
    TurnRequest,
};

/// Requests accepted from clients
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Authenticate the connection; must be the first request
    Handshake {
        /// Shared daemon token
        token: String,
        /// Authenticated user's email
        email: String,
        /// Authenticated user's display name
        name: Option<String>,
    },
    /// Resolve the contact for the connection's user
    EnsureContact,
    /// List the bots exposed to this deployment
    ListBots,
    /// List a contact's conversations
    ListConversations {
        /// Contact to list for
        contact_id: ContactId,
    },
    /// Fetch a conversation's restorable transcript
    FetchMessages {
        /// Conversation to fetch
        conversation_id: ConversationId,
    },
    /// Delete a conversation
    DeleteConversation {
        /// Conversation to delete
        conversation_id: ConversationId,
    },
    /// Run one chat turn; replies stream until `turn_done`
    SubmitTurn {
        /// Bot to complete with
        bot_id: Option<BotId>,
        /// Contact the turn belongs to
        contact_id: Option<ContactId>,
        /// Conversation to resume
        conversation_id: Option<ConversationId>,
        /// Full message history, new user message last
        messages: Vec<ChatMessage>,
    },
}

/// Replies sent to clients
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum DaemonResponse {
    /// Handshake accepted
    HandshakeAck,
    /// Resolved contact id
    Contact {
        /// Store-assigned contact id
        contact_id: ContactId,
    },
    /// Bot listing
    Bots {
        /// Bots visible to this deployment
        items: Vec<Bot>,
    },
    /// Conversation listing
    Conversations {
        /// Most recent first
        items: Vec<ConversationSummary>,
    },
    /// Restorable transcript
    Messages {
        /// User/bot messages in persisted order
        items: Vec<StoredMessage>,
    },
    /// Conversation deleted
    Deleted,
    /// One event of a streaming turn
    TurnEvent {
        /// The event
        event: TurnEvent,
    },
    /// A streaming turn finished (terminal for that request id)
    TurnDone,
    /// The request failed
    Error {
        /// Error description
        message: String,
    },
}

/// One request line
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Caller-chosen correlation id
    pub id: u64,
    /// The request
    #[serde(flatten)]
    pub request: DaemonRequest,
}

/// One reply line
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Echoed correlation id (0 when the request line was unreadable)
    pub id: u64,
    /// The reply
    #[serde(flatten)]
    pub response: DaemonResponse,
}

struct ConnectionInfo {
    email: String,
}

/// The daemon server: accepts connections and drives per-connection
/// orchestrators
pub struct DaemonServer<S> {
    store: Arc<S>,
    orchestrator_config: OrchestratorConfig,
    token: String,
    connections: DashMap<u64, ConnectionInfo>,
    next_connection_id: AtomicU64,
}

impl<S: ConversationStore + 'static> DaemonServer<S> {
    /// Create a server over a store binding
    pub fn new(store: Arc<S>, orchestrator_config: OrchestratorConfig, token: String) -> Self {
        Self {
            store,
            orchestrator_config,
            token,
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Number of currently authenticated connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Accept-and-serve loop; runs until the task is aborted
    pub async fn run(self: Arc<Self>, listener: UnixListener) -> Result<()> {
        info!("daemon accepting connections");
        loop {
            let (stream, _addr) = listener.accept().await?;
            let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                debug!(connection = connection_id, "connection opened");
                if let Err(error) = server.handle_connection(stream, connection_id).await {
                    debug!(connection = connection_id, %error, "connection ended");
                }
                if let Some((_, info)) = server.connections.remove(&connection_id) {
                    debug!(connection = connection_id, email = %info.email, "connection closed");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: UnixStream, connection_id: u64) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // First line must be a valid handshake
        let Some(first) = lines.next_line().await? else {
            return Ok(());
        };
        let orchestrator = match self.authenticate(&first, connection_id).await {
            Ok((envelope_id, orchestrator)) => {
                write_response(
                    &mut write_half,
                    envelope_id,
                    DaemonResponse::HandshakeAck,
                )
                .await?;
                orchestrator
            }
            Err((envelope_id, message)) => {
                warn!(connection = connection_id, %message, "handshake refused");
                write_response(
                    &mut write_half,
                    envelope_id,
                    DaemonResponse::Error { message },
                )
                .await?;
                return Ok(());
            }
        };

        // Request loop: one request at a time per connection
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let envelope: RequestEnvelope = match serde_json::from_str(&line) {
                Ok(envelope) => envelope,
                Err(error) => {
                    write_response(
                        &mut write_half,
                        0,
                        DaemonResponse::Error {
                            message: format!("unreadable request: {error}"),
                        },
                    )
                    .await?;
                    continue;
                }
            };

            self.handle_request(&orchestrator, envelope, &mut write_half)
                .await?;
        }

        Ok(())
    }

    /// Validate the handshake line and build the connection's orchestrator
    async fn authenticate(
        &self,
        line: &str,
        connection_id: u64,
    ) -> std::result::Result<(u64, Orchestrator<S>), (u64, String)> {
        let envelope: RequestEnvelope = serde_json::from_str(line)
            .map_err(|error| (0, format!("unreadable handshake: {error}")))?;

        let DaemonRequest::Handshake { token, email, name } = envelope.request else {
            return Err((envelope.id, "handshake required".to_string()));
        };

        if !constant_time_eq(token.as_bytes(), self.token.as_bytes()) {
            return Err((envelope.id, "invalid token".to_string()));
        }

        let identity = Identity::new(email.clone(), name);
        let session = AuthSession::with_expiry(
            identity,
            chrono::Utc::now() + chrono::Duration::hours(24),
        );
        let sessions = Arc::new(StaticSessionProvider::signed_in(session));

        self.connections
            .insert(connection_id, ConnectionInfo { email });

        Ok((
            envelope.id,
            Orchestrator::new(
                Arc::clone(&self.store),
                sessions,
                self.orchestrator_config.clone(),
            ),
        ))
    }

    async fn handle_request(
        &self,
        orchestrator: &Orchestrator<S>,
        envelope: RequestEnvelope,
        write_half: &mut OwnedWriteHalf,
    ) -> Result<()> {
        let id = envelope.id;
        match envelope.request {
            DaemonRequest::Handshake { .. } => {
                write_response(
                    write_half,
                    id,
                    DaemonResponse::Error {
                        message: "already authenticated".to_string(),
                    },
                )
                .await
            }
            DaemonRequest::EnsureContact => {
                let response = match orchestrator.ensure_contact().await {
                    Ok(contact_id) => DaemonResponse::Contact { contact_id },
                    Err(error) => error_response(&error),
                };
                write_response(write_half, id, response).await
            }
            DaemonRequest::ListBots => {
                let response = match orchestrator.list_bots().await {
                    Ok(items) => DaemonResponse::Bots { items },
                    Err(error) => error_response(&error),
                };
                write_response(write_half, id, response).await
            }
            DaemonRequest::ListConversations { contact_id } => {
                let response = match orchestrator.list_conversations(&contact_id).await {
                    Ok(items) => DaemonResponse::Conversations { items },
                    Err(error) => error_response(&error),
                };
                write_response(write_half, id, response).await
            }
            DaemonRequest::FetchMessages { conversation_id } => {
                let response = match orchestrator.fetch_messages(&conversation_id).await {
                    Ok(items) => DaemonResponse::Messages { items },
                    Err(error) => error_response(&error),
                };
                write_response(write_half, id, response).await
            }
            DaemonRequest::DeleteConversation { conversation_id } => {
                let response = match orchestrator.delete_conversation(&conversation_id).await {
                    Ok(()) => DaemonResponse::Deleted,
                    Err(error) => error_response(&error),
                };
                write_response(write_half, id, response).await
            }
            DaemonRequest::SubmitTurn {
                bot_id,
                contact_id,
                conversation_id,
                messages,
            } => {
                let request = TurnRequest {
                    bot_id,
                    contact_id,
                    conversation_id,
                    messages,
                };
                match orchestrator.complete_turn(request).await {
                    Ok(mut events) => {
                        while let Some(event) = events.recv().await {
                            write_response(write_half, id, DaemonResponse::TurnEvent { event })
                                .await?;
                        }
                        write_response(write_half, id, DaemonResponse::TurnDone).await
                    }
                    Err(error) => write_response(write_half, id, error_response(&error)).await,
                }
            }
        }
    }
}

fn error_response(error: &parley_core::Error) -> DaemonResponse {
    DaemonResponse::Error {
        message: error.to_string(),
    }
}

async fn write_response(
    write_half: &mut OwnedWriteHalf,
    id: u64,
    response: DaemonResponse,
) -> Result<()> {
    let envelope = ResponseEnvelope { id, response };
    let mut line = serde_json::to_string(&envelope)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.flush().await?;
    Ok(())
}

/// Length-leaking-only comparison for handshake tokens
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::MemoryStore;
    use tokio::io::AsyncWriteExt;

    const TOKEN: &str = "test-token";

    async fn start_server() -> (Arc<MemoryStore>, std::path::PathBuf, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("parley.sock");
        let store = Arc::new(MemoryStore::new());
        let server = Arc::new(DaemonServer::new(
            Arc::clone(&store),
            OrchestratorConfig::default(),
            TOKEN.to_string(),
        ));
        let listener = UnixListener::bind(&socket_path).unwrap();
        tokio::spawn(server.run(listener));
        (store, socket_path, dir)
    }

    async fn connect(path: &std::path::Path) -> (tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>, OwnedWriteHalf) {
        let stream = UnixStream::connect(path).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        (BufReader::new(read_half).lines(), write_half)
    }

    async fn send(write_half: &mut OwnedWriteHalf, value: serde_json::Value) {
        let mut line = value.to_string();
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.unwrap();
        write_half.flush().await.unwrap();
    }

    async fn read_envelope(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    ) -> serde_json::Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    fn handshake(token: &str) -> serde_json::Value {
        serde_json::json!({
            "id": 1,
            "op": "handshake",
            "token": token,
            "email": "alice@example.com",
            "name": "Alice",
        })
    }

    #[test]
    fn test_request_round_trip() {
        let raw = r#"{"id":7,"op":"submit_turn","bot_id":null,"contact_id":"ctc_1","conversation_id":null,"messages":[{"type":"user","text":"hi"}]}"#;
        let envelope: RequestEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.id, 7);
        assert!(matches!(
            envelope.request,
            DaemonRequest::SubmitTurn { .. }
        ));
        let back = serde_json::to_string(&envelope).unwrap();
        let reparsed: RequestEnvelope = serde_json::from_str(&back).unwrap();
        assert_eq!(reparsed.id, 7);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[tokio::test]
    async fn test_handshake_rejects_bad_token() {
        let (_store, socket_path, _dir) = start_server().await;
        let (mut lines, mut write_half) = connect(&socket_path).await;

        send(&mut write_half, handshake("wrong")).await;
        let reply = read_envelope(&mut lines).await;
        assert_eq!(reply["reply"], "error");
        assert_eq!(reply["message"], "invalid token");
    }

    #[tokio::test]
    async fn test_requests_before_handshake_are_refused() {
        let (store, socket_path, _dir) = start_server().await;
        let (mut lines, mut write_half) = connect(&socket_path).await;

        send(&mut write_half, serde_json::json!({"id": 1, "op": "ensure_contact"})).await;
        let reply = read_envelope(&mut lines).await;
        assert_eq!(reply["reply"], "error");
        assert_eq!(store.ensure_contact_calls(), 0);
    }

    #[tokio::test]
    async fn test_full_chat_flow_over_socket() {
        let (store, socket_path, _dir) = start_server().await;
        let (mut lines, mut write_half) = connect(&socket_path).await;

        send(&mut write_half, handshake(TOKEN)).await;
        let reply = read_envelope(&mut lines).await;
        assert_eq!(reply["reply"], "handshake_ack");

        send(&mut write_half, serde_json::json!({"id": 2, "op": "ensure_contact"})).await;
        let reply = read_envelope(&mut lines).await;
        assert_eq!(reply["reply"], "contact");
        let contact_id = reply["contact_id"].as_str().unwrap().to_string();

        send(
            &mut write_half,
            serde_json::json!({
                "id": 3,
                "op": "submit_turn",
                "bot_id": null,
                "contact_id": contact_id,
                "conversation_id": null,
                "messages": [{"type": "user", "text": "hello daemon"}],
            }),
        )
        .await;

        let mut saw_conversation = false;
        let mut saw_finished = false;
        loop {
            let reply = read_envelope(&mut lines).await;
            assert_eq!(reply["id"], 3);
            match reply["reply"].as_str().unwrap() {
                "turn_event" => {
                    let event = &reply["event"];
                    if event.get("Conversation").is_some() {
                        saw_conversation = true;
                    }
                    if event.get("Finished").is_some() {
                        saw_finished = true;
                    }
                }
                "turn_done" => break,
                other => panic!("unexpected reply {other}"),
            }
        }
        assert!(saw_conversation, "turn must report the conversation id");
        assert!(saw_finished, "turn must end with a finished event");
        assert_eq!(store.create_conversation_calls(), 1);
        assert_eq!(store.create_message_calls(), 2);
    }
}
