//! Parley Core - Headless Chat Orchestration
//!
//! This crate provides the conversation-turn orchestration logic for
//! parley, completely independent of any UI framework. It can drive a TUI,
//! web UI, native GUI, or run headless for testing and automation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Chat Surfaces                          │
//! │            (render transcripts, collect input)               │
//! │                           │                                  │
//! │                     ChatSession                              │
//! │        restored buffer · live buffer · epoch counter         │
//! └───────────────────────────┼──────────────────────────────────┘
//!                             │ TurnRequest / TurnEvent
//! ┌───────────────────────────┼──────────────────────────────────┐
//! │                      Orchestrator                            │
//! │  ┌───────────┐  ┌────────────┐  ┌──────────────────────────┐ │
//! │  │  Session  │  │Fingerprint │  │      Turn Protocol       │ │
//! │  │  Provider │  │  Deriver   │  │  begin_turn / end_turn   │ │
//! │  └───────────┘  └────────────┘  └──────────────────────────┘ │
//! └───────────────────────────┼──────────────────────────────────┘
//!                             │ ConversationStore
//!              ┌──────────────┴───────────────┐
//!              │                              │
//!         HttpStore                      MemoryStore
//!    (hosted platform API)          (tests / headless dev)
//! ```
//!
//! # Key Types
//!
//! - [`Orchestrator`]: session-gated operations and the per-turn protocol
//! - [`ChatSession`] / [`SessionState`]: client-local session state machine
//! - [`ConversationStore`]: the nine-operation remote-store boundary
//! - [`TurnRequest`] / [`TurnEvent`]: the turn request/response contract
//! - [`derive_fingerprint`]: deterministic, one-way contact identity
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use parley_core::{
//!     auth::{AuthSession, Identity, StaticSessionProvider},
//!     ChatSession, MemoryStore, Orchestrator, OrchestratorConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let sessions = Arc::new(StaticSessionProvider::signed_in(AuthSession::new(
//!         Identity::new("alice@example.com", Some("Alice".to_string())),
//!     )));
//!     let orchestrator = Arc::new(Orchestrator::new(
//!         store,
//!         sessions,
//!         OrchestratorConfig::default(),
//!     ));
//!
//!     let mut session = ChatSession::new(orchestrator);
//!     session.connect().await;
//!
//!     let mut stream = session.submit("Hello!").await.unwrap();
//!     while let Some(event) = stream.next_event().await {
//!         session.apply_event(stream.epoch(), &event);
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`auth`]: authenticated-session access (provider trait + fixtures)
//! - [`config`]: TOML/env process configuration
//! - [`error`]: error taxonomy
//! - [`events`]: turn event stream types
//! - [`fingerprint`]: deterministic contact fingerprints
//! - [`logging`]: tracing setup shared with binaries
//! - [`orchestrator`]: session-gated store operations and turn driving
//! - [`session`]: client-local session state machine
//! - [`store`]: conversation-store boundary trait and bindings
//! - [`turn`]: the begin/end turn protocol and label derivation
//!
//! # No UI Dependencies
//!
//! This crate has **zero** dependencies on any UI framework. It's pure
//! orchestration logic that can be embedded anywhere.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod logging;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod turn;

// Re-exports for convenience
pub use auth::{AuthSession, Identity, SessionProvider, StaticSessionProvider};
pub use config::{default_config_path, load_config, load_config_from_path, ConfigError, ParleyConfig, ParleyToml};
pub use error::{Error, Result};
pub use events::{ConversationUpdate, TurnEvent};
pub use fingerprint::{derive_fingerprint, Fingerprint};
pub use orchestrator::{Bot, ConversationSummary, Orchestrator, OrchestratorConfig};
pub use session::{ChatSession, SessionState, TurnStream};
pub use store::{
    ConversationStore, HttpStore, HttpStoreConfig, MemoryStore, StoreError, StoreResult,
};
pub use store::types::{
    BotId, BotRecord, ChatMessage, ContactId, ConversationId, ConversationLabel, MessageId,
    MessageKind, StoredMessage,
};
pub use turn::{
    begin_turn, current_time_function, derive_label, end_turn, fallback_backstory, TurnHandle,
    TurnRequest, FALLBACK_MODEL, PLACEHOLDER_NAME,
};
