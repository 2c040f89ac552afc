//! The contract between the relay and the conversational AI streaming endpoint.
//!
//! A connector opens one upstream session per client and hands it back split
//! into a sending half and a receiving half, so the two relay loops can each
//! own one side without sharing anything.

use crate::protocol::{MediaChunk, SessionSetup};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// One piece of a model turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    /// Raw (already decoded) binary payload, typically PCM16 audio.
    InlineData { mime_type: String, data: Bytes },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub turn_complete: bool,
}

/// A single event received from the upstream session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamEvent {
    /// `None` for control traffic the relay does not act on.
    pub server_content: Option<ServerContent>,
}

impl UpstreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_parts(vec![Part::Text(text.into())])
    }

    pub fn audio(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::with_parts(vec![Part::InlineData {
            mime_type: mime_type.into(),
            data: data.into(),
        }])
    }

    pub fn with_parts(parts: Vec<Part>) -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: Some(ModelTurn { parts }),
                turn_complete: false,
            }),
        }
    }

    pub fn turn_complete() -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: None,
                turn_complete: true,
            }),
        }
    }
}

/// The client-to-upstream half of an upstream session.
#[async_trait]
pub trait UpstreamSender: Send {
    async fn send(&mut self, chunk: MediaChunk) -> Result<()>;

    /// Closes the upstream session politely. Dropping the sender without
    /// calling this must still release the underlying connection.
    async fn close(&mut self) -> Result<()>;
}

/// The upstream-to-client half of an upstream session.
#[async_trait]
pub trait UpstreamReceiver: Send {
    /// Waits for the next event. `None` means the upstream closed the session.
    ///
    /// Must be cancel safe: the relay polls it inside `tokio::select!`.
    async fn next_event(&mut self) -> Option<Result<UpstreamEvent>>;
}

/// A live upstream session, split for concurrent use.
pub struct UpstreamSession {
    pub sender: Box<dyn UpstreamSender>,
    pub receiver: Box<dyn UpstreamReceiver>,
}

/// Opens upstream sessions.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Opens a session and completes its setup handshake.
    async fn connect(&self, setup: &SessionSetup) -> Result<UpstreamSession>;
}

/// Builds connectors. The supervisor asks for a fresh one on every recovery
/// cycle instead of reusing a long-lived client.
pub trait UpstreamConnectorFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn UpstreamConnector>>;
}
