//! Upstream connector backed by the Gemini Live WebSocket API.

use crate::types::{self, ServerMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use relay_core::{
    protocol::{MediaChunk, SessionSetup},
    upstream::{
        UpstreamConnector, UpstreamConnectorFactory, UpstreamEvent, UpstreamReceiver,
        UpstreamSender, UpstreamSession,
    },
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, info, warn};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_API_VERSION: &str = "v1alpha";
pub const DEFAULT_BASE_URL: &str = "wss://generativelanguage.googleapis.com";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("Gemini closed the connection during setup: {0}")]
    ClosedDuringSetup(String),
    #[error("unexpected message during Gemini setup: {0}")]
    UnexpectedSetupMessage(String),
}

/// Connection parameters for Gemini Live.
#[derive(Debug, Clone)]
pub struct GeminiLiveConfig {
    api_key: SecretString,
    model: String,
    api_version: String,
    base_url: String,
}

impl GeminiLiveConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Overrides the scheme and host, e.g. `ws://127.0.0.1:9000` for a local stand-in.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!(
            "{}/ws/google.ai.generativelanguage.{}.GenerativeService.BidiGenerateContent?key={}",
            self.base_url,
            self.api_version,
            self.api_key.expose_secret()
        )
    }
}

/// Opens one Gemini Live WebSocket per relay session.
pub struct GeminiLiveClient {
    config: GeminiLiveConfig,
}

impl GeminiLiveClient {
    pub fn new(config: GeminiLiveConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl UpstreamConnector for GeminiLiveClient {
    async fn connect(&self, setup: &SessionSetup) -> Result<UpstreamSession> {
        let (ws_stream, _) = connect_async(self.config.url())
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        info!(model = %self.config.model, "Connected to Gemini Live WebSocket.");
        let (mut gemini_tx, mut gemini_rx) = ws_stream.split();

        let setup_msg = types::setup_message(&self.config.model, setup);
        gemini_tx
            .send(WsMessage::Text(serde_json::to_string(&setup_msg)?.into()))
            .await
            .context("Failed to send setup message to Gemini")?;

        await_setup_complete(&mut gemini_rx).await?;
        info!("Gemini session setup is complete. Ready for bidirectional streaming.");

        Ok(UpstreamSession {
            sender: Box::new(GeminiSender { gemini_tx }),
            receiver: Box::new(GeminiReceiver { gemini_rx }),
        })
    }
}

/// Hands out a new [`GeminiLiveClient`] for every supervisor cycle.
pub struct GeminiLiveFactory {
    config: GeminiLiveConfig,
}

impl GeminiLiveFactory {
    pub fn new(config: GeminiLiveConfig) -> Self {
        Self { config }
    }
}

impl UpstreamConnectorFactory for GeminiLiveFactory {
    fn create(&self) -> Result<Arc<dyn UpstreamConnector>> {
        Ok(Arc::new(GeminiLiveClient::new(self.config.clone())))
    }
}

fn payload(msg: &WsMessage) -> Option<&[u8]> {
    match msg {
        WsMessage::Text(text) => Some(text.as_str().as_bytes()),
        WsMessage::Binary(data) => Some(&data[..]),
        _ => None,
    }
}

/// The first data message after `setup` must be `setupComplete`.
async fn await_setup_complete(gemini_rx: &mut SplitStream<WsStream>) -> Result<()> {
    while let Some(msg_result) = gemini_rx.next().await {
        let msg = msg_result.context("Error reading Gemini setup response")?;
        if let WsMessage::Close(frame) = &msg {
            return Err(GeminiError::ClosedDuringSetup(format!("{:?}", frame)).into());
        }
        let Some(bytes) = payload(&msg) else {
            continue;
        };
        let server_msg: ServerMessage =
            serde_json::from_slice(bytes).context("Failed to parse Gemini setup response")?;
        if server_msg.setup_complete.is_some() {
            return Ok(());
        }
        return Err(GeminiError::UnexpectedSetupMessage(
            String::from_utf8_lossy(bytes).into_owned(),
        )
        .into());
    }
    Err(GeminiError::ClosedDuringSetup("stream ended".to_string()).into())
}

struct GeminiSender {
    gemini_tx: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl UpstreamSender for GeminiSender {
    async fn send(&mut self, chunk: MediaChunk) -> Result<()> {
        let msg = types::realtime_input(&chunk);
        let payload = serde_json::to_string(&msg)?;
        self.gemini_tx
            .send(WsMessage::Text(payload.into()))
            .await
            .context("Failed to send media chunk to Gemini")?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.gemini_tx
            .close()
            .await
            .context("Failed to close Gemini WebSocket")?;
        Ok(())
    }
}

struct GeminiReceiver {
    gemini_rx: SplitStream<WsStream>,
}

#[async_trait]
impl UpstreamReceiver for GeminiReceiver {
    async fn next_event(&mut self) -> Option<Result<UpstreamEvent>> {
        loop {
            let msg = match self.gemini_rx.next().await? {
                Ok(msg) => msg,
                Err(e) => {
                    return Some(Err(
                        anyhow::Error::new(e).context("Error reading from Gemini WebSocket")
                    ));
                }
            };
            if let WsMessage::Close(frame) = &msg {
                info!(?frame, "Gemini WebSocket connection closed by server.");
                return None;
            }
            let Some(bytes) = payload(&msg) else {
                continue;
            };
            match serde_json::from_slice::<ServerMessage>(bytes) {
                Ok(server_msg) => {
                    return Some(
                        server_msg
                            .into_event()
                            .context("Gemini sent undecodable inline data"),
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Failed to parse Gemini message; skipping.");
                    debug!(raw = %String::from_utf8_lossy(bytes), "Unparsed Gemini message");
                }
            }
        }
    }
}
