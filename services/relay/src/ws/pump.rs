//! The session pump: one client connection, one upstream session, two loops.
//!
//! The send loop forwards client media upstream; the receive loop relays model
//! output back, accumulating each turn and transcribing its audio. Neither loop
//! cancels the other. Each one watches the other's liveness flag and winds
//! down at its next suspension point, so both always run to completion before
//! the upstream halves are released.

use crate::{
    registry::SessionId,
    supervisor::{ResetCause, ResetHandle},
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use relay_core::{
    accumulator::{FlushedTurn, TurnAccumulator},
    protocol::{ClientFrame, OutboundMessage, SessionSetup, SetupError},
    transcription::TranscriptionAdapter,
    upstream::{Part, UpstreamConnector, UpstreamReceiver, UpstreamSender, UpstreamSession},
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

/// A frame read from the client connection, stripped of transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Bytes),
    Closed(CloseKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseKind {
    Normal,
    Abnormal(String),
}

/// Failures that end a session. All but [`SessionError::RelayReset`] trigger
/// a relay reset.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid setup frame: {0}")]
    Setup(#[from] SetupError),
    #[error("upstream handshake failed: {0:#}")]
    Handshake(anyhow::Error),
    #[error("upstream session failed: {0:#}")]
    Upstream(anyhow::Error),
    #[error("upstream closed the session while the client was still connected")]
    UpstreamClosed,
    #[error("relay is restarting")]
    RelayReset,
}

#[derive(Debug, thiserror::Error)]
#[error("client connection is gone")]
pub struct ClientGone;

/// The ordered outbound path to one client.
///
/// Every message goes through a single channel drained by one writer, so the
/// client sees messages in the order they were sent here.
#[derive(Debug, Clone)]
pub struct ClientSink {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ClientSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn send(&self, msg: OutboundMessage) -> Result<(), ClientGone> {
        self.tx.send(msg).await.map_err(|_| ClientGone)
    }

    /// Resolves once the writer side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Runs exactly one relay session.
pub struct SessionPump {
    session_id: SessionId,
    connector: Arc<dyn UpstreamConnector>,
    transcriber: TranscriptionAdapter,
    reset: ResetHandle,
    closing: watch::Receiver<bool>,
}

impl SessionPump {
    /// `closing` flips to `true` when the relay cycle that accepted this
    /// session is being torn down.
    pub fn new(
        session_id: SessionId,
        connector: Arc<dyn UpstreamConnector>,
        transcriber: TranscriptionAdapter,
        reset: ResetHandle,
        closing: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session_id,
            connector,
            transcriber,
            reset,
            closing,
        }
    }

    /// Drives the session to completion.
    ///
    /// On a session-fatal error the client is told the session is closed and a
    /// relay reset is requested before the error is returned. A session ended
    /// by a relay reset only tells its client.
    #[instrument(name = "session", skip_all, fields(session_id = %self.session_id))]
    pub async fn run<S>(&self, inbound: S, client: ClientSink) -> Result<(), SessionError>
    where
        S: Stream<Item = InboundFrame> + Unpin + Send,
    {
        let result = self.relay(inbound, &client).await;
        match &result {
            Ok(()) => {}
            Err(SessionError::RelayReset) => {
                warn!("Relay is restarting; closing session.");
                let _ = client
                    .send(OutboundMessage::session_closed(
                        SessionError::RelayReset.to_string(),
                    ))
                    .await;
            }
            Err(e) => {
                error!(error = %e, "Session failed; requesting relay reset.");
                let _ = client
                    .send(OutboundMessage::session_closed(e.to_string()))
                    .await;
                self.reset
                    .request(self.session_id, ResetCause::SessionFailed, e.to_string());
            }
        }
        info!("Session closed.");
        result
    }

    async fn relay<S>(&self, mut inbound: S, client: &ClientSink) -> Result<(), SessionError>
    where
        S: Stream<Item = InboundFrame> + Unpin + Send,
    {
        let setup = match inbound.next().await {
            Some(InboundFrame::Text(text)) => SessionSetup::from_first_frame(text.as_bytes())?,
            Some(InboundFrame::Binary(data)) => SessionSetup::from_first_frame(&data)?,
            Some(InboundFrame::Closed(_)) | None => {
                info!("Client disconnected before sending setup.");
                return Ok(());
            }
        };

        let UpstreamSession { sender, receiver } = self
            .connector
            .connect(&setup)
            .await
            .map_err(SessionError::Handshake)?;
        info!("Upstream session established.");

        let (client_alive_tx, client_alive_rx) = watch::channel(true);
        let (upstream_alive_tx, upstream_alive_rx) = watch::channel(true);

        let send = self.send_loop(inbound, sender, client, client_alive_tx, upstream_alive_rx);
        let receive = receive_loop(
            receiver,
            client,
            client_alive_rx,
            upstream_alive_tx,
            self.closing.clone(),
            &self.transcriber,
        );
        let ((), received) = tokio::join!(send, receive);
        received
    }

    /// Client-to-upstream loop. Per-frame failures are reported and skipped;
    /// nothing here ends the session with an error.
    async fn send_loop<S>(
        &self,
        mut inbound: S,
        mut upstream: Box<dyn UpstreamSender>,
        client: &ClientSink,
        client_alive: watch::Sender<bool>,
        mut upstream_alive: watch::Receiver<bool>,
    ) where
        S: Stream<Item = InboundFrame> + Unpin + Send,
    {
        loop {
            let frame = tokio::select! {
                biased;
                _ = upstream_alive.wait_for(|alive| !*alive) => {
                    info!("Receive loop has ended; stopping send loop.");
                    break;
                }
                frame = inbound.next() => frame,
            };
            match frame {
                Some(InboundFrame::Text(text)) => {
                    self.forward_frame(text.as_bytes(), upstream.as_mut(), client)
                        .await
                }
                Some(InboundFrame::Binary(data)) => {
                    self.forward_frame(&data, upstream.as_mut(), client).await
                }
                Some(InboundFrame::Closed(CloseKind::Normal)) | None => {
                    info!("Client connection closed (send).");
                    break;
                }
                Some(InboundFrame::Closed(CloseKind::Abnormal(reason))) => {
                    warn!(%reason, "Client connection dropped (send).");
                    break;
                }
            }
        }

        client_alive.send_replace(false);
        if let Err(e) = upstream.close().await {
            debug!(error = %e, "Upstream sender did not close cleanly.");
        }
    }

    async fn forward_frame(
        &self,
        raw: &[u8],
        upstream: &mut dyn UpstreamSender,
        client: &ClientSink,
    ) {
        let frame = match ClientFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Malformed client frame.");
                let _ = client.send(OutboundMessage::error(e.to_string())).await;
                self.reset.request(
                    self.session_id,
                    ResetCause::MalformedFrame,
                    format!("malformed client frame: {e}"),
                );
                return;
            }
        };

        for raw_chunk in frame.into_media_chunks() {
            let mime_type = raw_chunk.mime_type.clone();
            let chunk = match raw_chunk.classify() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    debug!(?mime_type, "Ignoring media chunk with unsupported mime type.");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unusable media chunk.");
                    let _ = client.send(OutboundMessage::error(e.to_string())).await;
                    continue;
                }
            };
            if let Err(e) = upstream.send(chunk).await {
                warn!(error = %e, ?mime_type, "Failed to forward media chunk upstream.");
                let _ = client.send(OutboundMessage::error(format!("{e:#}"))).await;
            }
        }
    }
}

/// Upstream-to-client loop. Returns `Ok` when the client goes away and an
/// error for any upstream failure while the client is still connected.
async fn receive_loop(
    mut upstream: Box<dyn UpstreamReceiver>,
    client: &ClientSink,
    mut client_alive: watch::Receiver<bool>,
    upstream_alive: watch::Sender<bool>,
    mut closing: watch::Receiver<bool>,
    transcriber: &TranscriptionAdapter,
) -> Result<(), SessionError> {
    let result = relay_turns(
        upstream.as_mut(),
        client,
        &mut client_alive,
        &mut closing,
        transcriber,
    )
    .await;
    upstream_alive.send_replace(false);
    result
}

async fn relay_turns(
    upstream: &mut dyn UpstreamReceiver,
    client: &ClientSink,
    client_alive: &mut watch::Receiver<bool>,
    closing: &mut watch::Receiver<bool>,
    transcriber: &TranscriptionAdapter,
) -> Result<(), SessionError> {
    let mut turn = TurnAccumulator::new();
    loop {
        let event = tokio::select! {
            biased;
            _ = client_alive.wait_for(|alive| !*alive) => {
                info!("Client connection closed normally (receive).");
                return Ok(());
            }
            _ = client.closed() => {
                info!("Client connection closed normally (receive).");
                return Ok(());
            }
            Ok(_) = closing.wait_for(|closing| *closing) => {
                if !turn.is_empty() {
                    debug!(
                        texts = turn.text_count(),
                        audio_bytes = turn.audio_len(),
                        "Dropping unfinished turn."
                    );
                }
                return Err(SessionError::RelayReset);
            }
            event = upstream.next_event() => event,
        };

        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => return Err(SessionError::Upstream(e)),
            None if !*client_alive.borrow() => return Ok(()),
            None => return Err(SessionError::UpstreamClosed),
        };

        let Some(content) = event.server_content else {
            debug!("Ignoring upstream message without content.");
            continue;
        };

        if let Some(model_turn) = content.model_turn {
            for part in model_turn.parts {
                match part {
                    Part::Text(text) => turn.append_text(text),
                    Part::InlineData { mime_type, data } => {
                        debug!(%mime_type, bytes = data.len(), "Audio chunk received.");
                        turn.append_audio(&data);
                        if client.send(OutboundMessage::audio(&data)).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }

        if content.turn_complete {
            info!(
                texts = turn.text_count(),
                audio_bytes = turn.audio_len(),
                "Turn complete."
            );
            if deliver_turn(turn.flush(), client, transcriber).await.is_err() {
                return Ok(());
            }
        }
    }
}

/// Sends the transcript (if there was audio) followed by the text batch.
async fn deliver_turn(
    turn: FlushedTurn,
    client: &ClientSink,
    transcriber: &TranscriptionAdapter,
) -> Result<(), ClientGone> {
    if !turn.audio.is_empty() {
        match transcriber.transcribe(turn.audio).await {
            Ok(transcript) if transcript.is_empty() => {
                debug!("Transcription returned no speech.");
            }
            Ok(transcript) => {
                debug!(%transcript, "Transcription finished.");
                client.send(OutboundMessage::audio_text(transcript)).await?;
            }
            Err(e) => {
                warn!(error = %e, "Transcription failed.");
                client
                    .send(OutboundMessage::error(format!("Transcription error: {e}")))
                    .await?;
            }
        }
    }
    client.send(OutboundMessage::text_batch(turn.texts)).await
}
