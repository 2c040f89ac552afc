//! Binds one accepted WebSocket to a session pump.

use super::pump::{ClientSink, CloseKind, InboundFrame, SessionPump};
use crate::{registry::SessionId, state::RelayState};
use anyhow::Result;
use axum::{
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, future, stream::SplitSink};
use relay_core::protocol::OutboundMessage;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Outbound messages buffered between the session loops and the socket writer.
const OUTBOUND_CAPACITY: usize = 64;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let session_id = Uuid::new_v4();
    ws.on_upgrade(move |socket| async move {
        let registry = state.registry.clone();
        registry.spawn(session_id, handle_socket(socket, session_id, peer, state));
    })
}

#[instrument(name = "ws_connection", skip_all, fields(%peer))]
async fn handle_socket(
    socket: WebSocket,
    session_id: SessionId,
    peer: SocketAddr,
    state: Arc<RelayState>,
) {
    info!(%session_id, "New WebSocket connection. Awaiting setup...");

    let (socket_tx, socket_rx) = socket.split();
    let inbound = Box::pin(socket_rx.filter_map(|msg| future::ready(inbound_frame(msg))));
    let (client, outbound_rx) = ClientSink::channel(OUTBOUND_CAPACITY);

    let pump = SessionPump::new(
        session_id,
        state.connector.clone(),
        state.transcriber.clone(),
        state.reset.clone(),
        state.closing.clone(),
    );
    let (result, ()) = tokio::join!(
        pump.run(inbound, client),
        write_outbound(socket_tx, outbound_rx)
    );
    if let Err(e) = result {
        debug!(error = %e, "Session ended with an error.");
    }
}

fn inbound_frame(msg: Result<Message, axum::Error>) -> Option<InboundFrame> {
    match msg {
        Ok(Message::Text(text)) => Some(InboundFrame::Text(text.as_str().to_owned())),
        Ok(Message::Binary(data)) => Some(InboundFrame::Binary(data)),
        Ok(Message::Close(frame)) => Some(InboundFrame::Closed(close_kind(frame))),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(InboundFrame::Closed(CloseKind::Abnormal(e.to_string()))),
    }
}

fn close_kind(frame: Option<CloseFrame>) -> CloseKind {
    match frame {
        None => CloseKind::Normal,
        Some(frame) if frame.code == close_code::NORMAL || frame.code == close_code::AWAY => {
            CloseKind::Normal
        }
        Some(frame) => CloseKind::Abnormal(format!(
            "close code {}: {}",
            frame.code,
            frame.reason.as_str()
        )),
    }
}

/// The only writer on the client socket. Stops at the first failed write.
async fn write_outbound(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = send_msg(&mut socket_tx, &msg).await {
            warn!(error = %e, "Failed to write to client; dropping outbound messages.");
            return;
        }
    }
    let _ = socket_tx.close().await;
}

async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: &OutboundMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
