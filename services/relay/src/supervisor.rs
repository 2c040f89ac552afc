//! The relay's outer lifecycle: bind, serve, tear down, pause, repeat.
//!
//! A cycle owns its listener, its connector and every session spawned while it
//! was listening. Any session can ask for the cycle to be torn down; the
//! supervisor then stops accepting, drains the sessions and rebinds after a
//! pause. Failures never escape this loop.

use crate::{
    registry::{SessionId, SessionRegistry},
    router::create_router,
    state::RelayState,
};
use relay_core::{
    transcription::TranscriptionAdapter,
    upstream::{UpstreamConnector, UpstreamConnectorFactory},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Why a session asked for the relay to be reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    /// The session hit a fatal error and has already told its client.
    SessionFailed,
    /// The client sent a frame that could not be parsed.
    MalformedFrame,
}

#[derive(Debug, Clone)]
pub struct ResetRequest {
    pub session_id: SessionId,
    pub cause: ResetCause,
    pub reason: String,
}

/// Lets sessions request a relay reset. Requests after the cycle has ended
/// are dropped.
#[derive(Debug, Clone)]
pub struct ResetHandle {
    tx: mpsc::UnboundedSender<ResetRequest>,
}

impl ResetHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResetRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn request(&self, session_id: SessionId, cause: ResetCause, reason: impl Into<String>) {
        let request = ResetRequest {
            session_id,
            cause,
            reason: reason.into(),
        };
        if self.tx.send(request).is_err() {
            debug!(%session_id, "Reset requested after the cycle ended; ignoring.");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Binding,
    Listening,
    Draining,
}

/// Counters describing the supervisor's history.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    cycles: AtomicU64,
    bind_failures: AtomicU64,
    resets: AtomicU64,
}

impl SupervisorStats {
    /// Number of cycles that reached the listening state.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn bind_failures(&self) -> u64 {
        self.bind_failures.load(Ordering::Relaxed)
    }

    /// Number of cycles torn down because a session asked for it.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub bind_address: SocketAddr,
    pub restart_pause: Duration,
}

/// How a listening cycle came to an end.
enum CycleEnd {
    Reset(ResetRequest),
    ServerStopped,
    Shutdown,
}

pub struct RelaySupervisor {
    config: SupervisorConfig,
    factory: Arc<dyn UpstreamConnectorFactory>,
    transcriber: TranscriptionAdapter,
    state_tx: watch::Sender<SupervisorState>,
    stats: Arc<SupervisorStats>,
}

impl RelaySupervisor {
    pub fn new(
        config: SupervisorConfig,
        factory: Arc<dyn UpstreamConnectorFactory>,
        transcriber: TranscriptionAdapter,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Binding);
        Self {
            config,
            factory,
            transcriber,
            state_tx,
            stats: Arc::new(SupervisorStats::default()),
        }
    }

    /// Subscribes to lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<SupervisorStats> {
        self.stats.clone()
    }

    /// Runs forever.
    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs until `shutdown` resolves, then drains the current cycle.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            self.state_tx.send_replace(SupervisorState::Binding);
            let bound = tokio::select! {
                _ = &mut shutdown => return,
                bound = self.bind() => bound,
            };
            let (listener, connector) = match bound {
                Ok(bound) => bound,
                Err(e) => {
                    self.stats.bind_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        address = %self.config.bind_address,
                        "Failed to start relay: {:#}. Retrying in {:?}.",
                        e,
                        self.config.restart_pause
                    );
                    if self.pause(&mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            let registry = Arc::new(SessionRegistry::new());
            let (reset, mut resets) = ResetHandle::channel();
            let (closing_tx, closing) = watch::channel(false);
            let state = Arc::new(RelayState {
                connector,
                transcriber: self.transcriber.clone(),
                registry: registry.clone(),
                reset,
                closing,
            });
            let mut server = tokio::spawn(async move {
                axum::serve(
                    listener,
                    create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await
            });

            let cycle = self.stats.cycles.fetch_add(1, Ordering::Relaxed) + 1;
            self.state_tx.send_replace(SupervisorState::Listening);
            info!(cycle, address = %self.config.bind_address, "Relay listening.");

            let end = tokio::select! {
                Some(request) = resets.recv() => CycleEnd::Reset(request),
                result = &mut server => {
                    match result {
                        Ok(Ok(())) => warn!("Relay server stopped unexpectedly."),
                        Ok(Err(e)) => error!("Relay server failed: {}", e),
                        Err(e) => error!("Relay server task failed: {}", e),
                    }
                    CycleEnd::ServerStopped
                }
                _ = &mut shutdown => CycleEnd::Shutdown,
            };

            self.state_tx.send_replace(SupervisorState::Draining);
            if !matches!(end, CycleEnd::ServerStopped) {
                server.abort();
                let _ = server.await;
            }

            let spare = match &end {
                CycleEnd::Reset(request) => {
                    self.stats.resets.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        session_id = %request.session_id,
                        cause = ?request.cause,
                        reason = %request.reason,
                        "Session requested a relay reset."
                    );
                    Some(request.session_id)
                }
                CycleEnd::ServerStopped | CycleEnd::Shutdown => None,
            };
            closing_tx.send_replace(true);
            info!(cycle, sessions = registry.active(), "Draining relay cycle.");
            let aborted = registry.drain(spare).await;
            info!(cycle, aborted, "Relay cycle drained.");

            if matches!(end, CycleEnd::Shutdown) {
                return;
            }
            info!("Restarting relay in {:?}.", self.config.restart_pause);
            if self.pause(&mut shutdown).await {
                return;
            }
        }
    }

    /// Builds this cycle's connector and binds its listener.
    async fn bind(&self) -> anyhow::Result<(TcpListener, Arc<dyn UpstreamConnector>)> {
        let connector = self.factory.create()?;
        let listener = TcpListener::bind(self.config.bind_address).await?;
        Ok((listener, connector))
    }

    /// Sleeps for the restart pause. Returns `true` if shutdown was requested
    /// in the meantime.
    async fn pause<F>(&self, shutdown: &mut std::pin::Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown.as_mut() => true,
            _ = tokio::time::sleep(self.config.restart_pause) => false,
        }
    }
}
