//! Per-cycle shared state handed to every connection handler.

use crate::{registry::SessionRegistry, supervisor::ResetHandle};
use relay_core::{transcription::TranscriptionAdapter, upstream::UpstreamConnector};
use std::sync::Arc;
use tokio::sync::watch;

/// Everything a session needs from the cycle that accepted it. A new value is
/// built for every supervisor cycle.
#[derive(Clone)]
pub struct RelayState {
    pub connector: Arc<dyn UpstreamConnector>,
    pub transcriber: TranscriptionAdapter,
    pub registry: Arc<SessionRegistry>,
    pub reset: ResetHandle,
    /// Set once the cycle starts tearing down.
    pub closing: watch::Receiver<bool>,
}
