//! Axum Router Configuration

use crate::{state::RelayState, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;

/// Creates the relay router. Clients may upgrade on any path.
pub fn create_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .fallback(ws_handler)
        .with_state(state)
}
