//! Gemini Live client for the screen-share relay.
//!
//! Implements the `relay-core` upstream contract over the
//! `BidiGenerateContent` WebSocket: one socket per relay session, a setup
//! handshake, media chunks as `realtimeInput`, and server content decoded into
//! [`relay_core::upstream::UpstreamEvent`]s.

mod client;
mod types;

pub use client::{
    DEFAULT_API_VERSION, DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiError, GeminiLiveClient,
    GeminiLiveConfig, GeminiLiveFactory,
};
