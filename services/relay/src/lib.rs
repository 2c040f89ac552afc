//! Screen Relay Library Crate
//!
//! A WebSocket relay between a screen-sharing browser client and the Gemini
//! Live API. The `relay` binary loads configuration and hands control to the
//! [`supervisor::RelaySupervisor`], which owns the listener lifecycle.

pub mod config;
pub mod registry;
pub mod router;
pub mod state;
pub mod supervisor;
pub mod ws;
