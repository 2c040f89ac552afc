//! Client WebSocket handling.
//!
//! - `connection`: adapts an axum WebSocket to the session pump and owns the
//!   single outbound writer.
//! - `pump`: the per-session send and receive loops.

mod connection;
pub mod pump;

pub use connection::ws_handler;
