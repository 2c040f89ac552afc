//! Relay Core Library Crate
//!
//! Transport-agnostic building blocks for the screen-share relay: the wire
//! protocol spoken with the browser, the per-turn accumulator, the upstream
//! collaborator contract and the transcription adapter.

pub mod accumulator;
pub mod persona;
pub mod protocol;
pub mod speech;
pub mod transcription;
pub mod upstream;
