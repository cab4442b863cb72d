//! Idobata core: real-time chat feed and voice playback coordination.
//!
//! This library keeps a per-room message feed consistent while history pages
//! and live backend events race each other, supervises the room subscription
//! through disconnects, and enforces a single active voice-message playback.

// layers
pub mod domain;
pub mod infrastructure;
pub mod usecase;

// ambient
pub mod settings;
