//! Idobata demo client.
//!
//! Drives a scripted chat session against the in-memory backend and prints
//! the feed, connection status and voice playback progress.

pub mod error;
pub mod formatter;
pub mod runner;

pub use error::ClientError;
pub use runner::{DemoOptions, run_demo};
