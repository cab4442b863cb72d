//! Data Transfer Objects (DTOs) for backend change payloads.
//!
//! - `record`: row shape of a message as the backend stores and streams it
//! - `conversion`: validation into domain models

pub mod conversion;
pub mod record;

pub use record::{MessageRecord, ReactionRecord};
