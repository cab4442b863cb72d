//! Error types for the Idobata demo client.

use idobata_core::{
    domain::{PlaybackError, ValueObjectError},
    settings::SettingsError,
    usecase::{CoordinatorError, HistoryError},
};
use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Settings could not be loaded
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A command-line value is not a valid identifier
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValueObjectError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    /// The room did not reach the expected state in time
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}
