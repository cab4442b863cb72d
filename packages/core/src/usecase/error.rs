//! UseCase 層のエラー型

use thiserror::Error;

use crate::domain::{BackendError, RepositoryError};

/// 履歴読み込みのエラー
///
/// 「これ以上古いメッセージがない」はエラーではなく、空ページと `has_more = false` で表す。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// バックエンドの一時的な障害（フィードは変更されていない）
    #[error("Failed to load messages: {0}")]
    Backend(#[from] BackendError),

    /// 読み込み中に退出した
    #[error("Room '{0}' was closed while loading")]
    RoomClosed(String),

    /// 同じ Room の古い履歴を読み込み中
    #[error("Older messages of room '{0}' are already loading")]
    AlreadyLoading(String),
}

impl From<RepositoryError> for HistoryError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::RoomClosed(room_id) => Self::RoomClosed(room_id),
        }
    }
}

/// ライブイベント購読のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("Failed to subscribe to room '{room_id}': {source}")]
    Subscribe {
        room_id: String,
        source: BackendError,
    },
}

/// メッセージ送信のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendMessageError {
    #[error("Failed to send message: {0}")]
    Backend(#[from] BackendError),

    #[error("Room '{0}' is not open")]
    RoomClosed(String),
}

impl From<RepositoryError> for SendMessageError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::RoomClosed(room_id) => Self::RoomClosed(room_id),
        }
    }
}

/// Room 購読管理のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("Room '{0}' is already entered")]
    AlreadyEntered(String),
}
