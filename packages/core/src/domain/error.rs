//! ドメイン層のエラー型

use thiserror::Error;

use super::connection::{LinkTrigger, SubscriptionState};

/// 値オブジェクトの生成エラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueObjectError {
    #[error("Room ID must not be empty")]
    RoomIdEmpty,

    #[error("User ID must not be empty")]
    UserIdEmpty,

    #[error("Message ID must not be empty")]
    MessageIdEmpty,

    #[error("Unsupported playback rate: {0}")]
    UnsupportedPlaybackRate(f64),
}

/// バックエンド（外部協調者）のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// ネットワーク断・タイムアウトなど一時的な障害
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// バックエンドが要求を拒否した
    #[error("Backend rejected the request: {0}")]
    Rejected(String),
}

/// フィード Repository のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Room が開かれていない（退出済み、または未入室）
    #[error("Room '{0}' is not open")]
    RoomClosed(String),
}

/// 正規化イベントの配信エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// 登録されていた購読者が全員チャンネルを閉じていた
    #[error("All consumers of room '{0}' have gone away")]
    AllConsumersClosed(String),
}

/// 音声デバイスのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("Failed to load audio '{uri}': {reason}")]
    LoadFailed { uri: String, reason: String },

    #[error("Audio handle already released")]
    Released,

    #[error("Audio operation failed: {0}")]
    OperationFailed(String),
}

/// 設定値ストアのエラー
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Preference I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Preference format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidValue(#[from] ValueObjectError),
}

/// バックエンドのペイロードをドメインモデルへ変換する際のエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("Unknown change event type: {0}")]
    UnknownEventType(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    InvalidValue(#[from] ValueObjectError),
}

/// 購読状態機械の不正遷移
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition from {from:?} on {trigger:?}")]
pub struct InvalidTransition {
    pub from: SubscriptionState,
    pub trigger: LinkTrigger,
}
