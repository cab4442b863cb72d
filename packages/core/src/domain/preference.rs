//! 永続化されるユーザー設定のポート
//!
//! 再生速度はセッションを跨いで（アプリ再起動後も）保持される。

use async_trait::async_trait;

use super::{error::PreferenceError, value_object::PlaybackRate};

/// PreferenceStore trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// 保存済みの再生速度（未保存なら `None`）
    async fn load_playback_rate(&self) -> Result<Option<PlaybackRate>, PreferenceError>;

    /// 再生速度を保存（最後の書き込みが勝つ）
    async fn save_playback_rate(&self, rate: PlaybackRate) -> Result<(), PreferenceError>;
}
