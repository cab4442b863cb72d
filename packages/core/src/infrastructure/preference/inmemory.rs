//! InMemory Preference Store 実装（テスト・デモ用）

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{PlaybackRate, PreferenceError, PreferenceStore};

/// インメモリ Preference Store 実装
#[derive(Default)]
pub struct InMemoryPreferenceStore {
    playback_rate: Arc<Mutex<Option<PlaybackRate>>>,
}

impl InMemoryPreferenceStore {
    /// 何も保存されていないストアを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 再生速度が保存済みのストアを作成
    pub fn with_rate(rate: PlaybackRate) -> Self {
        Self {
            playback_rate: Arc::new(Mutex::new(Some(rate))),
        }
    }

    /// 保存されている再生速度
    pub async fn saved_rate(&self) -> Option<PlaybackRate> {
        *self.playback_rate.lock().await
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn load_playback_rate(&self) -> Result<Option<PlaybackRate>, PreferenceError> {
        Ok(self.saved_rate().await)
    }

    async fn save_playback_rate(&self, rate: PlaybackRate) -> Result<(), PreferenceError> {
        *self.playback_rate.lock().await = Some(rate);
        Ok(())
    }
}
