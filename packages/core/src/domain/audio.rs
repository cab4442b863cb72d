//! 音声デバイスのポート
//!
//! デバイスのメディア API は外部協調者です。コアは読み込み・再生制御と
//! 定期的なステータス取得だけを必要とします。

use std::sync::Arc;

use async_trait::async_trait;

use super::error::AudioError;

/// 再生ハンドルのステータススナップショット（秒単位）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioStatus {
    pub current_time: f64,
    pub duration: f64,
    pub is_playing: bool,
    /// 自然に末尾まで再生し終えた（手動停止・ループでは立たない）
    pub did_just_finish: bool,
}

/// 音声デバイス
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// URI を読み込み、再生可能になったハンドルを返す
    async fn load_audio(&self, uri: &str) -> Result<Arc<dyn AudioHandle>, AudioError>;
}

/// 読み込み済みの音声ハンドル
///
/// 生成と解放は `AudioPlaybackEngine` だけが行う。
#[async_trait]
pub trait AudioHandle: Send + Sync {
    async fn play(&self) -> Result<(), AudioError>;

    async fn pause(&self) -> Result<(), AudioError>;

    async fn seek_to(&self, seconds: f64) -> Result<(), AudioError>;

    async fn set_rate(&self, rate: f64) -> Result<(), AudioError>;

    /// ハンドルを解放する（2 回目以降は何もしない）
    async fn release(&self);

    /// 現在のステータス
    fn status(&self) -> AudioStatus;
}
