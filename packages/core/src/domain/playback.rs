//! 再生セッション（プロセス全体で高々 1 つのボイスメッセージ再生状態）

use thiserror::Error;

use super::{
    audio::AudioStatus,
    value_object::{MessageId, PlaybackRate},
};

/// 再生に関するエラー（セッションに保持され、呼び出し元をクラッシュさせない）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("Audio did not become ready within {timeout_ms} ms")]
    LoadTimeout { timeout_ms: u64 },

    #[error("Failed to load audio: {0}")]
    LoadFailed(String),

    #[error("Failed to start playback: {0}")]
    StartFailed(String),

    #[error("Failed to pause playback: {0}")]
    PauseFailed(String),

    #[error("Failed to seek: {0}")]
    SeekFailed(String),

    #[error("Failed to change playback rate: {0}")]
    RateChangeFailed(String),

    #[error("Failed to persist playback rate: {0}")]
    PreferenceFailed(String),
}

/// 再生セッションの状態
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub current_message_id: Option<MessageId>,
    pub audio_uri: Option<String>,
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_loading: bool,
    /// 秒
    pub duration: f64,
    /// 秒
    pub current_time: f64,
    pub playback_rate: PlaybackRate,
    pub error: Option<PlaybackError>,
    pub waveform_data: Option<Vec<f32>>,
}

impl PlaybackSession {
    /// 空のセッション（再生速度のみ引き継ぐ）
    pub fn empty(playback_rate: PlaybackRate) -> Self {
        Self {
            current_message_id: None,
            audio_uri: None,
            is_playing: false,
            is_paused: false,
            is_loading: false,
            duration: 0.0,
            current_time: 0.0,
            playback_rate,
            error: None,
            waveform_data: None,
        }
    }

    /// 読み込み中のセッション
    pub fn loading(
        message_id: MessageId,
        audio_uri: String,
        duration: f64,
        playback_rate: PlaybackRate,
    ) -> Self {
        Self {
            current_message_id: Some(message_id),
            audio_uri: Some(audio_uri),
            is_loading: true,
            duration: sanitize_seconds(duration),
            ..Self::empty(playback_rate)
        }
    }

    /// 読み込み失敗後のセッション
    ///
    /// 同じ `play()` を再試行できるよう、メッセージ ID と URI だけは残す。
    pub fn failed(&self, error: PlaybackError) -> Self {
        Self {
            current_message_id: self.current_message_id.clone(),
            audio_uri: self.audio_uri.clone(),
            error: Some(error),
            ..Self::empty(self.playback_rate)
        }
    }

    pub fn is_active(&self) -> bool {
        self.current_message_id.is_some() && (self.is_playing || self.is_paused || self.is_loading)
    }

    pub fn is_current(&self, message_id: &MessageId) -> bool {
        self.current_message_id.as_ref() == Some(message_id)
    }

    /// 再生位置を [0, duration] に収める
    pub fn clamp_time(&self, seconds: f64) -> f64 {
        let seconds = sanitize_seconds(seconds);
        if self.duration > 0.0 {
            seconds.min(self.duration)
        } else {
            seconds
        }
    }

    /// 0..1 の割合を再生位置（秒）に変換
    pub fn time_for_fraction(&self, fraction: f64) -> f64 {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.clamp_time(fraction * self.duration)
    }

    /// デバイスからのステータスを反映
    ///
    /// 一時停止中はデバイスが再生中と報告しても `is_playing` を立てない。
    pub fn apply_status(&mut self, status: &AudioStatus) {
        if status.duration.is_finite() && status.duration > 0.0 {
            self.duration = status.duration;
        }
        self.current_time = self.clamp_time(status.current_time);
        self.is_playing = status.is_playing && !self.is_paused;
        self.is_loading = false;
    }
}

fn sanitize_seconds(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(duration: f64) -> PlaybackSession {
        PlaybackSession::loading(
            MessageId::confirmed("m1".to_string()).unwrap(),
            "file:///m1.m4a".to_string(),
            duration,
            PlaybackRate::Normal,
        )
    }

    #[test]
    fn test_time_for_fraction_clamps_out_of_range() {
        // テスト項目: 範囲外の割合は [0, duration] に丸められる
        // given (前提条件):
        let session = session(10.0);

        // when (操作):
        let below = session.time_for_fraction(-0.5);
        let above = session.time_for_fraction(1.7);
        let middle = session.time_for_fraction(0.25);
        let nan = session.time_for_fraction(f64::NAN);

        // then (期待する結果):
        assert_eq!(below, 0.0);
        assert_eq!(above, 10.0);
        assert_eq!(middle, 2.5);
        assert_eq!(nan, 0.0);
    }

    #[test]
    fn test_failed_keeps_identity_for_retry() {
        // テスト項目: 失敗したセッションはメッセージ ID と URI を残して他はリセットされる
        // given (前提条件):
        let mut loading = session(10.0);
        loading.playback_rate = PlaybackRate::Double;

        // when (操作):
        let failed = loading.failed(PlaybackError::LoadTimeout { timeout_ms: 5000 });

        // then (期待する結果):
        assert_eq!(failed.current_message_id, loading.current_message_id);
        assert_eq!(failed.audio_uri, loading.audio_uri);
        assert!(!failed.is_loading);
        assert!(!failed.is_playing);
        assert!(!failed.is_active());
        assert_eq!(failed.playback_rate, PlaybackRate::Double);
        assert_eq!(
            failed.error,
            Some(PlaybackError::LoadTimeout { timeout_ms: 5000 })
        );
    }

    #[test]
    fn test_apply_status_mirrors_device() {
        // テスト項目: デバイスのステータスが再生位置・長さ・再生中フラグに反映される
        // given (前提条件):
        let mut session = session(0.0);
        let status = AudioStatus {
            current_time: 1.25,
            duration: 8.0,
            is_playing: true,
            did_just_finish: false,
        };

        // when (操作):
        session.apply_status(&status);

        // then (期待する結果):
        assert_eq!(session.duration, 8.0);
        assert_eq!(session.current_time, 1.25);
        assert!(session.is_playing);
        assert!(!session.is_loading);
    }

    #[test]
    fn test_apply_status_respects_pause() {
        // テスト項目: 一時停止中はデバイスの再生中報告を無視する
        // given (前提条件):
        let mut session = session(8.0);
        session.is_paused = true;
        let status = AudioStatus {
            current_time: 20.0,
            duration: 8.0,
            is_playing: true,
            did_just_finish: false,
        };

        // when (操作):
        session.apply_status(&status);

        // then (期待する結果):
        assert!(!session.is_playing);
        assert_eq!(session.current_time, 8.0);
    }
}
