//! UseCase: 波形と再生位置の同期
//!
//! 再生モードではメッセージの波形と再生エンジンのセッションから表示用フレームを作り、
//! タップ位置をシーク位置に変換する。録音モードでは入力レベルの履歴を表示し、シークは無効。

use crate::domain::{
    MessageId, PlaybackError, PlaybackSession,
    waveform::{LevelMeter, active_bar_count, normalize_waveform, progress_position, seek_fraction},
};

use super::playback_engine::AudioPlaybackEngine;

/// 波形表示の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformConfig {
    pub bar_count: usize,
    /// バーの最小の高さ（0..1）
    pub min_magnitude: f32,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            bar_count: 40,
            min_magnitude: 0.1,
        }
    }
}

/// 表示用の 1 フレーム
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformFrame {
    /// バーの高さ（0..1）
    pub bars: Vec<f32>,
    /// 再生位置（0..1）
    pub position: f64,
    /// 再生済みのバーの本数
    pub active_bars: usize,
}

enum Mode {
    Playback {
        message_id: MessageId,
        /// 呼び出し側から渡された波形（なければセッションの波形データを使う）
        bars: Option<Vec<f32>>,
        config: WaveformConfig,
    },
    Recording {
        meter: LevelMeter,
    },
}

/// 波形プログレスのコントローラー
pub struct WaveformProgressController {
    engine: AudioPlaybackEngine,
    mode: Mode,
}

impl WaveformProgressController {
    /// ボイスメッセージ用
    ///
    /// `samples` がなければ、再生中のセッションの波形データを使う。
    /// どちらもなければ既定パターンを使う。
    pub fn for_message(
        engine: AudioPlaybackEngine,
        message_id: MessageId,
        samples: Option<&[f32]>,
        config: WaveformConfig,
    ) -> Self {
        Self {
            engine,
            mode: Mode::Playback {
                message_id,
                bars: samples.map(|samples| {
                    normalize_waveform(Some(samples), config.bar_count, config.min_magnitude)
                }),
                config,
            },
        }
    }

    /// 録音中の入力レベル表示用
    pub fn for_recording(engine: AudioPlaybackEngine, config: WaveformConfig) -> Self {
        Self {
            engine,
            mode: Mode::Recording {
                meter: LevelMeter::new(config.bar_count, config.min_magnitude),
            },
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.mode, Mode::Recording { .. })
    }

    /// 再生エンジンの現在のセッションからフレームを作る
    pub async fn frame(&self) -> WaveformFrame {
        let session = self.engine.session().await;
        self.frame_for(&session)
    }

    /// 指定したセッションからフレームを作る
    ///
    /// セッションが別のメッセージのものであれば再生位置は 0。
    pub fn frame_for(&self, session: &PlaybackSession) -> WaveformFrame {
        match &self.mode {
            Mode::Playback {
                message_id,
                bars,
                config,
            } => {
                let is_current = session.is_current(message_id);
                let position = if is_current {
                    progress_position(session.current_time, session.duration)
                } else {
                    0.0
                };
                let bars = match bars {
                    Some(bars) => bars.clone(),
                    None => normalize_waveform(
                        session.waveform_data.as_deref().filter(|_| is_current),
                        config.bar_count,
                        config.min_magnitude,
                    ),
                };
                WaveformFrame {
                    position,
                    active_bars: active_bar_count(bars.len(), position),
                    bars,
                }
            }
            Mode::Recording { meter } => {
                let bars = meter.bars();
                let active_bars = bars.len();
                WaveformFrame {
                    bars,
                    position: 1.0,
                    active_bars,
                }
            }
        }
    }

    /// タップ位置へシークする
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - シークした
    /// * `Ok(false)` - 録音モード、再生中のメッセージではない、またはトラック幅が不正
    /// * `Err(PlaybackError)` - シーク失敗
    pub async fn tap(&self, x: f64, width: f64) -> Result<bool, PlaybackError> {
        let Mode::Playback { message_id, .. } = &self.mode else {
            return Ok(false);
        };
        let Some(fraction) = seek_fraction(x, width) else {
            return Ok(false);
        };
        if !self.engine.session().await.is_current(message_id) {
            return Ok(false);
        }

        self.engine.seek(fraction).await?;
        Ok(true)
    }

    /// 入力レベル（0..1）を追加（再生モードでは無視する）
    pub fn push_level(&mut self, level: f32) {
        if let Mode::Recording { meter } = &mut self.mode {
            meter.push_level(level);
        }
    }

    /// 入力レベル（dBFS）を追加（再生モードでは無視する）
    pub fn push_decibels(&mut self, decibels: f32) {
        if let Mode::Recording { meter } = &mut self.mode {
            meter.push_decibels(decibels);
        }
    }
}
