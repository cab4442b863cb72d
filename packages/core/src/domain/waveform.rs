//! 波形表示の純粋関数
//!
//! バーの高さ（0..1）・再生位置・タップ位置からのシーク位置を計算します。

use std::collections::VecDeque;

/// 音声サンプルを `bar_count` 本のバーの高さに正規化
///
/// - サンプルがない場合はそれらしい既定パターンを合成する
/// - サンプルがある場合は最近傍インデックスで間引き、ピークが 1 を超えていれば
///   ピークで割って [0, 1] に収める
/// - どのバーも `min_magnitude` 未満にはしない（バーが消えないように）
pub fn normalize_waveform(raw: Option<&[f32]>, bar_count: usize, min_magnitude: f32) -> Vec<f32> {
    let floor = min_magnitude.clamp(0.0, 1.0);
    let samples = match raw {
        Some(samples) if !samples.is_empty() => samples,
        _ => return default_pattern(bar_count, floor),
    };

    let peak = samples
        .iter()
        .filter(|s| s.is_finite())
        .fold(0.0_f32, |acc, s| acc.max(s.abs()));
    let scale = if peak > 1.0 { peak } else { 1.0 };

    (0..bar_count)
        .map(|i| {
            let idx = (i * samples.len() / bar_count).min(samples.len() - 1);
            let value = samples[idx];
            let magnitude = if value.is_finite() {
                value.abs() / scale
            } else {
                0.0
            };
            magnitude.clamp(floor, 1.0)
        })
        .collect()
}

/// 波形データがないときの既定パターン（決定的）
fn default_pattern(bar_count: usize, floor: f32) -> Vec<f32> {
    (0..bar_count)
        .map(|i| {
            let x = i as f32;
            let value = 0.35 + 0.45 * (x * 0.9).sin().abs() + 0.2 * (x * 0.37).cos().abs();
            value.clamp(floor, 1.0)
        })
        .collect()
}

/// 再生位置を [0, 1] に正規化
pub fn progress_position(current_time: f64, duration: f64) -> f64 {
    if !duration.is_finite() || duration <= 0.0 || !current_time.is_finite() {
        return 0.0;
    }
    (current_time / duration).clamp(0.0, 1.0)
}

/// バー `index` が再生済み（再生ヘッドより左）かどうか
pub fn is_bar_active(index: usize, bar_count: usize, position: f64) -> bool {
    if bar_count == 0 {
        return false;
    }
    (index as f64 / bar_count as f64) <= position
}

/// 再生済みバーの本数
pub fn active_bar_count(bar_count: usize, position: f64) -> usize {
    (0..bar_count)
        .filter(|&i| is_bar_active(i, bar_count, position))
        .count()
}

/// タップ座標を再生位置の割合に変換（トラック幅が不正なら `None`）
pub fn seek_fraction(x: f64, width: f64) -> Option<f64> {
    if !width.is_finite() || width <= 0.0 || !x.is_finite() {
        return None;
    }
    Some((x / width).clamp(0.0, 1.0))
}

/// 録音中のレベルメーター
///
/// 固定の波形ではなく、入力レベルの履歴を右から左へ流して表示する。
#[derive(Debug, Clone, PartialEq)]
pub struct LevelMeter {
    levels: VecDeque<f32>,
    bar_count: usize,
    min_magnitude: f32,
}

impl LevelMeter {
    pub fn new(bar_count: usize, min_magnitude: f32) -> Self {
        let min_magnitude = min_magnitude.clamp(0.0, 1.0);
        Self {
            levels: std::iter::repeat_n(min_magnitude, bar_count).collect(),
            bar_count,
            min_magnitude,
        }
    }

    /// 入力レベル（dBFS, -160..0）を追加
    pub fn push_decibels(&mut self, decibels: f32) {
        self.push_level(decibels_to_level(decibels));
    }

    /// 入力レベル（0..1）を追加し、最も古いバーを押し出す
    pub fn push_level(&mut self, level: f32) {
        if self.bar_count == 0 {
            return;
        }
        let level = if level.is_finite() { level } else { 0.0 };
        if self.levels.len() == self.bar_count {
            self.levels.pop_front();
        }
        self.levels.push_back(level.clamp(self.min_magnitude, 1.0));
    }

    pub fn bars(&self) -> Vec<f32> {
        self.levels.iter().copied().collect()
    }
}

/// -60 dBFS 以下を無音とみなして 0..1 に変換
fn decibels_to_level(decibels: f32) -> f32 {
    const FLOOR_DB: f32 = -60.0;
    if !decibels.is_finite() || decibels <= FLOOR_DB {
        return 0.0;
    }
    ((decibels - FLOOR_DB) / -FLOOR_DB).clamp(0.0, 1.0)
}
