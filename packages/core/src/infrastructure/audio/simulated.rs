//! シミュレーション音声デバイス
//!
//! 実際の音声は再生せず、tokio の時計で再生位置を進めます。
//! `tokio::time::pause()` 下では再生位置も決定的になるため、テストと CLI デモで使います。
//!
//! 読み込みの遅延・失敗や、再生中の操作の失敗を URI ごとに注入できます。

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::{AudioDevice, AudioError, AudioHandle, AudioStatus};

const DEFAULT_DURATION_SECS: f64 = 10.0;

/// 再生ヘッド
#[derive(Debug)]
struct Playhead {
    /// `anchor` 時点の再生位置（秒）
    position: f64,
    /// 再生中なら再生を始めた時刻
    anchor: Option<Instant>,
    rate: f64,
    duration: f64,
    released: bool,
}

impl Playhead {
    fn current_time(&self) -> f64 {
        let elapsed = self
            .anchor
            .map_or(0.0, |anchor| anchor.elapsed().as_secs_f64() * self.rate);
        (self.position + elapsed).min(self.duration)
    }

    fn is_finished(&self) -> bool {
        self.anchor.is_some() && self.current_time() >= self.duration
    }

    fn is_playing(&self) -> bool {
        !self.released && self.anchor.is_some() && !self.is_finished()
    }

    /// 現在位置を確定させてから再生状態を変える
    fn settle(&mut self) {
        self.position = self.current_time();
        if self.anchor.is_some() {
            self.anchor = Some(Instant::now());
        }
    }
}

struct HandleRecord {
    uri: String,
    playhead: Arc<Mutex<Playhead>>,
}

#[derive(Default)]
struct DeviceState {
    durations: HashMap<String, f64>,
    failing_loads: HashSet<String>,
    failing_operations: HashSet<String>,
    load_counts: HashMap<String, usize>,
    /// 読み込んだ順のハンドル
    handles: Vec<HandleRecord>,
    max_concurrent_playing: usize,
}

impl DeviceState {
    fn playing_count(&self) -> usize {
        self.handles
            .iter()
            .filter(|record| lock(&record.playhead).is_playing())
            .count()
    }

    fn latest(&self, uri: &str) -> Option<&HandleRecord> {
        self.handles.iter().rev().find(|record| record.uri == uri)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// シミュレーション音声デバイス
pub struct SimulatedAudioDevice {
    state: Arc<Mutex<DeviceState>>,
    load_delay: Duration,
}

impl Default for SimulatedAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAudioDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            load_delay: Duration::ZERO,
        }
    }

    /// 読み込みに `delay` かかるデバイス
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// URI の音声の長さ（秒）を設定（既定は 10 秒）
    pub fn set_duration(&self, uri: &str, seconds: f64) {
        lock(&self.state)
            .durations
            .insert(uri.to_string(), seconds);
    }

    /// URI の読み込みを失敗させる
    pub fn fail_loads(&self, uri: &str) {
        lock(&self.state).failing_loads.insert(uri.to_string());
    }

    /// URI のハンドルに対する再生・一時停止・シーク・速度変更を失敗させる
    pub fn fail_operations(&self, uri: &str) {
        lock(&self.state)
            .failing_operations
            .insert(uri.to_string());
    }

    pub fn clear_failures(&self, uri: &str) {
        let mut state = lock(&self.state);
        state.failing_loads.remove(uri);
        state.failing_operations.remove(uri);
    }

    /// URI の読み込みが要求された回数
    pub fn load_count(&self, uri: &str) -> usize {
        lock(&self.state).load_counts.get(uri).copied().unwrap_or(0)
    }

    /// URI の最新のハンドルが解放済みかどうか
    pub fn is_released(&self, uri: &str) -> bool {
        let state = lock(&self.state);
        state
            .latest(uri)
            .is_some_and(|record| lock(&record.playhead).released)
    }

    /// URI の最新のハンドルの再生速度
    pub fn rate_of(&self, uri: &str) -> Option<f64> {
        let state = lock(&self.state);
        state.latest(uri).map(|record| lock(&record.playhead).rate)
    }

    /// 解放されていないハンドルの数
    pub fn live_handles(&self) -> usize {
        let state = lock(&self.state);
        state
            .handles
            .iter()
            .filter(|record| !lock(&record.playhead).released)
            .count()
    }

    /// 現在再生中のハンドルの数
    pub fn playing_count(&self) -> usize {
        lock(&self.state).playing_count()
    }

    /// これまでに同時に再生中だったハンドルの最大数
    pub fn max_concurrent_playing(&self) -> usize {
        lock(&self.state).max_concurrent_playing
    }
}

#[async_trait]
impl AudioDevice for SimulatedAudioDevice {
    async fn load_audio(&self, uri: &str) -> Result<Arc<dyn AudioHandle>, AudioError> {
        let duration = {
            let mut state = lock(&self.state);
            *state.load_counts.entry(uri.to_string()).or_default() += 1;
            if state.failing_loads.contains(uri) {
                return Err(AudioError::LoadFailed {
                    uri: uri.to_string(),
                    reason: "simulated load failure".to_string(),
                });
            }
            state
                .durations
                .get(uri)
                .copied()
                .unwrap_or(DEFAULT_DURATION_SECS)
        };

        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }

        let playhead = Arc::new(Mutex::new(Playhead {
            position: 0.0,
            anchor: None,
            rate: 1.0,
            duration,
            released: false,
        }));
        lock(&self.state).handles.push(HandleRecord {
            uri: uri.to_string(),
            playhead: playhead.clone(),
        });
        tracing::debug!("Loaded simulated audio '{}' ({} s)", uri, duration);

        Ok(Arc::new(SimulatedAudioHandle {
            uri: uri.to_string(),
            playhead,
            device: Arc::downgrade(&self.state),
        }))
    }
}

/// シミュレーション音声ハンドル
pub struct SimulatedAudioHandle {
    uri: String,
    playhead: Arc<Mutex<Playhead>>,
    device: Weak<Mutex<DeviceState>>,
}

impl SimulatedAudioHandle {
    /// 失敗の注入を確認してから再生ヘッドを操作する
    ///
    /// ロックはデバイス → 再生ヘッドの順で取る。
    fn operate(&self, op: impl FnOnce(&mut Playhead)) -> Result<(), AudioError> {
        let device = self.device.upgrade().ok_or(AudioError::Released)?;
        let mut state = lock(&device);
        if state.failing_operations.contains(&self.uri) {
            return Err(AudioError::OperationFailed(format!(
                "simulated failure on '{}'",
                self.uri
            )));
        }

        {
            let mut playhead = lock(&self.playhead);
            if playhead.released {
                return Err(AudioError::Released);
            }
            op(&mut playhead);
        }

        let playing = state.playing_count();
        state.max_concurrent_playing = state.max_concurrent_playing.max(playing);
        Ok(())
    }
}

#[async_trait]
impl AudioHandle for SimulatedAudioHandle {
    async fn play(&self) -> Result<(), AudioError> {
        self.operate(|playhead| {
            playhead.position = playhead.current_time();
            if playhead.position >= playhead.duration {
                playhead.position = 0.0;
            }
            playhead.anchor = Some(Instant::now());
        })
    }

    async fn pause(&self) -> Result<(), AudioError> {
        self.operate(|playhead| {
            playhead.position = playhead.current_time();
            playhead.anchor = None;
        })
    }

    async fn seek_to(&self, seconds: f64) -> Result<(), AudioError> {
        self.operate(|playhead| {
            playhead.settle();
            playhead.position = seconds.clamp(0.0, playhead.duration);
        })
    }

    async fn set_rate(&self, rate: f64) -> Result<(), AudioError> {
        self.operate(|playhead| {
            playhead.settle();
            playhead.rate = rate;
        })
    }

    async fn release(&self) {
        let mut playhead = lock(&self.playhead);
        if !playhead.released {
            playhead.position = playhead.current_time();
            playhead.anchor = None;
            playhead.released = true;
            tracing::debug!("Released simulated audio '{}'", self.uri);
        }
    }

    fn status(&self) -> AudioStatus {
        let playhead = lock(&self.playhead);
        AudioStatus {
            current_time: playhead.current_time(),
            duration: playhead.duration,
            is_playing: playhead.is_playing(),
            did_just_finish: !playhead.released && playhead.is_finished(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_position_follows_clock_and_rate() {
        // テスト項目: 再生位置が経過時間 × 再生速度で進み、一時停止で止まる
        // given (前提条件):
        let device = SimulatedAudioDevice::new();
        let handle = device.load_audio("mem://a").await.unwrap();
        handle.set_rate(2.0).await.unwrap();
        handle.play().await.unwrap();

        // when (操作):
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        // then (期待する結果):
        let status = handle.status();
        assert!((status.current_time - 4.0).abs() < 0.01);
        assert!(!status.is_playing);
        assert_eq!(device.playing_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaching_end_reports_finish() {
        // テスト項目: 末尾まで再生すると did_just_finish が立ち、再生中ではなくなる
        // given (前提条件):
        let device = SimulatedAudioDevice::new();
        device.set_duration("mem://a", 1.0);
        let handle = device.load_audio("mem://a").await.unwrap();
        handle.play().await.unwrap();

        // when (操作):
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // then (期待する結果):
        let status = handle.status();
        assert_eq!(status.current_time, 1.0);
        assert!(status.did_just_finish);
        assert!(!status.is_playing);
    }

    #[tokio::test]
    async fn test_released_handle_rejects_operations() {
        // テスト項目: 解放済みのハンドルは操作を受け付けず、解放は何度呼んでもよい
        // given (前提条件):
        let device = SimulatedAudioDevice::new();
        let handle = device.load_audio("mem://a").await.unwrap();

        // when (操作):
        handle.release().await;
        handle.release().await;
        let result = handle.play().await;

        // then (期待する結果):
        assert_eq!(result, Err(AudioError::Released));
        assert!(device.is_released("mem://a"));
        assert_eq!(device.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        // テスト項目: 注入した読み込み失敗・操作失敗が返り、解除すると成功する
        // given (前提条件):
        let device = SimulatedAudioDevice::new();
        device.fail_loads("mem://a");

        // when (操作):
        let load = device.load_audio("mem://a").await;
        device.clear_failures("mem://a");
        let handle = device.load_audio("mem://a").await.unwrap();
        device.fail_operations("mem://a");
        let seek = handle.seek_to(1.0).await;

        // then (期待する結果):
        assert!(matches!(load, Err(AudioError::LoadFailed { .. })));
        assert!(matches!(seek, Err(AudioError::OperationFailed(_))));
        assert_eq!(device.load_count("mem://a"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_playing_is_tracked() {
        // テスト項目: 同時に再生中のハンドル数の最大値が記録される
        // given (前提条件):
        let device = SimulatedAudioDevice::new();
        let a = device.load_audio("mem://a").await.unwrap();
        let b = device.load_audio("mem://b").await.unwrap();

        // when (操作):
        a.play().await.unwrap();
        b.play().await.unwrap();

        // then (期待する結果):
        assert_eq!(device.playing_count(), 2);
        assert_eq!(device.max_concurrent_playing(), 2);
    }
}
