//! UseCase: ボイスメッセージの再生エンジン
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - AudioPlaybackEngine の play / pause / resume / stop / seek / set_playback_rate
//!
//! ### なぜこのテストが必要か
//! - 同時に再生中の音声ハンドルが高々 1 つであることを保証
//! - 一時停止中の同じメッセージは再読み込みせず、その位置から再開することを保証
//! - 読み込みのタイムアウトや失敗が呼び出し元をクラッシュさせず、セッションに記録されることを保証
//! - 再生速度がセッションを跨いで保持されることを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：再生、切り替え、一時停止と再開、シーク、末尾までの再生
//! - 異常系：読み込みタイムアウト、読み込み失敗、シーク失敗、設定の読み込み失敗
//! - エッジケース：セッションがない状態での操作、範囲外のシーク位置

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::domain::{
    AudioDevice, AudioHandle, MessageId, PlaybackError, PlaybackRate, PlaybackSession,
    PreferenceStore,
};

/// 再生エンジンの設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// 読み込み完了を待つ上限
    pub load_timeout: Duration,
    /// ステータスを取得する間隔
    pub status_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(5),
            status_interval: Duration::from_millis(250),
        }
    }
}

/// 再生中のハンドルと、その寿命に紐づくステータス取得タスク
struct ActiveHandle {
    handle: Arc<dyn AudioHandle>,
    ticker: JoinHandle<()>,
    generation: u64,
}

/// 読み込み中の要求（新しい要求か停止で取り消される）
struct PendingLoad {
    generation: u64,
    cancel: CancellationToken,
}

struct EngineState {
    session: PlaybackSession,
    active: Option<ActiveHandle>,
    pending: Option<PendingLoad>,
    next_generation: u64,
}

struct EngineInner {
    device: Arc<dyn AudioDevice>,
    preferences: Arc<dyn PreferenceStore>,
    config: PlaybackConfig,
    state: Mutex<EngineState>,
    session_tx: watch::Sender<PlaybackSession>,
}

/// ボイスメッセージの再生エンジン
///
/// 音声ハンドルを生成・解放できるのはこのエンジンだけで、全ての操作は
/// 内部のロックで直列化される。別のメッセージを再生する際は、前のハンドルの
/// 解放が完了してから次の読み込みを始める。
#[derive(Clone)]
pub struct AudioPlaybackEngine {
    inner: Arc<EngineInner>,
}

impl AudioPlaybackEngine {
    /// 新しい AudioPlaybackEngine を作成
    ///
    /// 保存済みの再生速度を読み込む。読み込めない場合は 1x で始める。
    pub async fn new(
        device: Arc<dyn AudioDevice>,
        preferences: Arc<dyn PreferenceStore>,
        config: PlaybackConfig,
    ) -> Self {
        let rate = match preferences.load_playback_rate().await {
            Ok(Some(rate)) => rate,
            Ok(None) => PlaybackRate::default(),
            Err(e) => {
                tracing::warn!("Failed to load playback rate preference, using 1x: {}", e);
                PlaybackRate::default()
            }
        };

        let session = PlaybackSession::empty(rate);
        let (session_tx, _) = watch::channel(session.clone());
        Self {
            inner: Arc::new(EngineInner {
                device,
                preferences,
                config,
                state: Mutex::new(EngineState {
                    session,
                    active: None,
                    pending: None,
                    next_generation: 1,
                }),
                session_tx,
            }),
        }
    }

    /// 現在のセッションのスナップショット
    pub async fn session(&self) -> PlaybackSession {
        self.inner.state.lock().await.session.clone()
    }

    /// セッションの変化を購読
    pub fn subscribe(&self) -> watch::Receiver<PlaybackSession> {
        self.inner.session_tx.subscribe()
    }

    pub async fn playback_rate(&self) -> PlaybackRate {
        self.inner.state.lock().await.session.playback_rate
    }

    /// メッセージを再生する
    ///
    /// - 同じメッセージが一時停止中なら、その位置から再開する
    /// - 同じメッセージが再生中・読み込み中なら何もしない
    /// - それ以外は前のハンドルを解放してから `audio_uri` を読み込み、先頭から再生する
    ///
    /// 読み込みの間はロックを保持しない。読み込み中に新しい要求や停止が来た場合、
    /// この要求は何も変更せずに `Ok(())` で終わり、読み込まれたハンドルは再生されずに解放される。
    /// 失敗はセッションの `error` にも記録される。
    pub async fn play(
        &self,
        message_id: MessageId,
        audio_uri: &str,
        duration: f64,
    ) -> Result<(), PlaybackError> {
        let (generation, cancel) = {
            let mut state = self.inner.state.lock().await;

            if state.session.is_current(&message_id) {
                if state.active.is_some() {
                    if state.session.is_paused {
                        return self.inner.resume_locked(&mut state).await;
                    }
                    if state.session.is_playing {
                        tracing::debug!("Message '{}' is already playing", message_id);
                        return Ok(());
                    }
                } else if state.pending.is_some() {
                    tracing::debug!("Message '{}' is already loading", message_id);
                    return Ok(());
                }
            }

            self.inner.cancel_pending(&mut state);
            self.inner.release_active(&mut state).await;

            let generation = state.next_generation;
            state.next_generation += 1;
            let cancel = CancellationToken::new();
            state.pending = Some(PendingLoad {
                generation,
                cancel: cancel.clone(),
            });
            let rate = state.session.playback_rate;
            state.session =
                PlaybackSession::loading(message_id.clone(), audio_uri.to_string(), duration, rate);
            self.inner.publish(&state.session);
            (generation, cancel)
        };

        let loaded = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Load of message '{}' was cancelled", message_id);
                return Ok(());
            }
            loaded = self.inner.load(audio_uri) => loaded,
        };

        let mut state = self.inner.state.lock().await;
        let is_current = state
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation == generation);
        if !is_current {
            if let Ok(handle) = loaded {
                handle.release().await;
            }
            tracing::debug!("Discarded stale load of message '{}'", message_id);
            return Ok(());
        }
        state.pending = None;

        let rate = state.session.playback_rate;
        let started = match loaded {
            Ok(handle) => self.inner.start(handle, rate).await,
            Err(e) => Err(e),
        };
        match started {
            Ok(handle) => {
                let ticker = tokio::spawn(poll_status(
                    Arc::downgrade(&self.inner),
                    handle.clone(),
                    generation,
                    self.inner.config.status_interval,
                ));
                state.active = Some(ActiveHandle {
                    handle,
                    ticker,
                    generation,
                });
                state.session.is_loading = false;
                state.session.is_playing = true;
                state.session.is_paused = false;
                state.session.current_time = 0.0;
                self.inner.publish(&state.session);

                tracing::info!("Playing message '{}' at {}", message_id, rate);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to play message '{}': {}", message_id, e);
                state.session = state.session.failed(e.clone());
                self.inner.publish(&state.session);
                Err(e)
            }
        }
    }

    /// 一時停止（再生中でなければ何もしない）
    pub async fn pause(&self) -> Result<(), PlaybackError> {
        let mut state = self.inner.state.lock().await;
        let Some(active) = &state.active else {
            return Ok(());
        };
        if state.session.is_paused {
            return Ok(());
        }

        let handle = active.handle.clone();
        if let Err(e) = handle.pause().await {
            let error = PlaybackError::PauseFailed(e.to_string());
            return Err(self.inner.fail_locked(&mut state, error).await);
        }

        state.session.is_paused = true;
        state.session.apply_status(&handle.status());
        self.inner.publish(&state.session);
        Ok(())
    }

    /// 再開（一時停止中でなければ何もしない）
    pub async fn resume(&self) -> Result<(), PlaybackError> {
        let mut state = self.inner.state.lock().await;
        if state.active.is_none() || !state.session.is_paused {
            return Ok(());
        }
        self.inner.resume_locked(&mut state).await
    }

    /// 再生を停止し、ハンドルを解放してセッションを空に戻す
    ///
    /// 読み込み中の要求は取り消され、以降セッションを変更しない。
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.cancel_pending(&mut state);
        self.inner.release_active(&mut state).await;
        state.session = PlaybackSession::empty(state.session.playback_rate);
        self.inner.publish(&state.session);
    }

    /// 画面を離れる際の後始末
    pub async fn cleanup(&self) {
        tracing::debug!("Cleaning up playback engine");
        self.stop().await;
    }

    /// 再生位置を割合（0..1）で指定してシークする（セッションがなければ何もしない）
    ///
    /// 範囲外の割合は [0, 1] に丸められる。
    pub async fn seek(&self, fraction: f64) -> Result<(), PlaybackError> {
        let mut state = self.inner.state.lock().await;
        let Some(active) = &state.active else {
            return Ok(());
        };

        let handle = active.handle.clone();
        let target = state.session.time_for_fraction(fraction);
        match handle.seek_to(target).await {
            Ok(()) => {
                state.session.current_time = target;
                state.session.error = None;
                self.inner.publish(&state.session);
                Ok(())
            }
            Err(e) => {
                let error = PlaybackError::SeekFailed(e.to_string());
                tracing::warn!("{}", error);
                state.session.error = Some(error.clone());
                self.inner.publish(&state.session);
                Err(error)
            }
        }
    }

    /// 再生速度を変更し、設定として保存する
    ///
    /// 再生中のハンドルにも即座に適用され、以降に読み込むハンドルにも適用される。
    pub async fn set_playback_rate(&self, rate: PlaybackRate) -> Result<(), PlaybackError> {
        let mut state = self.inner.state.lock().await;
        state.session.playback_rate = rate;

        let mut outcome = Ok(());
        if let Some(active) = &state.active
            && let Err(e) = active.handle.set_rate(rate.as_f64()).await
        {
            outcome = Err(PlaybackError::RateChangeFailed(e.to_string()));
        }
        if let Err(e) = self.inner.preferences.save_playback_rate(rate).await {
            outcome = outcome.and(Err(PlaybackError::PreferenceFailed(e.to_string())));
        }

        if let Err(e) = &outcome {
            tracing::warn!("{}", e);
            state.session.error = Some(e.clone());
        }
        self.inner.publish(&state.session);
        outcome
    }

    /// 現在のメッセージの波形データを設定（別のメッセージなら無視する）
    pub async fn set_waveform(&self, message_id: &MessageId, samples: Vec<f32>) {
        let mut state = self.inner.state.lock().await;
        if state.session.is_current(message_id) {
            state.session.waveform_data = Some(samples);
            self.inner.publish(&state.session);
        }
    }
}

impl EngineInner {
    fn publish(&self, session: &PlaybackSession) {
        self.session_tx.send_replace(session.clone());
    }

    /// 上限時間付きで読み込む
    async fn load(&self, audio_uri: &str) -> Result<Arc<dyn AudioHandle>, PlaybackError> {
        let timeout = self.config.load_timeout;
        match tokio::time::timeout(timeout, self.device.load_audio(audio_uri)).await {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(e)) => Err(PlaybackError::LoadFailed(e.to_string())),
            Err(_) => Err(PlaybackError::LoadTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// 再生速度を適用して再生を始める（失敗したらハンドルを解放する）
    async fn start(
        &self,
        handle: Arc<dyn AudioHandle>,
        rate: PlaybackRate,
    ) -> Result<Arc<dyn AudioHandle>, PlaybackError> {
        if let Err(e) = handle.set_rate(rate.as_f64()).await {
            handle.release().await;
            return Err(PlaybackError::RateChangeFailed(e.to_string()));
        }
        if let Err(e) = handle.play().await {
            handle.release().await;
            return Err(PlaybackError::StartFailed(e.to_string()));
        }
        Ok(handle)
    }

    fn cancel_pending(&self, state: &mut EngineState) {
        if let Some(pending) = state.pending.take() {
            pending.cancel.cancel();
            tracing::debug!("Cancelled pending load (generation {})", pending.generation);
        }
    }

    async fn resume_locked(&self, state: &mut EngineState) -> Result<(), PlaybackError> {
        let Some(active) = &state.active else {
            return Ok(());
        };
        let handle = active.handle.clone();
        if let Err(e) = handle.play().await {
            let error = PlaybackError::StartFailed(e.to_string());
            return Err(self.fail_locked(state, error).await);
        }

        state.session.is_paused = false;
        state.session.is_playing = true;
        self.publish(&state.session);
        Ok(())
    }

    /// ハンドルを解放し、ステータス取得を止める
    async fn release_active(&self, state: &mut EngineState) {
        if let Some(active) = state.active.take() {
            active.ticker.abort();
            active.handle.release().await;
            tracing::debug!("Released audio handle (generation {})", active.generation);
        }
    }

    /// 使えなくなったハンドルを解放し、再試行できる状態にする
    async fn fail_locked(&self, state: &mut EngineState, error: PlaybackError) -> PlaybackError {
        tracing::warn!("{}", error);
        self.release_active(state).await;
        state.session = state.session.failed(error.clone());
        self.publish(&state.session);
        error
    }
}

/// 一定間隔でハンドルのステータスをセッションへ反映する
///
/// ハンドルと同時に生成され、ハンドルの解放と同時に止まる。
/// 末尾まで再生し終えたら停止と同じ後始末を行う。
async fn poll_status(
    engine: Weak<EngineInner>,
    handle: Arc<dyn AudioHandle>,
    generation: u64,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(engine) = engine.upgrade() else {
            return;
        };

        let mut state = engine.state.lock().await;
        let is_current = state
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation);
        if !is_current {
            return;
        }

        let status = handle.status();
        if status.did_just_finish {
            // 自分自身を abort しないよう、ここでは take して解放だけ行う
            state.active = None;
            handle.release().await;
            state.session = PlaybackSession::empty(state.session.playback_rate);
            engine.publish(&state.session);
            tracing::debug!("Playback finished (generation {})", generation);
            return;
        }

        state.session.apply_status(&status);
        engine.publish(&state.session);
    }
}
