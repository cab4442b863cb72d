//! UseCase: Room 購読のライフサイクル管理
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - RoomCoordinator の enter / leave と、再接続・取りこぼし補完の流れ
//!
//! ### なぜこのテストが必要か
//! - 通信路の障害が呼び出し元に例外として返らず、状態として通知されることを保証
//! - 再接続後に切断中の挿入がフィードに 1 回だけ現れることを保証
//! - 退出で購読が解放され、以降フィードが変更されないことを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：入室 → 購読確認 → 退出
//! - 異常系：切断、オフライン中の再接続失敗の繰り返し
//! - エッジケース：二重入室、二重退出

use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::domain::{
    BackoffPolicy, ConnectionStatus, FeedEventChannel, FeedRepository, LinkTrigger, LiveEvent,
    ReconnectBackoff, RoomId, SubscriptionState,
};

use super::{
    error::{CoordinatorError, HistoryError},
    load_history::LoadHistoryUseCase,
    merge_events::{LinkEvent, LinkEventSender, MessageMerger, SubscriptionHandle},
};

/// Room の購読状態の受信側（状態遷移と同時に更新される）
pub type RoomStatusReceiver = watch::Receiver<SubscriptionState>;

struct RoomSession {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
    state: RoomStatusReceiver,
}

/// Room ごとの購読を管理する
///
/// 入室で購読を開始し、切断されれば上限付きの指数バックオフで再購読を続ける。
/// 再購読が確認されると、最後に知っているメッセージ以降を取得して取りこぼしを補う。
pub struct RoomCoordinator {
    merger: Arc<MessageMerger>,
    history: Arc<LoadHistoryUseCase>,
    repository: Arc<dyn FeedRepository>,
    backoff: BackoffPolicy,
    rooms: Mutex<HashMap<RoomId, RoomSession>>,
}

impl RoomCoordinator {
    /// 新しい RoomCoordinator を作成
    pub fn new(
        merger: Arc<MessageMerger>,
        history: Arc<LoadHistoryUseCase>,
        repository: Arc<dyn FeedRepository>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            merger,
            history,
            repository,
            backoff,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Room に入室し、購読を開始する
    ///
    /// 購読の成否はここでは返さず、返り値の受信側で状態として通知する。
    pub async fn enter(
        &self,
        room_id: &RoomId,
        sink: FeedEventChannel,
    ) -> Result<RoomStatusReceiver, CoordinatorError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.contains_key(room_id) {
            return Err(CoordinatorError::AlreadyEntered(room_id.to_string()));
        }

        self.repository.open(room_id).await;

        let (state_tx, state_rx) = watch::channel(SubscriptionState::Idle);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor {
            room_id: room_id.clone(),
            merger: self.merger.clone(),
            history: self.history.clone(),
            repository: self.repository.clone(),
            sink,
            state: state_tx,
            backoff: ReconnectBackoff::new(self.backoff),
        };
        supervisor.apply(LinkTrigger::Enter);

        let handle = tokio::spawn(supervisor.run(cancel.clone()));
        rooms.insert(
            room_id.clone(),
            RoomSession {
                cancel,
                supervisor: handle,
                state: state_rx.clone(),
            },
        );

        tracing::info!("Entered room '{}'", room_id);
        Ok(state_rx)
    }

    /// Room から退出する（入室していなければ何もしない）
    ///
    /// 戻った時点で購読は解放され、フィードは閉じられている。
    pub async fn leave(&self, room_id: &RoomId) {
        let Some(session) = self.rooms.lock().await.remove(room_id) else {
            tracing::debug!("Room '{}' is not entered, nothing to leave", room_id);
            return;
        };

        session.cancel.cancel();
        if let Err(e) = session.supervisor.await {
            tracing::error!("Supervisor of room '{}' ended abnormally: {}", room_id, e);
        }
        self.repository.close(room_id).await;

        tracing::info!("Left room '{}'", room_id);
    }

    /// 全ての Room から退出する
    pub async fn leave_all(&self) {
        let room_ids: Vec<RoomId> = self.rooms.lock().await.keys().cloned().collect();
        for room_id in room_ids {
            self.leave(&room_id).await;
        }
    }

    /// 現在の購読状態（入室していなければ `None`）
    pub async fn state(&self, room_id: &RoomId) -> Option<SubscriptionState> {
        let rooms = self.rooms.lock().await;
        rooms.get(room_id).map(|session| session.state.borrow().clone())
    }

    /// UI 向けの接続状態（入室していなければ `None`）
    pub async fn status(&self, room_id: &RoomId) -> Option<ConnectionStatus> {
        self.state(room_id).await.map(|state| state.status())
    }

    /// 購読状態の受信側を新たに取得
    pub async fn watch_status(&self, room_id: &RoomId) -> Option<RoomStatusReceiver> {
        let rooms = self.rooms.lock().await;
        rooms.get(room_id).map(|session| session.state.clone())
    }

    pub async fn entered_rooms(&self) -> Vec<RoomId> {
        let mut room_ids: Vec<RoomId> = self.rooms.lock().await.keys().cloned().collect();
        room_ids.sort();
        room_ids
    }
}

/// 1 つの Room の購読を維持するタスク
struct Supervisor {
    room_id: RoomId,
    merger: Arc<MessageMerger>,
    history: Arc<LoadHistoryUseCase>,
    repository: Arc<dyn FeedRepository>,
    sink: FeedEventChannel,
    state: watch::Sender<SubscriptionState>,
    backoff: ReconnectBackoff,
}

impl Supervisor {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
            let reason = match self.attach(lifecycle_tx, &cancel).await {
                None => break,
                Some(Err(reason)) => reason,
                Some(Ok(handle)) => {
                    let lost = tokio::select! {
                        _ = cancel.cancelled() => None,
                        reason = self.serve(lifecycle_rx) => Some(reason),
                    };
                    self.merger.detach(handle).await;
                    match lost {
                        Some(reason) => reason,
                        None => break,
                    }
                }
            };
            self.apply(LinkTrigger::TransportFailed { reason });

            let delay = self.backoff.next_delay();
            tracing::info!(
                "Retrying subscription of room '{}' in {} ms",
                self.room_id,
                delay.as_millis()
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.apply(LinkTrigger::RetryStarted);
        }

        self.apply(LinkTrigger::Leave);
    }

    /// 購読を確立する（退出が要求された場合は `None`）
    ///
    /// 確立は別タスクで行い、途中で打ち切らない。退出が先に要求された場合は、
    /// 確立の完了を待ってから購読を解放する。
    async fn attach(
        &self,
        lifecycle: LinkEventSender,
        cancel: &CancellationToken,
    ) -> Option<Result<SubscriptionHandle, String>> {
        let merger = self.merger.clone();
        let room_id = self.room_id.clone();
        let sink = self.sink.clone();
        let mut attaching = tokio::spawn(async move {
            merger
                .attach_with_lifecycle(&room_id, sink, lifecycle)
                .await
        });

        let joined = tokio::select! {
            _ = cancel.cancelled() => None,
            joined = &mut attaching => Some(joined),
        };
        let Some(joined) = joined else {
            if let Ok(Ok(handle)) = attaching.await {
                tracing::debug!(
                    "Room '{}' left while subscribing, releasing subscription",
                    self.room_id
                );
                self.merger.detach(handle).await;
            }
            return None;
        };

        Some(match joined {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("subscribe task failed: {}", e)),
        })
    }

    /// 購読が失われるまでイベントを待つ（失われた理由を返す）
    async fn serve(&mut self, mut lifecycle: mpsc::UnboundedReceiver<LinkEvent>) -> String {
        while let Some(event) = lifecycle.recv().await {
            match event {
                LinkEvent::Confirmed => {
                    // 取りこぼしを補完し終えてから接続済みとする
                    if let Err(e) = self.gap_fill().await {
                        return format!("gap-fill failed: {}", e);
                    }
                    self.apply(LinkTrigger::Confirmed);
                    self.backoff.reset();
                }
                LinkEvent::Lost { reason } => return reason,
            }
        }

        "subscription closed".to_string()
    }

    /// フィードの最新メッセージ以降を取得し、ライブイベントと同じ経路でマージする
    async fn gap_fill(&self) -> Result<usize, HistoryError> {
        let feed = self.repository.snapshot(&self.room_id).await?;
        let Some(since) = feed.newest_timestamp() else {
            return Ok(0);
        };

        let missed = self.history.fetch_since(&self.room_id, since).await?;
        let mut recovered = 0;
        for message in missed {
            let change = self
                .merger
                .merge(&self.room_id, LiveEvent::Insert(message))
                .await?;
            if change.is_changed() {
                recovered += 1;
            }
        }

        if recovered > 0 {
            tracing::info!(
                "Recovered {} missed messages in room '{}'",
                recovered,
                self.room_id
            );
        }
        Ok(recovered)
    }

    fn apply(&self, trigger: LinkTrigger) {
        let current = self.state.borrow().clone();
        match current.transition(trigger) {
            Ok(next) => {
                tracing::debug!("Room '{}': {:?} -> {:?}", self.room_id, current, next);
                self.state.send_replace(next);
            }
            Err(e) => tracing::warn!("Room '{}': {}", self.room_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{Message, MessageId, MessageType, PageKind, Timestamp, UserId},
        infrastructure::{
            backend::InMemoryChatBackend, publisher::ChannelFeedEventPublisher,
            repository::InMemoryFeedRepository,
        },
    };
    use async_trait::async_trait;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use crate::domain::{
        BackendError, BackendSubscription, ChatBackend, FeedEvent, FeedEventPublisher,
        HistoryQuery, PublishError, SubscriptionId,
    };

    /// subscribe / unsubscribe の呼び出し回数を数えるバックエンド
    struct CountingBackend {
        inner: InMemoryChatBackend,
        subscribes: AtomicUsize,
        unsubscribes: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for CountingBackend {
        async fn query(&self, query: HistoryQuery) -> Result<Vec<Message>, BackendError> {
            self.inner.query(query).await
        }

        async fn subscribe(&self, room_id: &RoomId) -> Result<BackendSubscription, BackendError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            self.inner.subscribe(room_id).await
        }

        async fn unsubscribe(&self, subscription_id: SubscriptionId) {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            self.inner.unsubscribe(subscription_id).await
        }

        async fn insert(&self, message: Message) -> Result<Message, BackendError> {
            self.inner.insert(message).await
        }
    }

    /// 購読者の登録に時間がかかる配信先
    struct SlowRegisterPublisher {
        inner: ChannelFeedEventPublisher,
        delay: Duration,
    }

    #[async_trait]
    impl FeedEventPublisher for SlowRegisterPublisher {
        async fn register(&self, room_id: RoomId, consumer_id: String, channel: FeedEventChannel) {
            tokio::time::sleep(self.delay).await;
            self.inner.register(room_id, consumer_id, channel).await
        }

        async fn unregister(&self, room_id: &RoomId, consumer_id: &str) {
            self.inner.unregister(room_id, consumer_id).await
        }

        async fn publish(&self, room_id: &RoomId, event: FeedEvent) -> Result<(), PublishError> {
            self.inner.publish(room_id, event).await
        }

        async fn consumer_count(&self, room_id: &RoomId) -> usize {
            self.inner.consumer_count(room_id).await
        }
    }

    struct Fixture {
        backend: Arc<InMemoryChatBackend>,
        repository: Arc<InMemoryFeedRepository>,
        coordinator: RoomCoordinator,
    }

    fn room() -> RoomId {
        RoomId::new("lobby".to_string()).unwrap()
    }

    fn message(id: &str, ts: i64) -> Message {
        Message::new(
            MessageId::confirmed(id.to_string()).unwrap(),
            room(),
            UserId::new("alice".to_string()).unwrap(),
            "Alice".to_string(),
            format!("body of {}", id),
            MessageType::Text,
            Timestamp::new(ts),
        )
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryChatBackend::new());
        let repository = Arc::new(InMemoryFeedRepository::new());
        let publisher = Arc::new(ChannelFeedEventPublisher::new());
        let merger = Arc::new(MessageMerger::new(
            backend.clone(),
            repository.clone(),
            publisher,
        ));
        let history = Arc::new(LoadHistoryUseCase::new(
            backend.clone(),
            repository.clone(),
            50,
        ));
        let coordinator = RoomCoordinator::new(
            merger,
            history,
            repository.clone(),
            BackoffPolicy {
                initial: Duration::from_millis(100),
                max: Duration::from_millis(400),
                multiplier: 2.0,
            },
        );
        Fixture {
            backend,
            repository,
            coordinator,
        }
    }

    async fn wait_until(
        rx: &mut RoomStatusReceiver,
        predicate: impl FnMut(&SubscriptionState) -> bool,
    ) -> SubscriptionState {
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(predicate))
            .await
            .expect("state should be reached")
            .expect("supervisor should be alive")
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_reaches_connected() {
        // テスト項目: 入室するとバックエンドの確認後に connected になる
        // given (前提条件):
        let fx = fixture();
        let (tx, _rx) = mpsc::unbounded_channel();

        // when (操作):
        let mut status = fx.coordinator.enter(&room(), tx).await.unwrap();
        wait_until(&mut status, |s| *s == SubscriptionState::Subscribed).await;

        // then (期待する結果):
        assert_eq!(
            fx.coordinator.status(&room()).await,
            Some(ConnectionStatus::Connected)
        );
        assert_eq!(fx.backend.subscription_count(&room()).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_twice_is_rejected() {
        // テスト項目: 入室中の Room に再度入室するとエラーになる
        // given (前提条件):
        let fx = fixture();
        let (tx, _rx) = mpsc::unbounded_channel();
        fx.coordinator.enter(&room(), tx.clone()).await.unwrap();

        // when (操作):
        let result = fx.coordinator.enter(&room(), tx).await;

        // then (期待する結果):
        assert_eq!(
            result.err(),
            Some(CoordinatorError::AlreadyEntered("lobby".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_recovers_missed_insert() {
        // テスト項目: 切断中に挿入されたメッセージが再接続後の補完でフィードに 1 回だけ入る
        // given (前提条件):
        let fx = fixture();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut status = fx.coordinator.enter(&room(), tx).await.unwrap();
        wait_until(&mut status, |s| *s == SubscriptionState::Subscribed).await;
        fx.repository
            .merge_page(&room(), vec![message("m1", 1000)], 50, PageKind::Initial)
            .await
            .unwrap();
        fx.backend.seed(vec![message("m1", 1000)]).await;

        // when (操作):
        fx.backend.disconnect().await;
        wait_until(&mut status, |s| {
            matches!(s, SubscriptionState::Disconnected { .. })
        })
        .await;
        fx.backend.push_insert(&room(), &message("m2", 2000)).await;
        fx.backend.restore().await;
        wait_until(&mut status, |s| *s == SubscriptionState::Subscribed).await;

        // then (期待する結果):
        let feed = fx.repository.snapshot(&room()).await.unwrap();
        let ids: Vec<&str> = feed.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_retrying_while_offline() {
        // テスト項目: オフラインの間、諦めずに再接続を繰り返し、試行回数が増えていく
        // given (前提条件):
        let fx = fixture();
        fx.backend.disconnect().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        // when (操作):
        let mut status = fx.coordinator.enter(&room(), tx).await.unwrap();
        let state = wait_until(&mut status, |s| {
            matches!(s, SubscriptionState::Reconnecting { attempt } if *attempt >= 4)
        })
        .await;
        fx.backend.restore().await;
        let recovered = wait_until(&mut status, |s| *s == SubscriptionState::Subscribed).await;

        // then (期待する結果):
        assert_eq!(state.status(), ConnectionStatus::Reconnecting);
        assert_eq!(recovered, SubscriptionState::Subscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_releases_subscription() {
        // テスト項目: 退出で購読が解放され、状態は Unsubscribed になり、フィードが閉じられる
        // given (前提条件):
        let fx = fixture();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut status = fx.coordinator.enter(&room(), tx).await.unwrap();
        wait_until(&mut status, |s| *s == SubscriptionState::Subscribed).await;

        // when (操作):
        fx.coordinator.leave(&room()).await;
        fx.coordinator.leave(&room()).await;

        // then (期待する結果):
        assert_eq!(*status.borrow(), SubscriptionState::Unsubscribed);
        assert_eq!(fx.backend.subscription_count(&room()).await, 0);
        assert!(!fx.repository.is_open(&room()).await);
        assert_eq!(fx.coordinator.status(&room()).await, None);
        assert!(fx.coordinator.entered_rooms().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_during_backoff() {
        // テスト項目: 再接続待ちの間に退出しても、待ちが打ち切られて Unsubscribed になる
        // given (前提条件):
        let fx = fixture();
        fx.backend.disconnect().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut status = fx.coordinator.enter(&room(), tx).await.unwrap();
        wait_until(&mut status, |s| {
            matches!(s, SubscriptionState::Disconnected { .. })
        })
        .await;

        // when (操作):
        fx.coordinator.leave(&room()).await;

        // then (期待する結果):
        assert_eq!(*status.borrow(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_while_subscribing_releases_subscription() {
        // テスト項目: 購読の確立中に退出しても、確立された購読と購読者の登録が解放される
        // given (前提条件):
        let backend = Arc::new(CountingBackend {
            inner: InMemoryChatBackend::new(),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
        });
        let publisher = Arc::new(SlowRegisterPublisher {
            inner: ChannelFeedEventPublisher::new(),
            delay: Duration::from_secs(1),
        });
        let repository = Arc::new(InMemoryFeedRepository::new());
        let merger = Arc::new(MessageMerger::new(
            backend.clone(),
            repository.clone(),
            publisher.clone(),
        ));
        let history = Arc::new(LoadHistoryUseCase::new(
            backend.clone(),
            repository.clone(),
            50,
        ));
        let coordinator =
            RoomCoordinator::new(merger, history, repository.clone(), BackoffPolicy::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let status = coordinator.enter(&room(), tx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let before_leave = status.borrow().clone();

        // when (操作):
        coordinator.leave(&room()).await;

        // then (期待する結果):
        assert_eq!(before_leave, SubscriptionState::Subscribing);
        assert_eq!(*status.borrow(), SubscriptionState::Unsubscribed);
        assert_eq!(backend.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(backend.unsubscribes.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.consumer_count(&room()).await, 0);
        assert!(!repository.is_open(&room()).await);
    }
}
