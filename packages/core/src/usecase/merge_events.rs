//! UseCase: ライブイベントのマージと配信
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - MessageMerger の attach / detach / merge
//!
//! ### なぜこのテストが必要か
//! - 同じイベントの再配信で重複エントリ・重複イベントが発生しないことを保証
//! - 不正なペイロードを含んでもマージ処理が止まらないことを保証
//! - detach が冪等で、解除後にフィードが変更されないことを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：挿入・更新・削除の正規化イベント配信
//! - 異常系：不正なペイロード、購読の失敗、通信路の障害
//! - エッジケース：detach の多重呼び出し、退出済み Room へのイベント

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::StreamExt;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};

use crate::domain::{
    ChatBackend, FeedChange, FeedEventChannel, FeedEventPublisher, FeedMutation, FeedRepository,
    LiveEvent, RepositoryError, RoomId, SignalStream, SubscriptionId, SubscriptionSignal,
};

use super::error::MergeError;

/// attach が返す購読ハンドル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// 購読の状態変化（Room Coordinator へ通知される）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Confirmed,
    Lost { reason: String },
}

/// 購読状態の通知チャンネル
pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;

struct Attachment {
    room_id: RoomId,
    subscription_id: SubscriptionId,
    consumer_id: String,
    pump: JoinHandle<()>,
}

/// ライブイベントをフィードにマージし、正規化イベントを配信する
pub struct MessageMerger {
    /// ChatBackend（バックエンドの抽象化）
    backend: Arc<dyn ChatBackend>,
    /// Repository（フィードストアの抽象化）
    repository: Arc<dyn FeedRepository>,
    /// FeedEventPublisher（正規化イベント配信の抽象化）
    publisher: Arc<dyn FeedEventPublisher>,
    attachments: Mutex<HashMap<SubscriptionHandle, Attachment>>,
    next_handle: AtomicU64,
}

impl MessageMerger {
    /// 新しい MessageMerger を作成
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        repository: Arc<dyn FeedRepository>,
        publisher: Arc<dyn FeedEventPublisher>,
    ) -> Self {
        Self {
            backend,
            repository,
            publisher,
            attachments: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Room の変更フィードの受信を開始する
    ///
    /// マージ後に実際に変化があったイベントだけが `sink` に届く。
    pub async fn attach(
        &self,
        room_id: &RoomId,
        sink: FeedEventChannel,
    ) -> Result<SubscriptionHandle, MergeError> {
        self.attach_inner(room_id, sink, None).await
    }

    /// `attach` に加えて、購読確認と通信路の障害を `lifecycle` に通知する
    pub async fn attach_with_lifecycle(
        &self,
        room_id: &RoomId,
        sink: FeedEventChannel,
        lifecycle: LinkEventSender,
    ) -> Result<SubscriptionHandle, MergeError> {
        self.attach_inner(room_id, sink, Some(lifecycle)).await
    }

    async fn attach_inner(
        &self,
        room_id: &RoomId,
        sink: FeedEventChannel,
        lifecycle: Option<LinkEventSender>,
    ) -> Result<SubscriptionHandle, MergeError> {
        let subscription =
            self.backend
                .subscribe(room_id)
                .await
                .map_err(|source| MergeError::Subscribe {
                    room_id: room_id.to_string(),
                    source,
                })?;

        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let consumer_id = format!("subscription-{}", handle.0);
        self.publisher
            .register(room_id.clone(), consumer_id.clone(), sink)
            .await;

        let pump = tokio::spawn(pump_signals(
            subscription.signals,
            room_id.clone(),
            self.repository.clone(),
            self.publisher.clone(),
            lifecycle,
        ));

        self.attachments.lock().await.insert(
            handle,
            Attachment {
                room_id: room_id.clone(),
                subscription_id: subscription.id,
                consumer_id,
                pump,
            },
        );

        tracing::info!(
            "Attached to room '{}' (subscription {})",
            room_id,
            subscription.id.0
        );
        Ok(handle)
    }

    /// 受信を停止する（解除済み・未知のハンドルに対しては何もしない）
    ///
    /// 戻った時点で、このハンドル経由のマージは完了または中断済み。
    pub async fn detach(&self, handle: SubscriptionHandle) {
        let Some(attachment) = self.attachments.lock().await.remove(&handle) else {
            tracing::debug!("Subscription handle {} already detached", handle.0);
            return;
        };

        attachment.pump.abort();
        // abort の完了を待ち、以降フィードが変更されないようにする
        let _ = attachment.pump.await;

        self.backend.unsubscribe(attachment.subscription_id).await;
        self.publisher
            .unregister(&attachment.room_id, &attachment.consumer_id)
            .await;

        tracing::info!(
            "Detached from room '{}' (subscription {})",
            attachment.room_id,
            attachment.subscription_id.0
        );
    }

    pub async fn is_attached(&self, handle: SubscriptionHandle) -> bool {
        self.attachments.lock().await.contains_key(&handle)
    }

    /// 分類済みのイベントをフィードにマージし、変化があれば配信する
    ///
    /// 取りこぼし補完で取得したメッセージもこの経路を通る。
    pub async fn merge(
        &self,
        room_id: &RoomId,
        event: LiveEvent,
    ) -> Result<FeedChange, RepositoryError> {
        merge_live_event(
            self.repository.as_ref(),
            self.publisher.as_ref(),
            room_id,
            event,
        )
        .await
    }
}

async fn merge_live_event(
    repository: &dyn FeedRepository,
    publisher: &dyn FeedEventPublisher,
    room_id: &RoomId,
    event: LiveEvent,
) -> Result<FeedChange, RepositoryError> {
    let mutation = match event {
        LiveEvent::Insert(message) => FeedMutation::Insert(message),
        LiveEvent::Update(message) => FeedMutation::Update(message),
        LiveEvent::Delete(id) => FeedMutation::Delete(id),
    };

    let change = repository.apply(room_id, mutation).await?;
    if let Some(event) = change.clone().into_event()
        && let Err(e) = publisher.publish(room_id, event).await
    {
        tracing::warn!("Failed to publish feed event for room '{}': {}", room_id, e);
    }
    Ok(change)
}

/// 購読チャンネルのシグナルを順番に処理する
async fn pump_signals(
    mut signals: SignalStream,
    room_id: RoomId,
    repository: Arc<dyn FeedRepository>,
    publisher: Arc<dyn FeedEventPublisher>,
    lifecycle: Option<LinkEventSender>,
) {
    let notify = |event: LinkEvent| {
        if let Some(lifecycle) = &lifecycle {
            let _ = lifecycle.send(event);
        }
    };

    while let Some(signal) = signals.next().await {
        match signal {
            SubscriptionSignal::Confirmed => {
                tracing::debug!("Subscription for room '{}' confirmed", room_id);
                notify(LinkEvent::Confirmed);
            }
            SubscriptionSignal::Event(raw) => {
                let event_type = raw.event_type.clone();
                let event = match LiveEvent::try_from(raw) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(
                            "Dropping malformed {} event for room '{}': {}",
                            event_type,
                            room_id,
                            e
                        );
                        continue;
                    }
                };
                match merge_live_event(repository.as_ref(), publisher.as_ref(), &room_id, event)
                    .await
                {
                    Ok(change) => {
                        tracing::debug!(
                            "Merged {} event into room '{}' ({})",
                            event_type,
                            room_id,
                            change_kind(&change)
                        );
                    }
                    Err(RepositoryError::RoomClosed(_)) => {
                        tracing::debug!(
                            "Room '{}' closed, dropping {} event",
                            room_id,
                            event_type
                        );
                    }
                }
            }
            SubscriptionSignal::TransportFailure(reason) => {
                tracing::warn!("Subscription for room '{}' lost: {}", room_id, reason);
                notify(LinkEvent::Lost { reason });
                return;
            }
        }
    }

    notify(LinkEvent::Lost {
        reason: "subscription stream ended".to_string(),
    });
}

fn change_kind(change: &FeedChange) -> &'static str {
    match change {
        FeedChange::Inserted(_) => "inserted",
        FeedChange::Updated(_) => "updated",
        FeedChange::Reconciled { .. } => "reconciled",
        FeedChange::Deleted(_) => "deleted",
        FeedChange::Unchanged => "unchanged",
    }
}
