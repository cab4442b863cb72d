//! mpsc チャンネルを使った FeedEventPublisher 実装
//!
//! ## 責務
//!
//! - Room ごとに購読者の `UnboundedSender` を管理
//! - 正規化イベントを Room の全購読者へ送信
//!
//! チャンネルの生成は購読者側（UI 状態やクライアントの表示ループ）で行い、
//! この実装は受け取った sender を使って送信するだけです。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{FeedEvent, FeedEventChannel, FeedEventPublisher, PublishError, RoomId};

/// mpsc チャンネルを使った FeedEventPublisher 実装
///
/// ## フィールド
///
/// - `consumers`: Room ごとの購読者 ID と sender のマップ
#[derive(Default)]
pub struct ChannelFeedEventPublisher {
    consumers: Arc<Mutex<HashMap<RoomId, HashMap<String, FeedEventChannel>>>>,
}

impl ChannelFeedEventPublisher {
    /// 新しい ChannelFeedEventPublisher を作成
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedEventPublisher for ChannelFeedEventPublisher {
    async fn register(&self, room_id: RoomId, consumer_id: String, channel: FeedEventChannel) {
        let mut consumers = self.consumers.lock().await;
        tracing::debug!(
            "Consumer '{}' registered for room '{}'",
            consumer_id,
            room_id
        );
        consumers
            .entry(room_id)
            .or_default()
            .insert(consumer_id, channel);
    }

    async fn unregister(&self, room_id: &RoomId, consumer_id: &str) {
        let mut consumers = self.consumers.lock().await;
        if let Some(room_consumers) = consumers.get_mut(room_id) {
            room_consumers.remove(consumer_id);
            if room_consumers.is_empty() {
                consumers.remove(room_id);
            }
            tracing::debug!(
                "Consumer '{}' unregistered from room '{}'",
                consumer_id,
                room_id
            );
        }
    }

    async fn publish(&self, room_id: &RoomId, event: FeedEvent) -> Result<(), PublishError> {
        let mut consumers = self.consumers.lock().await;
        let Some(room_consumers) = consumers.get_mut(room_id) else {
            return Ok(());
        };

        // 一部の送信失敗は許容し、閉じたチャンネルは取り除く
        let mut closed = Vec::new();
        for (consumer_id, channel) in room_consumers.iter() {
            if let Err(e) = channel.send(event.clone()) {
                tracing::warn!(
                    "Failed to deliver feed event to consumer '{}': {}",
                    consumer_id,
                    e
                );
                closed.push(consumer_id.clone());
            }
        }

        let delivered = room_consumers.len() - closed.len();
        for consumer_id in &closed {
            room_consumers.remove(consumer_id);
        }
        if room_consumers.is_empty() {
            consumers.remove(room_id);
        }

        if delivered == 0 && !closed.is_empty() {
            return Err(PublishError::AllConsumersClosed(room_id.to_string()));
        }
        Ok(())
    }

    async fn consumer_count(&self, room_id: &RoomId) -> usize {
        let consumers = self.consumers.lock().await;
        consumers.get(room_id).map_or(0, HashMap::len)
    }
}
