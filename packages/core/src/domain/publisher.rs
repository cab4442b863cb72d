//! 正規化イベントの配信ポート
//!
//! マージ済みのフィード変更を、Room ごとに登録された購読者（UI 状態など）へ配信します。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{error::PublishError, feed::FeedEvent, value_object::RoomId};

/// 購読者へのイベント送信チャンネル
pub type FeedEventChannel = mpsc::UnboundedSender<FeedEvent>;

/// FeedEventPublisher trait
#[async_trait]
pub trait FeedEventPublisher: Send + Sync {
    /// 購読者を登録（同じ ID で再登録した場合は置き換える）
    async fn register(&self, room_id: RoomId, consumer_id: String, channel: FeedEventChannel);

    /// 購読者の登録を解除（未登録なら何もしない）
    async fn unregister(&self, room_id: &RoomId, consumer_id: &str);

    /// Room の全購読者へ送信（一部の送信失敗は許容する）
    async fn publish(&self, room_id: &RoomId, event: FeedEvent) -> Result<(), PublishError>;

    /// Room の購読者数
    async fn consumer_count(&self, room_id: &RoomId) -> usize;
}
