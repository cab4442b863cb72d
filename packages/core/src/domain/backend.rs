//! バックエンド（データベース・リアルタイム配信）のポート
//!
//! ワイヤーフォーマットはバックエンド側の関心事です。コアが必要とするのは
//! 履歴の問い合わせ・購読・挿入の 3 つのプリミティブだけです。

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::{
    entity::Message,
    error::BackendError,
    value_object::{MessageId, RoomId, Timestamp},
};

/// 並び順
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// 履歴の問い合わせ条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub room_id: RoomId,
    pub include_deleted: bool,
    pub order: SortOrder,
    pub limit: usize,
    /// この時刻より厳密に古いもの
    pub before: Option<Timestamp>,
    /// この時刻以降（この時刻を含む）
    pub since: Option<Timestamp>,
}

impl HistoryQuery {
    /// 最新から `limit` 件（論理削除済みを除く）
    pub fn latest(room_id: RoomId, limit: usize) -> Self {
        Self {
            room_id,
            include_deleted: false,
            order: SortOrder::Descending,
            limit,
            before: None,
            since: None,
        }
    }

    /// `before` より古いものを新しい順に `limit` 件
    pub fn older_than(room_id: RoomId, before: Timestamp, limit: usize) -> Self {
        Self {
            before: Some(before),
            ..Self::latest(room_id, limit)
        }
    }

    /// `since` 以降を古い順に `limit` 件（論理削除も含めて状態を揃える）
    pub fn since(room_id: RoomId, since: Timestamp, limit: usize) -> Self {
        Self {
            room_id,
            include_deleted: true,
            order: SortOrder::Ascending,
            limit,
            before: None,
            since: Some(since),
        }
    }
}

/// バックエンドの購読 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// バックエンドから届く未加工の変更イベント
#[derive(Debug, Clone, PartialEq)]
pub struct RawChangeEvent {
    /// "INSERT" / "UPDATE" / "DELETE"
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// 購読チャンネルに流れるシグナル
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionSignal {
    /// バックエンドが購読を確認した
    Confirmed,
    Event(RawChangeEvent),
    /// 通信路の障害（このシグナルの後、ストリームは終了する）
    TransportFailure(String),
}

/// 購読チャンネル
pub type SignalStream = BoxStream<'static, SubscriptionSignal>;

/// バックエンドの購読
pub struct BackendSubscription {
    pub id: SubscriptionId,
    pub signals: SignalStream,
}

/// 分類・検証済みのライブイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    Insert(Message),
    Update(Message),
    Delete(MessageId),
}

/// Chat Backend trait
///
/// UseCase 層はこの trait に依存し、Infrastructure 層の具体的な実装には依存しない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// 履歴を問い合わせる
    async fn query(&self, query: HistoryQuery) -> Result<Vec<Message>, BackendError>;

    /// Room の変更フィードを購読する
    async fn subscribe(&self, room_id: &RoomId) -> Result<BackendSubscription, BackendError>;

    /// 購読を解除する（未知・解除済みの ID に対しては何もしない）
    async fn unsubscribe(&self, subscription_id: SubscriptionId);

    /// メッセージを挿入し、バックエンド確定版を返す
    async fn insert(&self, message: Message) -> Result<Message, BackendError>;
}
