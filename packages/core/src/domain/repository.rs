//! フィード Repository trait 定義
//!
//! Room ごとのメッセージフィードを保持するストアへのインターフェース。
//! 履歴読み込みとライブイベントの両方がこの trait を経由してフィードを変更するため、
//! 重複排除と並べ替えの規律（`MessageFeed`）が常に一箇所に集約される。

use async_trait::async_trait;

use super::{
    entity::Message,
    error::RepositoryError,
    feed::{FeedChange, FeedMutation, MessageFeed, PageKind},
    value_object::RoomId,
};

/// Feed Repository trait
///
/// ## 開閉
///
/// - `open` で Room のフィードを作成する（入室時）
/// - `close` でフィードを破棄する（退出時）
/// - 閉じた Room への書き込みは `RepositoryError::RoomClosed` になり、
///   退出後に完了した非同期処理が状態を書き換えることを防ぐ
#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Room のフィードを開く（既に開いていれば何もしない）
    async fn open(&self, room_id: &RoomId);

    /// Room のフィードを閉じる（閉じていれば何もしない）
    async fn close(&self, room_id: &RoomId);

    async fn is_open(&self, room_id: &RoomId) -> bool;

    /// フィードのスナップショットを取得
    async fn snapshot(&self, room_id: &RoomId) -> Result<MessageFeed, RepositoryError>;

    /// 履歴ページをマージし、実際に起きた変更とマージ後のスナップショットを返す
    async fn merge_page(
        &self,
        room_id: &RoomId,
        page: Vec<Message>,
        page_size: usize,
        kind: PageKind,
    ) -> Result<(Vec<FeedChange>, MessageFeed), RepositoryError>;

    /// フィードを最新ページで置き換える
    async fn reset(
        &self,
        room_id: &RoomId,
        page: Vec<Message>,
        page_size: usize,
    ) -> Result<MessageFeed, RepositoryError>;

    /// 変更要求を適用
    async fn apply(
        &self,
        room_id: &RoomId,
        mutation: FeedMutation,
    ) -> Result<FeedChange, RepositoryError>;
}
