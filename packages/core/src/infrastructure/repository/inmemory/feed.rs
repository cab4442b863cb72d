//! InMemory Feed Repository 実装
//!
//! ドメイン層が定義する FeedRepository trait の具体的な実装。
//! HashMap をインメモリ DB として使用し、Room ごとに `MessageFeed` を保持します。
//! 全ての変更は `MessageFeed` を経由するため、重複排除と並べ替えはドメインモデル側で保証されます。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    FeedChange, FeedMutation, FeedRepository, Message, MessageFeed, PageKind, RepositoryError,
    RoomId,
};

/// インメモリ Feed Repository 実装
#[derive(Default)]
pub struct InMemoryFeedRepository {
    /// 開いている Room のフィード
    feeds: Arc<Mutex<HashMap<RoomId, MessageFeed>>>,
}

impl InMemoryFeedRepository {
    /// 新しい InMemoryFeedRepository を作成
    pub fn new() -> Self {
        Self::default()
    }
}

fn closed(room_id: &RoomId) -> RepositoryError {
    RepositoryError::RoomClosed(room_id.to_string())
}

#[async_trait]
impl FeedRepository for InMemoryFeedRepository {
    async fn open(&self, room_id: &RoomId) {
        let mut feeds = self.feeds.lock().await;
        feeds
            .entry(room_id.clone())
            .or_insert_with(|| MessageFeed::new(room_id.clone()));
        tracing::debug!("Feed for room '{}' opened", room_id);
    }

    async fn close(&self, room_id: &RoomId) {
        let mut feeds = self.feeds.lock().await;
        if feeds.remove(room_id).is_some() {
            tracing::debug!("Feed for room '{}' closed", room_id);
        }
    }

    async fn is_open(&self, room_id: &RoomId) -> bool {
        self.feeds.lock().await.contains_key(room_id)
    }

    async fn snapshot(&self, room_id: &RoomId) -> Result<MessageFeed, RepositoryError> {
        let feeds = self.feeds.lock().await;
        feeds.get(room_id).cloned().ok_or_else(|| closed(room_id))
    }

    async fn merge_page(
        &self,
        room_id: &RoomId,
        page: Vec<Message>,
        page_size: usize,
        kind: PageKind,
    ) -> Result<(Vec<FeedChange>, MessageFeed), RepositoryError> {
        let mut feeds = self.feeds.lock().await;
        let feed = feeds.get_mut(room_id).ok_or_else(|| closed(room_id))?;
        let changes = feed.merge_page(page, page_size, kind);
        Ok((changes, feed.clone()))
    }

    async fn reset(
        &self,
        room_id: &RoomId,
        page: Vec<Message>,
        page_size: usize,
    ) -> Result<MessageFeed, RepositoryError> {
        let mut feeds = self.feeds.lock().await;
        let feed = feeds.get_mut(room_id).ok_or_else(|| closed(room_id))?;
        feed.reset(page, page_size);
        Ok(feed.clone())
    }

    async fn apply(
        &self,
        room_id: &RoomId,
        mutation: FeedMutation,
    ) -> Result<FeedChange, RepositoryError> {
        let mut feeds = self.feeds.lock().await;
        let feed = feeds.get_mut(room_id).ok_or_else(|| closed(room_id))?;
        Ok(feed.apply(mutation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, MessageType, Timestamp, UserId};

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - InMemoryFeedRepository の開閉と、フィードへの変更の反映
    //
    // 【なぜこのテストが必要か】
    // - 退出後に完了した非同期処理がフィードを書き換えないことを保証する必要がある
    // - 再入室で古いフィードが残らないことを保証する
    //
    // 【どのようなシナリオをテストするか】
    // 1. 開いた Room への変更がスナップショットに反映される
    // 2. 閉じた Room への書き込みは RoomClosed になる
    // 3. 二重に開いても内容は保持される
    // 4. 閉じて開き直すと空のフィードになる
    // ========================================

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

    #[tokio::test]
    async fn test_apply_is_visible_in_snapshot() {
        // テスト項目: 開いた Room への変更がスナップショットに反映される
        // given (前提条件):
        let repo = InMemoryFeedRepository::new();
        repo.open(&room()).await;

        // when (操作):
        let change = repo
            .apply(&room(), FeedMutation::Insert(message("m1", 1000)))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(change, FeedChange::Inserted(message("m1", 1000)));
        let feed = repo.snapshot(&room()).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.room_id(), &room());
    }

    #[tokio::test]
    async fn test_writes_to_closed_room_are_rejected() {
        // テスト項目: 閉じた Room への書き込みは RoomClosed エラーになる
        // given (前提条件):
        let repo = InMemoryFeedRepository::new();
        repo.open(&room()).await;
        repo.close(&room()).await;

        // when (操作):
        let apply = repo
            .apply(&room(), FeedMutation::Insert(message("m1", 1000)))
            .await;
        let merge = repo
            .merge_page(&room(), vec![message("m1", 1000)], 50, PageKind::Initial)
            .await;
        let reset = repo.reset(&room(), vec![], 50).await;

        // then (期待する結果):
        let expected = RepositoryError::RoomClosed("lobby".to_string());
        assert_eq!(apply, Err(expected.clone()));
        assert_eq!(merge.err(), Some(expected.clone()));
        assert_eq!(reset.err(), Some(expected));
        assert!(!repo.is_open(&room()).await);
    }

    #[tokio::test]
    async fn test_open_twice_keeps_feed() {
        // テスト項目: 既に開いている Room を再度開いても内容は保持される
        // given (前提条件):
        let repo = InMemoryFeedRepository::new();
        repo.open(&room()).await;
        repo.apply(&room(), FeedMutation::Insert(message("m1", 1000)))
            .await
            .unwrap();

        // when (操作):
        repo.open(&room()).await;

        // then (期待する結果):
        assert_eq!(repo.snapshot(&room()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_after_close_starts_empty() {
        // テスト項目: 閉じてから開き直すと空のフィード（has_more = true）になる
        // given (前提条件):
        let repo = InMemoryFeedRepository::new();
        repo.open(&room()).await;
        repo.merge_page(&room(), vec![message("m1", 1000)], 50, PageKind::Initial)
            .await
            .unwrap();
        repo.close(&room()).await;

        // when (操作):
        repo.open(&room()).await;

        // then (期待する結果):
        let feed = repo.snapshot(&room()).await.unwrap();
        assert!(feed.is_empty());
        assert!(feed.has_more());
    }
}
