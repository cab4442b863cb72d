//! UseCase: メッセージ履歴の読み込み
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - LoadHistoryUseCase の load_initial / load_older / load_more / refresh / fetch_since
//!
//! ### なぜこのテストが必要か
//! - 最新ページを新しい順に取得し、表示用に古い順へ並べ替えることを保証
//! - 失敗時にフィードが変更されず、再試行できることを保証
//! - 同じ Room の古い履歴読み込みが並行して走らないことを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：最新ページ、古いページ、履歴の先頭への到達
//! - 異常系：バックエンド障害、退出済み Room、読み込みの重複
//! - エッジケース：メッセージが 0 件の Room

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use crate::domain::{
    ChatBackend, FeedRepository, HistoryQuery, Message, MessageFeed, MessageId, PageKind, RoomId,
    Timestamp,
};

use super::error::HistoryError;

/// 古い履歴の読み込み結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OlderPage {
    /// 取得したメッセージ（古い順）
    pub messages: Vec<Message>,
    /// さらに古い履歴が残っているか
    pub has_more: bool,
}

/// メッセージ履歴読み込みのユースケース
pub struct LoadHistoryUseCase {
    /// ChatBackend（バックエンドの抽象化）
    backend: Arc<dyn ChatBackend>,
    /// Repository（フィードストアの抽象化）
    repository: Arc<dyn FeedRepository>,
    /// 既定のページサイズ
    page_size: usize,
    /// 古い履歴を読み込み中の Room
    loading_older: Mutex<HashSet<RoomId>>,
}

impl LoadHistoryUseCase {
    /// 新しい LoadHistoryUseCase を作成
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        repository: Arc<dyn FeedRepository>,
        page_size: usize,
    ) -> Self {
        Self {
            backend,
            repository,
            page_size: page_size.max(1),
            loading_older: Mutex::new(HashSet::new()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// 既定のページサイズで最新ページを読み込む
    pub async fn load_initial(&self, room_id: &RoomId) -> Result<MessageFeed, HistoryError> {
        self.load_initial_with(room_id, self.page_size).await
    }

    /// 最新ページを読み込む
    ///
    /// 論理削除されていないメッセージを新しい順に `page_size` 件取得し、
    /// 古い順に並べ替えてフィードへマージする。
    ///
    /// # Returns
    ///
    /// * `Ok(MessageFeed)` - マージ後のフィード（0 件の Room では空で `has_more = false`）
    /// * `Err(HistoryError)` - 読み込み失敗（フィードは変更されない）
    pub async fn load_initial_with(
        &self,
        room_id: &RoomId,
        page_size: usize,
    ) -> Result<MessageFeed, HistoryError> {
        let page_size = page_size.max(1);
        let mut page = self
            .backend
            .query(HistoryQuery::latest(room_id.clone(), page_size))
            .await?;
        page.reverse();

        tracing::debug!(
            "Loaded {} latest messages for room '{}'",
            page.len(),
            room_id
        );

        let (_, feed) = self
            .repository
            .merge_page(room_id, page, page_size, PageKind::Initial)
            .await?;
        Ok(feed)
    }

    /// `before` より古いメッセージを読み込む
    ///
    /// 返り値が `page_size` 未満（0 件を含む）であれば履歴の先頭に到達している。
    /// 同じ Room の読み込みが進行中の場合は `HistoryError::AlreadyLoading` を返し、
    /// バックエンドには問い合わせない。
    pub async fn load_older(
        &self,
        room_id: &RoomId,
        before: Timestamp,
        page_size: usize,
    ) -> Result<Vec<Message>, HistoryError> {
        let page_size = page_size.max(1);
        let _guard = LoadingGuard::acquire(&self.loading_older, room_id)?;

        let mut page = self
            .backend
            .query(HistoryQuery::older_than(room_id.clone(), before, page_size))
            .await?;
        page.reverse();

        tracing::debug!(
            "Loaded {} messages older than {} for room '{}'",
            page.len(),
            before.value(),
            room_id
        );

        self.repository
            .merge_page(room_id, page.clone(), page_size, PageKind::Older)
            .await?;
        Ok(page)
    }

    /// フィードの最古メッセージをカーソルにして、次の古いページを読み込む
    pub async fn load_more(&self, room_id: &RoomId) -> Result<OlderPage, HistoryError> {
        let feed = self.repository.snapshot(room_id).await?;
        if !feed.has_more() {
            return Ok(OlderPage {
                messages: Vec::new(),
                has_more: false,
            });
        }

        match feed.oldest_timestamp() {
            Some(before) => {
                let messages = self.load_older(room_id, before, self.page_size).await?;
                let has_more = messages.len() >= self.page_size;
                Ok(OlderPage { messages, has_more })
            }
            // まだ何も読み込んでいなければ最新ページから
            None => {
                let _guard = LoadingGuard::acquire(&self.loading_older, room_id)?;
                let feed = self.load_initial(room_id).await?;
                Ok(OlderPage {
                    messages: feed.messages().to_vec(),
                    has_more: feed.has_more(),
                })
            }
        }
    }

    /// フィードを最新ページで置き換える（プルして更新）
    ///
    /// 論理削除されたメッセージはここで初めてフィードから取り除かれる。
    pub async fn refresh(&self, room_id: &RoomId) -> Result<MessageFeed, HistoryError> {
        let mut page = self
            .backend
            .query(HistoryQuery::latest(room_id.clone(), self.page_size))
            .await?;
        page.reverse();

        let feed = self
            .repository
            .reset(room_id, page, self.page_size)
            .await?;
        tracing::info!("Refreshed room '{}' ({} messages)", room_id, feed.len());
        Ok(feed)
    }

    /// `since` 以降のメッセージを全て取得する（フィードは変更しない）
    ///
    /// 再接続後の取りこぼし補完に使う。ページ境界の同時刻メッセージは ID で重複排除する。
    pub async fn fetch_since(
        &self,
        room_id: &RoomId,
        since: Timestamp,
    ) -> Result<Vec<Message>, HistoryError> {
        let mut cursor = since;
        let mut seen: HashSet<MessageId> = HashSet::new();
        let mut collected = Vec::new();

        loop {
            let page = self
                .backend
                .query(HistoryQuery::since(room_id.clone(), cursor, self.page_size))
                .await?;
            let fetched = page.len();
            let last = page.last().map(|m| m.timestamp);

            collected.extend(page.into_iter().filter(|m| seen.insert(m.id.clone())));

            match last {
                Some(last) if fetched >= self.page_size => {
                    if last == cursor {
                        tracing::warn!(
                            "More than {} messages share timestamp {} in room '{}'; gap-fill stops here",
                            self.page_size,
                            last.value(),
                            room_id
                        );
                        break;
                    }
                    cursor = last;
                }
                _ => break,
            }
        }

        tracing::debug!(
            "Fetched {} messages since {} for room '{}'",
            collected.len(),
            since.value(),
            room_id
        );
        Ok(collected)
    }
}

/// 古い履歴読み込みの多重実行を防ぐガード（drop で解放）
struct LoadingGuard<'a> {
    rooms: &'a Mutex<HashSet<RoomId>>,
    room_id: RoomId,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(rooms: &'a Mutex<HashSet<RoomId>>, room_id: &RoomId) -> Result<Self, HistoryError> {
        let mut loading = rooms.lock().unwrap_or_else(PoisonError::into_inner);
        if !loading.insert(room_id.clone()) {
            return Err(HistoryError::AlreadyLoading(room_id.to_string()));
        }
        Ok(Self {
            rooms,
            room_id: room_id.clone(),
        })
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut loading = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        loading.remove(&self.room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{
            BackendError, MessageType, RepositoryError, SortOrder, UserId, backend::MockChatBackend,
        },
        infrastructure::repository::InMemoryFeedRepository,
    };

    fn room() -> RoomId {
        RoomId::new("lobby".to_string()).unwrap()
    }

    fn message(n: i64) -> Message {
        Message::new(
            MessageId::confirmed(format!("m{}", n)).unwrap(),
            room(),
            UserId::new("alice".to_string()).unwrap(),
            "Alice".to_string(),
            format!("message {}", n),
            MessageType::Text,
            Timestamp::new(n * 1000),
        )
    }

    /// 新しい順に並んだ `from..=to` のメッセージ
    fn newest_first(from: i64, to: i64) -> Vec<Message> {
        (from..=to).rev().map(message).collect()
    }

    async fn open_repository() -> Arc<InMemoryFeedRepository> {
        let repository = Arc::new(InMemoryFeedRepository::new());
        repository.open(&room()).await;
        repository
    }

    fn timestamps(messages: &[Message]) -> Vec<i64> {
        messages.iter().map(|m| m.timestamp.value() / 1000).collect()
    }

    #[tokio::test]
    async fn test_load_initial_orders_ascending() {
        // テスト項目: 最新ページを新しい順に取得し、古い順に並べ替える
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        backend
            .expect_query()
            .withf(|q| {
                q.order == SortOrder::Descending
                    && q.limit == 3
                    && q.before.is_none()
                    && !q.include_deleted
            })
            .times(1)
            .returning(|_| Ok(newest_first(8, 10)));
        let repository = open_repository().await;
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), repository.clone(), 3);

        // when (操作):
        let feed = usecase.load_initial(&room()).await.unwrap();

        // then (期待する結果):
        assert_eq!(timestamps(feed.messages()), vec![8, 9, 10]);
        assert!(feed.has_more());
        assert_eq!(repository.snapshot(&room()).await.unwrap(), feed);
    }

    #[tokio::test]
    async fn test_load_initial_empty_room_is_not_an_error() {
        // テスト項目: メッセージが 0 件の Room では空のフィードと has_more = false が返る
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        backend.expect_query().returning(|_| Ok(vec![]));
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), open_repository().await, 50);

        // when (操作):
        let feed = usecase.load_initial(&room()).await.unwrap();

        // then (期待する結果):
        assert!(feed.is_empty());
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn test_load_initial_failure_leaves_feed_unchanged() {
        // テスト項目: バックエンド障害はエラーとして返り、フィードは変更されない
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        backend
            .expect_query()
            .returning(|_| Err(BackendError::Unavailable("timeout".to_string())));
        let repository = open_repository().await;
        let before = repository.snapshot(&room()).await.unwrap();
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), repository.clone(), 50);

        // when (操作):
        let result = usecase.load_initial(&room()).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(HistoryError::Backend(BackendError::Unavailable(
                "timeout".to_string()
            )))
        );
        assert_eq!(repository.snapshot(&room()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_load_initial_after_leave_reports_room_closed() {
        // テスト項目: 退出済みの Room への読み込み結果は反映されず RoomClosed になる
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        backend.expect_query().returning(|_| Ok(newest_first(1, 2)));
        let repository = Arc::new(InMemoryFeedRepository::new());
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), repository.clone(), 50);

        // when (操作):
        let result = usecase.load_initial(&room()).await;

        // then (期待する結果):
        assert_eq!(result, Err(HistoryError::RoomClosed("lobby".to_string())));
        assert_eq!(
            repository.snapshot(&room()).await,
            Err(RepositoryError::RoomClosed("lobby".to_string()))
        );
    }

    #[tokio::test]
    async fn test_load_older_queries_strictly_before_cursor() {
        // テスト項目: カーソルより古いメッセージを問い合わせ、フィードの先頭に追加する
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        backend
            .expect_query()
            .withf(|q| q.before.is_none())
            .returning(|_| Ok(newest_first(4, 5)));
        backend
            .expect_query()
            .withf(|q| q.before == Some(Timestamp::new(4000)) && q.limit == 2)
            .times(1)
            .returning(|_| Ok(newest_first(2, 3)));
        let repository = open_repository().await;
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), repository.clone(), 2);
        usecase.load_initial(&room()).await.unwrap();

        // when (操作):
        let older = usecase
            .load_older(&room(), Timestamp::new(4000), 2)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(timestamps(&older), vec![2, 3]);
        let feed = repository.snapshot(&room()).await.unwrap();
        assert_eq!(timestamps(feed.messages()), vec![2, 3, 4, 5]);
        assert!(feed.has_more());
    }

    #[tokio::test]
    async fn test_load_older_rejects_concurrent_request() {
        // テスト項目: 同じ Room の古い履歴を読み込み中なら、2 回目はバックエンドに問い合わせず拒否される
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        backend.expect_query().times(0);
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), open_repository().await, 50);
        let _in_flight = LoadingGuard::acquire(&usecase.loading_older, &room()).unwrap();

        // when (操作):
        let result = usecase.load_older(&room(), Timestamp::new(1000), 50).await;

        // then (期待する結果):
        assert_eq!(result, Err(HistoryError::AlreadyLoading("lobby".to_string())));
    }

    #[tokio::test]
    async fn test_load_older_guard_is_released_after_failure() {
        // テスト項目: 読み込み失敗後もガードが解放され、再試行できる
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        let mut calls = 0;
        backend.expect_query().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(BackendError::Unavailable("offline".to_string()))
            } else {
                Ok(vec![])
            }
        });
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), open_repository().await, 50);

        // when (操作):
        let first = usecase.load_older(&room(), Timestamp::new(1000), 50).await;
        let second = usecase.load_older(&room(), Timestamp::new(1000), 50).await;

        // then (期待する結果):
        assert!(matches!(first, Err(HistoryError::Backend(_))));
        assert_eq!(second, Ok(vec![]));
    }

    #[tokio::test]
    async fn test_load_more_on_empty_feed_is_single_flight() {
        // テスト項目: 未読み込みのフィードで load_more が重なっても、2 回目は問い合わせず拒否され、解放後は最新ページを読む
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        backend
            .expect_query()
            .withf(|q| q.before.is_none())
            .times(1)
            .returning(|_| Ok(newest_first(1, 2)));
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), open_repository().await, 50);
        let in_flight = LoadingGuard::acquire(&usecase.loading_older, &room()).unwrap();

        // when (操作):
        let rejected = usecase.load_more(&room()).await;
        drop(in_flight);
        let loaded = usecase.load_more(&room()).await.unwrap();

        // then (期待する結果):
        assert_eq!(rejected, Err(HistoryError::AlreadyLoading("lobby".to_string())));
        assert_eq!(timestamps(&loaded.messages), vec![1, 2]);
        assert!(!loaded.has_more);
    }

    #[tokio::test]
    async fn test_load_more_without_more_history_skips_backend() {
        // テスト項目: has_more = false のフィードでは問い合わせずに空ページを返す
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        backend.expect_query().times(1).returning(|_| Ok(newest_first(1, 2)));
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), open_repository().await, 50);
        usecase.load_initial(&room()).await.unwrap();

        // when (操作):
        let page = usecase.load_more(&room()).await.unwrap();

        // then (期待する結果):
        assert_eq!(
            page,
            OlderPage {
                messages: vec![],
                has_more: false,
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_drops_soft_deleted_messages() {
        // テスト項目: リフレッシュで論理削除済みのメッセージがフィードから消える
        // given (前提条件):
        let repository = open_repository().await;
        let mut deleted = message(1);
        deleted.is_deleted = true;
        repository
            .merge_page(&room(), vec![deleted, message(2)], 50, PageKind::Initial)
            .await
            .unwrap();
        let mut backend = MockChatBackend::new();
        backend
            .expect_query()
            .withf(|q| !q.include_deleted)
            .returning(|_| Ok(newest_first(2, 2)));
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), repository, 50);

        // when (操作):
        let feed = usecase.refresh(&room()).await.unwrap();

        // then (期待する結果):
        assert_eq!(timestamps(feed.messages()), vec![2]);
    }

    #[tokio::test]
    async fn test_fetch_since_pages_until_short_page() {
        // テスト項目: 取りこぼし補完はページを辿り、境界の重複を除いて全件返す
        // given (前提条件):
        let mut backend = MockChatBackend::new();
        backend
            .expect_query()
            .withf(|q| q.since == Some(Timestamp::new(1000)) && q.order == SortOrder::Ascending)
            .returning(|_| Ok(vec![message(1), message(2)]));
        backend
            .expect_query()
            .withf(|q| q.since == Some(Timestamp::new(2000)))
            .returning(|_| Ok(vec![message(2), message(3)]));
        backend
            .expect_query()
            .withf(|q| q.since == Some(Timestamp::new(3000)))
            .returning(|_| Ok(vec![message(3)]));
        let repository = open_repository().await;
        let usecase = LoadHistoryUseCase::new(Arc::new(backend), repository.clone(), 2);

        // when (操作):
        let fetched = usecase
            .fetch_since(&room(), Timestamp::new(1000))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(timestamps(&fetched), vec![1, 2, 3]);
        assert!(repository.snapshot(&room()).await.unwrap().is_empty());
    }
}
