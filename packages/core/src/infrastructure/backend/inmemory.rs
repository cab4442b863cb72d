//! InMemory Chat Backend 実装
//!
//! ドメイン層が定義する ChatBackend trait の具体的な実装。
//! メッセージテーブルと購読チャンネルをメモリ上で再現し、
//! テストと CLI デモから切断・復帰・失敗を注入できるようにします。
//!
//! 変更イベントは実際のバックエンドと同じく `MessageRecord` の JSON ペイロードとして配信します。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use idobata_shared::time::{Clock, SystemClock};
use tokio::sync::{Mutex, mpsc};

use crate::domain::{
    BackendError, BackendSubscription, ChatBackend, HistoryQuery, Message, MessageId,
    RawChangeEvent, RoomId, SortOrder, SubscriptionId, SubscriptionSignal, Timestamp,
};

use crate::infrastructure::dto::MessageRecord;

struct Subscriber {
    room_id: RoomId,
    sender: mpsc::UnboundedSender<SubscriptionSignal>,
}

struct BackendState {
    /// メッセージテーブル（挿入順）
    messages: Vec<Message>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    next_subscription: u64,
    next_message: u64,
    online: bool,
    /// 失敗させる残りの問い合わせ回数
    failing_queries: usize,
}

impl BackendState {
    fn upsert(&mut self, message: Message) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
    }

    fn broadcast(&mut self, room_id: &RoomId, event: RawChangeEvent) {
        let mut delivered = 0;
        for subscriber in self.subscribers.values() {
            if &subscriber.room_id != room_id {
                continue;
            }
            if subscriber
                .sender
                .send(SubscriptionSignal::Event(event.clone()))
                .is_ok()
            {
                delivered += 1;
            }
        }
        tracing::debug!(
            "{} event delivered to {} subscribers of room '{}'",
            event.event_type,
            delivered,
            room_id
        );
    }
}

/// インメモリ Chat Backend 実装
pub struct InMemoryChatBackend {
    state: Arc<Mutex<BackendState>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryChatBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable() -> BackendError {
    BackendError::Unavailable("backend is offline".to_string())
}

fn record_payload(message: &Message) -> serde_json::Value {
    match serde_json::to_value(MessageRecord::from(message)) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to serialize message '{}': {}", message.id, e);
            serde_json::Value::Null
        }
    }
}

impl InMemoryChatBackend {
    /// システム時刻で採番する InMemoryChatBackend を作成
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// 採番に使う時計を指定して作成
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                messages: Vec::new(),
                subscribers: HashMap::new(),
                next_subscription: 1,
                next_message: 1,
                online: true,
                failing_queries: 0,
            })),
            clock,
        }
    }

    /// イベントを配信せずにメッセージテーブルへ直接書き込む
    pub async fn seed(&self, messages: Vec<Message>) {
        let mut state = self.state.lock().await;
        for message in messages {
            state.upsert(message);
        }
    }

    /// 他のクライアントによる挿入を再現（オフライン中も保存される）
    pub async fn push_insert(&self, room_id: &RoomId, message: &Message) {
        let mut state = self.state.lock().await;
        state.upsert(message.clone());
        state.broadcast(
            room_id,
            RawChangeEvent {
                event_type: "INSERT".to_string(),
                payload: record_payload(message),
            },
        );
    }

    /// 他のクライアントによる更新を再現
    pub async fn push_update(&self, room_id: &RoomId, message: &Message) {
        let mut state = self.state.lock().await;
        state.upsert(message.clone());
        state.broadcast(
            room_id,
            RawChangeEvent {
                event_type: "UPDATE".to_string(),
                payload: record_payload(message),
            },
        );
    }

    /// 物理削除を再現
    pub async fn push_delete(&self, room_id: &RoomId, message_id: &MessageId) {
        let mut state = self.state.lock().await;
        state.messages.retain(|m| &m.id != message_id);
        state.broadcast(
            room_id,
            RawChangeEvent {
                event_type: "DELETE".to_string(),
                payload: serde_json::json!({ "id": message_id.as_str() }),
            },
        );
    }

    /// 未加工のイベントをそのまま配信（メッセージテーブルは変更しない）
    pub async fn push_raw(&self, room_id: &RoomId, event: RawChangeEvent) {
        let mut state = self.state.lock().await;
        state.broadcast(room_id, event);
    }

    /// 通信路の障害を再現（全購読が終了し、復帰までオフラインになる）
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.online = false;
        for (id, subscriber) in state.subscribers.drain() {
            let _ = subscriber
                .sender
                .send(SubscriptionSignal::TransportFailure("connection lost".to_string()));
            tracing::debug!("Subscription {} terminated by disconnect", id.0);
        }
        tracing::info!("Backend went offline");
    }

    /// オフラインから復帰
    pub async fn restore(&self) {
        let mut state = self.state.lock().await;
        state.online = true;
        tracing::info!("Backend is back online");
    }

    /// 次の `count` 回の問い合わせを失敗させる
    pub async fn fail_next_queries(&self, count: usize) {
        self.state.lock().await.failing_queries = count;
    }

    /// Room の有効な購読数（受信側が破棄された購読は数えない）
    pub async fn subscription_count(&self, room_id: &RoomId) -> usize {
        let state = self.state.lock().await;
        state
            .subscribers
            .values()
            .filter(|s| &s.room_id == room_id && !s.sender.is_closed())
            .count()
    }

    /// Room のメッセージテーブル（挿入順）
    pub async fn messages(&self, room_id: &RoomId) -> Vec<Message> {
        let state = self.state.lock().await;
        state
            .messages
            .iter()
            .filter(|m| &m.room_id == room_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatBackend for InMemoryChatBackend {
    async fn query(&self, query: HistoryQuery) -> Result<Vec<Message>, BackendError> {
        let mut state = self.state.lock().await;
        if !state.online {
            return Err(unavailable());
        }
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(BackendError::Unavailable("query failed".to_string()));
        }

        let mut rows: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.room_id == query.room_id)
            .filter(|m| query.include_deleted || !m.is_deleted)
            .filter(|m| query.before.is_none_or(|before| m.timestamp < before))
            .filter(|m| query.since.is_none_or(|since| m.timestamp >= since))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        if query.order == SortOrder::Descending {
            rows.reverse();
        }
        rows.truncate(query.limit);

        Ok(rows)
    }

    async fn subscribe(&self, room_id: &RoomId) -> Result<BackendSubscription, BackendError> {
        let mut state = self.state.lock().await;
        if !state.online {
            return Err(unavailable());
        }

        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;

        let (sender, receiver) = mpsc::unbounded_channel();
        // 受信側はまだ生きているので失敗しない
        let _ = sender.send(SubscriptionSignal::Confirmed);
        state.subscribers.insert(
            id,
            Subscriber {
                room_id: room_id.clone(),
                sender,
            },
        );
        tracing::debug!("Subscription {} opened for room '{}'", id.0, room_id);

        let signals = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|signal| (signal, receiver))
        })
        .boxed();

        Ok(BackendSubscription { id, signals })
    }

    async fn unsubscribe(&self, subscription_id: SubscriptionId) {
        let mut state = self.state.lock().await;
        if state.subscribers.remove(&subscription_id).is_some() {
            tracing::debug!("Subscription {} closed", subscription_id.0);
        }
    }

    async fn insert(&self, message: Message) -> Result<Message, BackendError> {
        let mut state = self.state.lock().await;
        if !state.online {
            return Err(unavailable());
        }
        if message.content.trim().is_empty() {
            return Err(BackendError::Rejected("content is empty".to_string()));
        }

        let id = format!("msg-{}", state.next_message);
        state.next_message += 1;

        let confirmed = Message {
            id: MessageId::Confirmed { id },
            timestamp: Timestamp::new(self.clock.now_millis()),
            revision: Some(1),
            send_failed: false,
            ..message
        };

        state.upsert(confirmed.clone());
        let room_id = confirmed.room_id.clone();
        state.broadcast(
            &room_id,
            RawChangeEvent {
                event_type: "INSERT".to_string(),
                payload: record_payload(&confirmed),
            },
        );

        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageType, UserId};
    use idobata_shared::time::SteppingClock;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - InMemoryChatBackend の問い合わせ条件・購読・挿入
    //
    // 【なぜこのテストが必要か】
    // - 履歴読み込みと取りこぼし補完のテストはこの実装の問い合わせ結果に依存する
    // - 切断の再現が購読ストリームを正しく終了させることを保証する
    //
    // 【どのようなシナリオをテストするか】
    // 1. 最新ページ・より古いページ・補完用の問い合わせ
    // 2. 購読の確認シグナルとイベント配信
    // 3. 切断による購読の終了とオフライン中の失敗
    // 4. 挿入で採番され、クライアント ID が保持される
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

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    async fn seeded() -> InMemoryChatBackend {
        let backend = InMemoryChatBackend::new();
        let mut deleted = message("m2", 2000);
        deleted.is_deleted = true;
        backend
            .seed(vec![
                message("m3", 3000),
                message("m1", 1000),
                deleted,
                message("m4", 4000),
            ])
            .await;
        backend
    }

    #[tokio::test]
    async fn test_latest_query_is_newest_first_without_deleted() {
        // テスト項目: 最新ページは新しい順で、論理削除済みを含まない
        // given (前提条件):
        let backend = seeded().await;

        // when (操作):
        let rows = backend.query(HistoryQuery::latest(room(), 2)).await.unwrap();

        // then (期待する結果):
        assert_eq!(ids(&rows), vec!["m4", "m3"]);
    }

    #[tokio::test]
    async fn test_older_than_is_strict() {
        // テスト項目: より古いページはカーソルの時刻を含まない
        // given (前提条件):
        let backend = seeded().await;

        // when (操作):
        let rows = backend
            .query(HistoryQuery::older_than(room(), Timestamp::new(3000), 10))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(ids(&rows), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_since_is_inclusive_and_includes_deleted() {
        // テスト項目: 補完用の問い合わせは起点を含み、古い順で論理削除済みも返す
        // given (前提条件):
        let backend = seeded().await;

        // when (操作):
        let rows = backend
            .query(HistoryQuery::since(room(), Timestamp::new(2000), 10))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(ids(&rows), vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_injected_query_failures() {
        // テスト項目: 指定した回数だけ問い合わせが失敗し、その後は成功する
        // given (前提条件):
        let backend = seeded().await;
        backend.fail_next_queries(1).await;

        // when (操作):
        let first = backend.query(HistoryQuery::latest(room(), 10)).await;
        let second = backend.query(HistoryQuery::latest(room(), 10)).await;

        // then (期待する結果):
        assert!(matches!(first, Err(BackendError::Unavailable(_))));
        assert_eq!(second.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_subscription_receives_confirmation_then_events() {
        // テスト項目: 購読は確認シグナルの後に同じ Room のイベントだけを受け取る
        // given (前提条件):
        let backend = InMemoryChatBackend::new();
        let mut subscription = backend.subscribe(&room()).await.unwrap();
        let other = RoomId::new("other".to_string()).unwrap();

        // when (操作):
        backend.push_insert(&other, &message("x1", 500)).await;
        backend.push_insert(&room(), &message("m1", 1000)).await;

        // then (期待する結果):
        assert_eq!(
            subscription.signals.next().await,
            Some(SubscriptionSignal::Confirmed)
        );
        let Some(SubscriptionSignal::Event(event)) = subscription.signals.next().await else {
            panic!("insert event expected");
        };
        assert_eq!(event.event_type, "INSERT");
        assert_eq!(event.payload["id"], "m1");
    }

    #[tokio::test]
    async fn test_disconnect_ends_subscription_and_goes_offline() {
        // テスト項目: 切断で購読が障害シグナルの後に終了し、復帰まで購読できない
        // given (前提条件):
        let backend = InMemoryChatBackend::new();
        let mut subscription = backend.subscribe(&room()).await.unwrap();
        subscription.signals.next().await;

        // when (操作):
        backend.disconnect().await;

        // then (期待する結果):
        assert!(matches!(
            subscription.signals.next().await,
            Some(SubscriptionSignal::TransportFailure(_))
        ));
        assert_eq!(subscription.signals.next().await, None);
        assert!(backend.subscribe(&room()).await.is_err());
        assert_eq!(backend.subscription_count(&room()).await, 0);

        backend.restore().await;
        assert!(backend.subscribe(&room()).await.is_ok());
        assert_eq!(backend.subscription_count(&room()).await, 1);
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_keeps_client_ref() {
        // テスト項目: 挿入で ID・時刻・リビジョンが採番され、client_ref は保持される
        // given (前提条件):
        let backend = InMemoryChatBackend::with_clock(Arc::new(SteppingClock::new(7000, 10)));
        let mut outgoing = message("unused", 0);
        outgoing.id = MessageId::pending("local-1".to_string()).unwrap();
        outgoing.client_ref = Some("local-1".to_string());

        // when (操作):
        let first = backend.insert(outgoing.clone()).await.unwrap();
        let second = backend.insert(outgoing).await.unwrap();

        // then (期待する結果):
        assert_eq!(first.id.as_str(), "msg-1");
        assert_eq!(second.id.as_str(), "msg-2");
        assert_eq!(first.timestamp, Timestamp::new(7000));
        assert_eq!(second.timestamp, Timestamp::new(7010));
        assert_eq!(first.revision, Some(1));
        assert_eq!(first.client_ref.as_deref(), Some("local-1"));
        assert_eq!(backend.messages(&room()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_rejects_blank_content() {
        // テスト項目: 空の本文は拒否される
        // given (前提条件):
        let backend = InMemoryChatBackend::new();
        let mut outgoing = message("unused", 0);
        outgoing.content = "   ".to_string();

        // when (操作):
        let result = backend.insert(outgoing).await;

        // then (期待する結果):
        assert!(matches!(result, Err(BackendError::Rejected(_))));
    }
}
