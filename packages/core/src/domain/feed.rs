//! メッセージフィード（Room ごとの表示用メッセージ列）
//!
//! 履歴の読み込みとライブイベントの両方がこのモデルを経由して変更されます。
//! どの順序で変更が到着しても、次の不変条件を保ちます。
//!
//! - 同じ `MessageId` のメッセージは高々 1 件
//! - メッセージ列は `timestamp` の昇順（同時刻は ID 順）

use std::cmp::Ordering;

use super::{
    entity::Message,
    value_object::{MessageId, RoomId, Timestamp},
};

/// 履歴ページの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// 最新ページ（入室時）
    Initial,
    /// より古いページ（スクロール時）
    Older,
    /// 再接続後の取りこぼし補完
    GapFill,
}

/// フィードへの変更要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMutation {
    Insert(Message),
    Update(Message),
    Delete(MessageId),
    /// 楽観的送信のローカルメッセージを追加
    InsertPending(Message),
    /// ローカルメッセージをバックエンド確定版に置き換え
    Reconcile { local_id: String, message: Message },
    /// 楽観的送信の失敗を記録
    MarkSendFailed { local_id: String },
}

/// フィードに実際に起きた変更
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedChange {
    Inserted(Message),
    Updated(Message),
    Reconciled { local_id: String, message: Message },
    Deleted(MessageId),
    /// 重複・古いリビジョン・対象なしなどで何も変わらなかった
    Unchanged,
}

impl FeedChange {
    /// 購読者へ配信する正規化イベントに変換（変更なしの場合は `None`）
    pub fn into_event(self) -> Option<FeedEvent> {
        match self {
            Self::Inserted(message) => Some(FeedEvent::Insert(message)),
            Self::Updated(message) => Some(FeedEvent::Update(message)),
            Self::Reconciled { local_id, message } => {
                Some(FeedEvent::Reconciled { local_id, message })
            }
            Self::Deleted(id) => Some(FeedEvent::Delete(id)),
            Self::Unchanged => None,
        }
    }

    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// 購読者へ配信する正規化イベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Insert(Message),
    Update(Message),
    Delete(MessageId),
    /// ローカルメッセージ `local_id` が確定版 `message` に置き換わった
    Reconciled { local_id: String, message: Message },
}

/// Room ごとのメッセージフィード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFeed {
    room_id: RoomId,
    messages: Vec<Message>,
    has_more: bool,
}

impl MessageFeed {
    /// 空のフィードを作成（履歴未読み込みのため `has_more` は `true`）
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            messages: Vec::new(),
            has_more: true,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// 表示順（timestamp 昇順）のメッセージ
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position(id).map(|idx| &self.messages[idx])
    }

    /// 古い履歴を読み込む際のカーソル（確定済みメッセージの最古時刻）
    pub fn oldest_timestamp(&self) -> Option<Timestamp> {
        self.messages
            .iter()
            .find(|m| !m.id.is_pending())
            .map(|m| m.timestamp)
    }

    /// 取りこぼし補完の起点（確定済みメッセージの最新時刻）
    pub fn newest_timestamp(&self) -> Option<Timestamp> {
        self.messages
            .iter()
            .rev()
            .find(|m| !m.id.is_pending())
            .map(|m| m.timestamp)
    }

    /// 履歴ページをマージ
    ///
    /// `Initial` / `Older` ではページが `page_size` 未満なら履歴の先頭に到達したとみなす。
    pub fn merge_page(
        &mut self,
        page: Vec<Message>,
        page_size: usize,
        kind: PageKind,
    ) -> Vec<FeedChange> {
        let fetched = page.len();
        let changes = page
            .into_iter()
            .map(|message| self.upsert(message))
            .filter(FeedChange::is_changed)
            .collect();

        match kind {
            PageKind::Initial | PageKind::Older => self.has_more = fetched >= page_size,
            PageKind::GapFill => {}
        }

        changes
    }

    /// フィードを最新ページで置き換え（送信中のローカルメッセージは残す）
    pub fn reset(&mut self, page: Vec<Message>, page_size: usize) {
        let fetched = page.len();
        self.messages.retain(|m| m.id.is_pending());
        for message in page {
            self.upsert(message);
        }
        self.has_more = fetched >= page_size;
    }

    /// 変更要求を適用
    pub fn apply(&mut self, mutation: FeedMutation) -> FeedChange {
        match mutation {
            FeedMutation::Insert(message) => self.upsert(message),
            FeedMutation::Update(message) => self.update(message),
            FeedMutation::Delete(id) => self.delete(&id),
            FeedMutation::InsertPending(message) => self.insert_pending(message),
            FeedMutation::Reconcile { local_id, message } => self.reconcile(local_id, message),
            FeedMutation::MarkSendFailed { local_id } => self.mark_send_failed(&local_id),
        }
    }

    fn upsert(&mut self, incoming: Message) -> FeedChange {
        if let Some(idx) = self.position(&incoming.id) {
            return self.replace_at(idx, incoming);
        }

        // 楽観的送信のエコー: client_ref でローカルメッセージと突き合わせる
        if let Some(local_id) = incoming.client_ref.clone()
            && let Some(idx) = self.position(&MessageId::Pending {
                local_id: local_id.clone(),
            })
        {
            self.messages.remove(idx);
            self.insert_sorted(incoming.clone());
            return FeedChange::Reconciled {
                local_id,
                message: incoming,
            };
        }

        self.insert_sorted(incoming.clone());
        FeedChange::Inserted(incoming)
    }

    fn update(&mut self, incoming: Message) -> FeedChange {
        match self.position(&incoming.id) {
            Some(idx) => self.replace_at(idx, incoming),
            None => {
                tracing::debug!(
                    "Update for message '{}' not in feed '{}', ignoring",
                    incoming.id,
                    self.room_id
                );
                FeedChange::Unchanged
            }
        }
    }

    fn delete(&mut self, id: &MessageId) -> FeedChange {
        match self.position(id) {
            Some(idx) => {
                self.messages.remove(idx);
                FeedChange::Deleted(id.clone())
            }
            None => FeedChange::Unchanged,
        }
    }

    fn insert_pending(&mut self, message: Message) -> FeedChange {
        if !message.id.is_pending() || self.position(&message.id).is_some() {
            return FeedChange::Unchanged;
        }
        self.insert_sorted(message.clone());
        FeedChange::Inserted(message)
    }

    fn reconcile(&mut self, local_id: String, message: Message) -> FeedChange {
        let pending = MessageId::Pending {
            local_id: local_id.clone(),
        };
        let removed = self.position(&pending).map(|idx| self.messages.remove(idx));
        let confirmed_id = message.id.clone();
        let change = self.upsert(message);

        if removed.is_none() {
            return change;
        }
        match self.get(&confirmed_id) {
            Some(stored) => FeedChange::Reconciled {
                local_id,
                message: stored.clone(),
            },
            None => change,
        }
    }

    fn mark_send_failed(&mut self, local_id: &str) -> FeedChange {
        let pending = MessageId::Pending {
            local_id: local_id.to_string(),
        };
        match self.position(&pending) {
            Some(idx) => {
                let message = &mut self.messages[idx];
                if message.send_failed {
                    return FeedChange::Unchanged;
                }
                message.send_failed = true;
                FeedChange::Updated(message.clone())
            }
            None => FeedChange::Unchanged,
        }
    }

    fn replace_at(&mut self, idx: usize, incoming: Message) -> FeedChange {
        let existing = &self.messages[idx];
        if existing.same_revision(&incoming) || !incoming.is_newer_than(existing) {
            return FeedChange::Unchanged;
        }
        self.messages.remove(idx);
        self.insert_sorted(incoming.clone());
        FeedChange::Updated(incoming)
    }

    fn insert_sorted(&mut self, message: Message) {
        let idx = self
            .messages
            .partition_point(|m| display_order(m, &message) == Ordering::Less);
        self.messages.insert(idx, message);
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }
}

/// 表示順: timestamp 昇順、同時刻は ID の文字列順
fn display_order(a: &Message, b: &Message) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.id.as_str().cmp(b.id.as_str()))
}
