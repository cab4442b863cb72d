//! UseCase: メッセージ送信（楽観的追加）
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - SendMessageUseCase::execute() メソッド
//!
//! ### なぜこのテストが必要か
//! - 送信直後にローカルメッセージがフィードへ追加されることを保証
//! - バックエンドの確認でローカルメッセージが確定版に置き換わることを保証
//! - エコーと送信確認のどちらが先に届いても重複しないことを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：送信 → 確定
//! - 異常系：バックエンドが送信を拒否
//! - エッジケース：確認より先にエコーが届く

use std::sync::Arc;

use idobata_shared::time::Clock;
use uuid::Uuid;

use crate::domain::{
    ChatBackend, FeedChange, FeedEventPublisher, FeedMutation, FeedRepository, Message, MessageId,
    OutgoingMessage, RepositoryError, RoomId, Timestamp,
};

use super::error::SendMessageError;

/// メッセージ送信のユースケース
pub struct SendMessageUseCase {
    /// ChatBackend（バックエンドの抽象化）
    backend: Arc<dyn ChatBackend>,
    /// Repository（フィードストアの抽象化）
    repository: Arc<dyn FeedRepository>,
    /// FeedEventPublisher（正規化イベント配信の抽象化）
    publisher: Arc<dyn FeedEventPublisher>,
    /// ローカルメッセージの仮の時刻
    clock: Arc<dyn Clock>,
}

impl SendMessageUseCase {
    /// 新しい SendMessageUseCase を作成
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        repository: Arc<dyn FeedRepository>,
        publisher: Arc<dyn FeedEventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            repository,
            publisher,
            clock,
        }
    }

    /// メッセージ送信を実行
    ///
    /// 1. `Pending` ID のローカルメッセージをフィードに追加して配信
    /// 2. バックエンドに挿入
    /// 3. 成功すれば確定版で置き換え、失敗すれば送信失敗として印を付ける
    ///
    /// # Returns
    ///
    /// * `Ok(Message)` - バックエンド確定版のメッセージ
    /// * `Err(SendMessageError)` - 送信失敗（ローカルメッセージは `send_failed` として残る）
    pub async fn execute(&self, outgoing: OutgoingMessage) -> Result<Message, SendMessageError> {
        let room_id = outgoing.room_id.clone();
        let local_id = Uuid::new_v4().to_string();
        let pending = self.pending_message(outgoing, &local_id);

        let change = self
            .repository
            .apply(&room_id, FeedMutation::InsertPending(pending.clone()))
            .await?;
        self.publish(&room_id, change).await;

        match self.backend.insert(pending).await {
            Ok(confirmed) => {
                tracing::debug!(
                    "Message '{}' confirmed as '{}' in room '{}'",
                    local_id,
                    confirmed.id,
                    room_id
                );
                self.apply_quietly(
                    &room_id,
                    FeedMutation::Reconcile {
                        local_id,
                        message: confirmed.clone(),
                    },
                )
                .await;
                Ok(confirmed)
            }
            Err(e) => {
                tracing::warn!("Failed to send message in room '{}': {}", room_id, e);
                self.apply_quietly(&room_id, FeedMutation::MarkSendFailed { local_id })
                    .await;
                Err(e.into())
            }
        }
    }

    fn pending_message(&self, outgoing: OutgoingMessage, local_id: &str) -> Message {
        Message {
            id: MessageId::Pending {
                local_id: local_id.to_string(),
            },
            room_id: outgoing.room_id,
            sender_id: outgoing.sender_id,
            sender_name: outgoing.sender_name,
            sender_avatar: outgoing.sender_avatar,
            content: outgoing.content,
            message_type: outgoing.message_type,
            timestamp: Timestamp::new(self.clock.now_millis()),
            is_read: false,
            is_deleted: false,
            reply_to: outgoing.reply_to,
            reactions: Vec::new(),
            revision: None,
            client_ref: Some(local_id.to_string()),
            send_failed: false,
        }
    }

    /// 送信中に退出していた場合は反映しない
    async fn apply_quietly(&self, room_id: &RoomId, mutation: FeedMutation) {
        match self.repository.apply(room_id, mutation).await {
            Ok(change) => self.publish(room_id, change).await,
            Err(RepositoryError::RoomClosed(_)) => {
                tracing::debug!("Room '{}' closed before send completed", room_id);
            }
        }
    }

    async fn publish(&self, room_id: &RoomId, change: FeedChange) {
        if let Some(event) = change.into_event()
            && let Err(e) = self.publisher.publish(room_id, event).await
        {
            tracing::warn!("Failed to publish feed event for room '{}': {}", room_id, e);
        }
    }
}
