//! バックエンドのメッセージ行の DTO
//!
//! 変更イベントのペイロードと同じ形（snake_case、時刻は RFC 3339）で、
//! バックエンドが付与しない項目は省略可能です。

use serde::{Deserialize, Serialize};

/// メッセージ行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    pub content: String,
    /// "text" / "image" / "video" / "audio" / "system"
    pub message_type: String,
    /// RFC 3339 形式の作成時刻
    pub created_at: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub reactions: Vec<ReactionRecord>,
    #[serde(default)]
    pub revision: Option<u64>,
    /// 送信したクライアントのローカル ID
    #[serde(default)]
    pub client_ref: Option<String>,
}

/// リアクション
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub user_id: String,
    pub emoji: String,
}
