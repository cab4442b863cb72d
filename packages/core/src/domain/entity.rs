//! エンティティ
//!
//! チャットメッセージと Room を定義します。

use super::{
    error::ConversionError,
    value_object::{MessageId, RoomId, Timestamp, UserId},
};

/// メッセージ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    Image,
    Video,
    /// ボイスメッセージ（`content` は音声 URI）
    Audio,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::System => "system",
        }
    }
}

impl TryFrom<&str> for MessageType {
    type Error = ConversionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "system" => Ok(Self::System),
            other => Err(ConversionError::UnknownMessageType(other.to_string())),
        }
    }
}

/// リアクション
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
}

/// チャットメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    /// 本文（ボイスメッセージの場合は音声 URI）
    pub content: String,
    pub message_type: MessageType,
    /// バックエンドの時刻（到着順とは一致しない）
    pub timestamp: Timestamp,
    pub is_read: bool,
    /// 論理削除フラグ（クライアントでは再読み込みまで保持する）
    pub is_deleted: bool,
    pub reply_to: Option<String>,
    pub reactions: Vec<Reaction>,
    /// バックエンドのリビジョン番号（提供されている場合のみ）
    pub revision: Option<u64>,
    /// 送信時にクライアントが付与したローカル ID（エコーとの突き合わせ用）
    pub client_ref: Option<String>,
    /// 楽観的送信が失敗した
    pub send_failed: bool,
}

impl Message {
    /// 必須項目のみを指定してメッセージを作成
    pub fn new(
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        sender_name: String,
        content: String,
        message_type: MessageType,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            sender_name,
            sender_avatar: None,
            content,
            message_type,
            timestamp,
            is_read: false,
            is_deleted: false,
            reply_to: None,
            reactions: Vec::new(),
            revision: None,
            client_ref: None,
            send_failed: false,
        }
    }

    pub fn is_voice(&self) -> bool {
        self.message_type == MessageType::Audio
    }

    /// 同じ内容のメッセージかどうか（重複配信の判定）
    ///
    /// 両方にリビジョンがあればリビジョンで比較し、なければ全フィールドで比較する。
    pub fn same_revision(&self, other: &Message) -> bool {
        match (self.revision, other.revision) {
            (Some(a), Some(b)) => a == b && self.id == other.id,
            _ => self == other,
        }
    }

    /// `other` が自分より古いリビジョンかどうか
    pub fn is_newer_than(&self, other: &Message) -> bool {
        match (self.revision, other.revision) {
            (Some(a), Some(b)) => a > b,
            _ => true,
        }
    }
}

/// 送信前のメッセージ（楽観的送信の入力）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to: Option<String>,
}

/// Room 種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomType {
    Global,
    Local,
    Topic,
}

/// 位置情報（ローカル Room 用）
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub label: Option<String>,
}

/// Room 一覧に表示する最新メッセージのプレビュー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePreview {
    pub message_id: MessageId,
    pub sender_name: String,
    pub text: String,
    pub timestamp: Timestamp,
}

impl MessagePreview {
    const MAX_CHARS: usize = 80;

    pub fn from_message(message: &Message) -> Self {
        let text = match message.message_type {
            MessageType::Text | MessageType::System => {
                let mut text: String = message.content.chars().take(Self::MAX_CHARS).collect();
                if message.content.chars().count() > Self::MAX_CHARS {
                    text.push('…');
                }
                text
            }
            MessageType::Image => "[image]".to_string(),
            MessageType::Video => "[video]".to_string(),
            MessageType::Audio => "[voice message]".to_string(),
        };
        Self {
            message_id: message.id.clone(),
            sender_name: message.sender_name.clone(),
            text,
            timestamp: message.timestamp,
        }
    }
}

/// チャット Room
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub room_type: RoomType,
    pub member_count: u32,
    pub online_count: u32,
    pub is_active: bool,
    pub location: Option<GeoLocation>,
    pub last_activity: Timestamp,
    pub last_message: Option<MessagePreview>,
}

impl Room {
    pub fn new(id: RoomId, name: String, room_type: RoomType, created_at: Timestamp) -> Self {
        Self {
            id,
            name,
            description: String::new(),
            room_type,
            member_count: 0,
            online_count: 0,
            is_active: true,
            location: None,
            last_activity: created_at,
            last_message: None,
        }
    }

    /// メッセージでプレビューと最終アクティビティを更新
    ///
    /// 別 Room のメッセージ・削除済みメッセージ・既存プレビューより古いメッセージは無視する。
    /// 更新した場合は `true` を返す。
    pub fn apply_preview(&mut self, message: &Message) -> bool {
        if message.room_id != self.id || message.is_deleted {
            return false;
        }
        if let Some(current) = &self.last_message
            && current.timestamp > message.timestamp
        {
            return false;
        }
        self.last_message = Some(MessagePreview::from_message(message));
        if message.timestamp > self.last_activity {
            self.last_activity = message.timestamp;
        }
        true
    }
}
