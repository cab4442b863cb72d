//! Conversion logic between DTOs and domain entities.
//!
//! バックエンドの行は信頼せず、全ての項目を検証してからドメインモデルにします。

use idobata_shared::time::{rfc3339_to_timestamp, timestamp_to_rfc3339};

use crate::domain::{
    ConversionError, LiveEvent, Message, MessageId, MessageType, RawChangeEvent, Reaction, RoomId,
    Timestamp, UserId,
};

use super::record::{MessageRecord, ReactionRecord};

const EPOCH_RFC3339: &str = "1970-01-01T00:00:00.000Z";

// ========================================
// DTO → Domain Entity
// ========================================

impl TryFrom<MessageRecord> for Message {
    type Error = ConversionError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let timestamp = rfc3339_to_timestamp(&record.created_at)
            .ok_or_else(|| ConversionError::InvalidTimestamp(record.created_at.clone()))?;

        let reactions = record
            .reactions
            .into_iter()
            .map(Reaction::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            // バックエンドの行は常に確定済み
            id: MessageId::confirmed(record.id)?,
            room_id: RoomId::new(record.room_id)?,
            sender_id: UserId::new(record.sender_id)?,
            sender_name: record.sender_name,
            sender_avatar: record.sender_avatar,
            content: record.content,
            message_type: MessageType::try_from(record.message_type.as_str())?,
            timestamp: Timestamp::new(timestamp),
            is_read: record.is_read,
            is_deleted: record.is_deleted,
            reply_to: record.reply_to,
            reactions,
            revision: record.revision,
            client_ref: record.client_ref,
            send_failed: false,
        })
    }
}

impl TryFrom<ReactionRecord> for Reaction {
    type Error = ConversionError;

    fn try_from(record: ReactionRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId::new(record.user_id)?,
            emoji: record.emoji,
        })
    }
}

impl TryFrom<RawChangeEvent> for LiveEvent {
    type Error = ConversionError;

    fn try_from(event: RawChangeEvent) -> Result<Self, Self::Error> {
        match event.event_type.as_str() {
            "INSERT" => Ok(Self::Insert(decode_message(event.payload)?)),
            "UPDATE" => Ok(Self::Update(decode_message(event.payload)?)),
            "DELETE" => {
                let id = event
                    .payload
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .ok_or(ConversionError::MissingField("id"))?;
                Ok(Self::Delete(MessageId::confirmed(id.to_string())?))
            }
            other => Err(ConversionError::UnknownEventType(other.to_string())),
        }
    }
}

fn decode_message(payload: serde_json::Value) -> Result<Message, ConversionError> {
    let record: MessageRecord = serde_json::from_value(payload)
        .map_err(|e| ConversionError::Malformed(e.to_string()))?;
    Message::try_from(record)
}

// ========================================
// Domain Entity → DTO
// ========================================

impl From<&Message> for MessageRecord {
    fn from(model: &Message) -> Self {
        let created_at = timestamp_to_rfc3339(model.timestamp.value()).unwrap_or_else(|| {
            tracing::warn!(
                "Timestamp {} of message '{}' is out of range",
                model.timestamp.value(),
                model.id
            );
            EPOCH_RFC3339.to_string()
        });

        Self {
            id: model.id.as_str().to_string(),
            room_id: model.room_id.as_str().to_string(),
            sender_id: model.sender_id.as_str().to_string(),
            sender_name: model.sender_name.clone(),
            sender_avatar: model.sender_avatar.clone(),
            content: model.content.clone(),
            message_type: model.message_type.as_str().to_string(),
            created_at,
            is_read: model.is_read,
            is_deleted: model.is_deleted,
            reply_to: model.reply_to.clone(),
            reactions: model
                .reactions
                .iter()
                .map(|reaction| ReactionRecord {
                    user_id: reaction.user_id.as_str().to_string(),
                    emoji: reaction.emoji.clone(),
                })
                .collect(),
            revision: model.revision,
            client_ref: model.client_ref.clone(),
        }
    }
}
