//! Feed and playback formatting utilities for client display.

use idobata_core::{
    domain::{FeedEvent, Message, MessageFeed, MessageType, PlaybackSession, Room, SubscriptionState},
    usecase::WaveformFrame,
};
use idobata_shared::time::timestamp_to_rfc3339;

const RULE: &str = "============================================================";

/// Formatter for feed events, connection status and playback progress
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format the initial history page of a room
    ///
    /// # Arguments
    ///
    /// * `feed` - The feed after the initial page was merged
    ///
    /// # Returns
    ///
    /// A formatted block listing every message in display order
    pub fn format_history(feed: &MessageFeed) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n{}\n", RULE));
        output.push_str(&format!("History of #{}:\n", feed.room_id()));

        if feed.is_empty() {
            output.push_str("(No messages)\n");
        } else {
            for message in feed.messages() {
                output.push_str(&Self::format_message_line(message));
                output.push('\n');
            }
        }
        if feed.has_more() {
            output.push_str("(older messages available)\n");
        }

        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// Format a single message as one line
    ///
    /// Pending messages are marked with `…`, failed sends with `!`.
    pub fn format_message_line(message: &Message) -> String {
        let marker = if message.send_failed {
            "! "
        } else if message.id.is_pending() {
            "… "
        } else {
            ""
        };
        let body = match message.message_type {
            MessageType::Audio => format!("[voice] {}", message.content),
            MessageType::Image => format!("[image] {}", message.content),
            MessageType::Video => format!("[video] {}", message.content),
            MessageType::System => format!("* {}", message.content),
            MessageType::Text => message.content.clone(),
        };
        format!(
            "{}[{}] @{}: {}",
            marker,
            Self::format_timestamp(message.timestamp.value()),
            message.sender_name,
            body
        )
    }

    /// Format a normalized feed event
    pub fn format_feed_event(event: &FeedEvent) -> String {
        match event {
            FeedEvent::Insert(message) => format!("+ {}", Self::format_message_line(message)),
            FeedEvent::Update(message) => format!("~ {}", Self::format_message_line(message)),
            FeedEvent::Delete(id) => format!("- message {} deleted", id),
            FeedEvent::Reconciled { local_id, message } => format!(
                "✓ {} confirmed as {}",
                local_id,
                message.id
            ),
        }
    }

    /// Format a subscription state change
    pub fn format_status(room: &str, state: &SubscriptionState) -> String {
        let detail = match state {
            SubscriptionState::Disconnected {
                reason,
                failed_attempts,
            } => format!(" ({}; {} failed attempts)", reason, failed_attempts),
            SubscriptionState::Reconnecting { attempt } => format!(" (attempt {})", attempt),
            _ => String::new(),
        };
        format!("[#{}] {}{}", room, state.status().as_str(), detail)
    }

    /// Format a waveform frame as a bar strip with a progress percentage
    ///
    /// Played bars are drawn solid, the rest light.
    pub fn format_waveform(frame: &WaveformFrame) -> String {
        const LEVELS: [char; 4] = ['▁', '▃', '▅', '▇'];
        const UNPLAYED: [char; 4] = ['.', ':', '|', '¦'];

        let strip: String = frame
            .bars
            .iter()
            .enumerate()
            .map(|(i, bar)| {
                let level = ((bar.clamp(0.0, 1.0) * 3.0).round() as usize).min(3);
                if i < frame.active_bars {
                    LEVELS[level]
                } else {
                    UNPLAYED[level]
                }
            })
            .collect();
        format!("{} {:>3}%", strip, (frame.position * 100.0).round() as u32)
    }

    /// Format the playback session for the status line
    pub fn format_playback(session: &PlaybackSession) -> String {
        let Some(message_id) = &session.current_message_id else {
            return format!("stopped ({})", session.playback_rate);
        };
        let state = if let Some(error) = &session.error {
            format!("error: {}", error)
        } else if session.is_loading {
            "loading".to_string()
        } else if session.is_paused {
            "paused".to_string()
        } else if session.is_playing {
            "playing".to_string()
        } else {
            "idle".to_string()
        };
        format!(
            "{} {} {:.1}/{:.1}s ({})",
            message_id, state, session.current_time, session.duration, session.playback_rate
        )
    }

    /// Format a room summary line for the room list
    pub fn format_room_summary(room: &Room) -> String {
        match &room.last_message {
            Some(preview) => format!(
                "#{} - {}: {}",
                room.name, preview.sender_name, preview.text
            ),
            None => format!("#{} - (no messages)", room.name),
        }
    }

    fn format_timestamp(timestamp_millis: i64) -> String {
        timestamp_to_rfc3339(timestamp_millis).unwrap_or_else(|| timestamp_millis.to_string())
    }
}
