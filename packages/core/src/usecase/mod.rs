//! UseCase 層
//!
//! ドメイン層のポートを組み合わせて、フィードの読み込み・ライブイベントのマージ・
//! 購読の監視・ボイスメッセージの再生制御を提供します。

pub mod error;
pub mod load_history;
pub mod merge_events;
pub mod playback_engine;
pub mod room_coordinator;
pub mod send_message;
pub mod waveform_progress;

pub use error::{CoordinatorError, HistoryError, MergeError, SendMessageError};
pub use load_history::{LoadHistoryUseCase, OlderPage};
pub use merge_events::{LinkEvent, LinkEventSender, MessageMerger, SubscriptionHandle};
pub use playback_engine::{AudioPlaybackEngine, PlaybackConfig};
pub use room_coordinator::{RoomCoordinator, RoomStatusReceiver};
pub use send_message::SendMessageUseCase;
pub use waveform_progress::{WaveformConfig, WaveformFrame, WaveformProgressController};
