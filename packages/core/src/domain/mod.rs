//! ドメイン層
//!
//! エンティティ・値オブジェクト・純粋な状態遷移と、外部協調者へのポート（trait）を定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。

pub mod audio;
pub mod backend;
pub mod connection;
pub mod entity;
pub mod error;
pub mod feed;
pub mod playback;
pub mod preference;
pub mod publisher;
pub mod repository;
pub mod value_object;
pub mod waveform;

pub use audio::{AudioDevice, AudioHandle, AudioStatus};
pub use backend::{
    BackendSubscription, ChatBackend, HistoryQuery, LiveEvent, RawChangeEvent, SignalStream,
    SortOrder, SubscriptionId, SubscriptionSignal,
};
pub use connection::{BackoffPolicy, ConnectionStatus, LinkTrigger, ReconnectBackoff, SubscriptionState};
pub use entity::{
    GeoLocation, Message, MessagePreview, MessageType, OutgoingMessage, Reaction, Room, RoomType,
};
pub use error::{
    AudioError, BackendError, ConversionError, InvalidTransition, PreferenceError,
    PublishError, RepositoryError, ValueObjectError,
};
pub use feed::{FeedChange, FeedEvent, FeedMutation, MessageFeed, PageKind};
pub use playback::{PlaybackError, PlaybackSession};
pub use preference::PreferenceStore;
pub use publisher::{FeedEventChannel, FeedEventPublisher};
pub use repository::FeedRepository;
pub use value_object::{MessageId, PlaybackRate, RoomId, Timestamp, UserId};
