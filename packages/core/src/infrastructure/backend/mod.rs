//! チャットバックエンドの実装
//!
//! - `inmemory`: プロセス内で完結するバックエンド（テスト・デモ用）

pub mod inmemory;

pub use inmemory::InMemoryChatBackend;
