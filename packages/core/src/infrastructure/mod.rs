//! Infrastructure 層
//!
//! ドメイン層が定義するポート（trait）の具体的な実装を提供します。
//!
//! - `backend`: インメモリのチャットバックエンド（履歴・購読・挿入）
//! - `repository`: Room ごとのフィードストア
//! - `publisher`: 正規化イベントのチャンネル配信
//! - `preference`: 再生速度の永続化
//! - `audio`: シミュレーションの音声デバイス
//! - `dto`: バックエンドのペイロードとドメインモデルの変換

pub mod audio;
pub mod backend;
pub mod dto;
pub mod preference;
pub mod publisher;
pub mod repository;
