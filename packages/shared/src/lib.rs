//! Idobata の各パッケージで共有するユーティリティ。
//!
//! - `logger`: tracing subscriber の初期化
//! - `time`: 時刻の抽象化（テスト用の固定時計を含む）

pub mod logger;
pub mod time;
