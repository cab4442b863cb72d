//! 音声デバイスの実装
//!
//! - `simulated`: tokio の時計で再生位置を進めるデバイス（テスト・デモ用）

pub mod simulated;

pub use simulated::{SimulatedAudioDevice, SimulatedAudioHandle};
