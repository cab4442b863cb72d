//! 再生速度設定ストアの実装

pub mod inmemory;
pub mod json_file;

pub use inmemory::InMemoryPreferenceStore;
pub use json_file::JsonFilePreferenceStore;
