//! JSON ファイルに保存する Preference Store 実装
//!
//! ファイル形式: `{ "playback_rate": 1.5 }`
//!
//! 書き込みは一時ファイルに書いてから置き換えるため、途中で中断しても
//! 以前の内容か新しい内容のどちらかが残ります。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{PlaybackRate, PreferenceError, PreferenceStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferenceFile {
    #[serde(default)]
    playback_rate: Option<f64>,
}

/// JSON ファイル Preference Store 実装
pub struct JsonFilePreferenceStore {
    path: PathBuf,
}

impl JsonFilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<PreferenceFile>, PreferenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PreferenceStore for JsonFilePreferenceStore {
    async fn load_playback_rate(&self) -> Result<Option<PlaybackRate>, PreferenceError> {
        let Some(file) = self.read().await? else {
            return Ok(None);
        };
        file.playback_rate
            .map(PlaybackRate::try_from)
            .transpose()
            .map_err(PreferenceError::from)
    }

    async fn save_playback_rate(&self, rate: PlaybackRate) -> Result<(), PreferenceError> {
        // 他の項目が将来増えても失わないよう、読めた内容に上書きする
        let mut file = match self.read().await {
            Ok(existing) => existing.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(
                    "Overwriting unreadable preference file {}: {}",
                    self.path.display(),
                    e
                );
                PreferenceFile::default()
            }
        };
        file.playback_rate = Some(rate.as_f64());

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(
            "Saved playback rate {} to {}",
            rate,
            self.path.display()
        );
        Ok(())
    }
}
