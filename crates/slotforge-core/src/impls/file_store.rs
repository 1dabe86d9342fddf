//! File-based slot storage.
//!
//! Each slot is two files in the slots directory:
//! - `{id}.info.json`: the `SlotInfo` as JSON
//! - `{id}.sav`: the encoded payload bytes
//!
//! Writes go to a `.tmp` sibling first and are renamed into place, so a
//! reader never sees a half-written file. A slot write stages both files
//! before renaming either, and keeps the previous payload as a `.bak`
//! sibling until the info rename has landed, so a failed write leaves the
//! slot as it was.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::{SlotId, SlotInfo, StoreError};
use crate::ports::SlotStore;

const INFO_SUFFIX: &str = ".info.json";
const DATA_SUFFIX: &str = ".sav";

#[derive(Debug, Clone)]
pub struct FileSlotStore {
    dir: PathBuf,
}

impl FileSlotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn info_path(&self, id: SlotId) -> PathBuf {
        self.dir.join(format!("{}{INFO_SUFFIX}", id.get()))
    }

    fn data_path(&self, id: SlotId) -> PathBuf {
        self.dir.join(format!("{}{DATA_SUFFIX}", id.get()))
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))
    }

    /// Write `bytes` to the `.tmp` sibling of `path`. A failed write leaves
    /// no temp file behind.
    async fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let temp_path = sibling(path, ".tmp");
        if let Err(e) = fs::write(&temp_path, bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&temp_path, e));
        }
        Ok(temp_path)
    }

    /// Rename both staged files into place. On error the previous payload
    /// (if any) is put back.
    async fn commit(
        &self,
        id: SlotId,
        data_temp: &Path,
        info_temp: &Path,
    ) -> Result<(), StoreError> {
        let data_path = self.data_path(id);
        let info_path = self.info_path(id);
        let backup = sibling(&data_path, ".bak");

        let had_payload = match fs::rename(&data_path, &backup).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(StoreError::io(&data_path, e)),
        };
        let renamed = match fs::rename(data_temp, &data_path).await {
            Ok(()) => fs::rename(info_temp, &info_path)
                .await
                .map_err(|e| StoreError::io(&info_path, e)),
            Err(e) => Err(StoreError::io(&data_path, e)),
        };
        if let Err(err) = renamed {
            // 旧 payload に戻す（無かったなら新しい payload を消す）
            let restored = if had_payload {
                fs::rename(&backup, &data_path).await
            } else {
                remove_if_exists(&data_path).await
            };
            if let Err(e) = restored {
                warn!(slot = %id, error = %e, "could not roll back slot payload");
            }
            return Err(err);
        }
        if had_payload {
            let _ = fs::remove_file(&backup).await;
        }
        Ok(())
    }

    async fn read(&self, id: SlotId, path: &Path) -> Result<Vec<u8>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

#[async_trait]
impl SlotStore for FileSlotStore {
    async fn exists(&self, id: SlotId) -> bool {
        fs::try_exists(self.info_path(id)).await.unwrap_or(false)
    }

    async fn read_info(&self, id: SlotId) -> Result<SlotInfo, StoreError> {
        let bytes = self.read(id, &self.info_path(id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn read_data(&self, id: SlotId) -> Result<Vec<u8>, StoreError> {
        self.read(id, &self.data_path(id)).await
    }

    async fn write_slot(&self, info: &SlotInfo, bytes: &[u8]) -> Result<(), StoreError> {
        let info_bytes = serde_json::to_vec_pretty(info)?;
        self.ensure_dir().await?;

        let data_temp = Self::stage(&self.data_path(info.id), bytes).await?;
        let written = match Self::stage(&self.info_path(info.id), &info_bytes).await {
            Ok(info_temp) => {
                let committed = self.commit(info.id, &data_temp, &info_temp).await;
                if committed.is_err() {
                    let _ = fs::remove_file(&info_temp).await;
                }
                committed
            }
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            let _ = fs::remove_file(&data_temp).await;
            return Err(err);
        }
        debug!(slot = %info.id, bytes = bytes.len(), "slot written");
        Ok(())
    }

    async fn delete(&self, id: SlotId) -> Result<(), StoreError> {
        let info_path = self.info_path(id);
        if !fs::try_exists(&info_path)
            .await
            .map_err(|e| StoreError::io(&info_path, e))?
        {
            return Err(StoreError::NotFound(id));
        }
        // payload から消す（info が残っている間は slot として見える）
        let data_path = self.data_path(id);
        remove_if_exists(&data_path)
            .await
            .map_err(|e| StoreError::io(&data_path, e))?;
        fs::remove_file(&info_path)
            .await
            .map_err(|e| StoreError::io(&info_path, e))
    }

    async fn list_ids(&self) -> Result<BTreeSet<SlotId>, StoreError> {
        let mut ids = BTreeSet::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(INFO_SUFFIX)) else {
                continue;
            };
            // info_path と同じ綴りの非負 id だけを slot とみなす
            match stem.parse::<i32>() {
                Ok(id) if id >= 0 && id.to_string() == stem => {
                    ids.insert(SlotId::new(id));
                }
                _ => warn!(file = %entry.path().display(), "ignoring unrecognized slot file"),
            }
        }
        Ok(ids)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
