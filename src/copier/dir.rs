//! Local directory backend
//!
//! Blobs live at `<root>/<hex[0..2]>/<hex>`. Writes go to a temporary file in
//! the same directory and are renamed into place, so a listed blob is always
//! complete.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{Copier, CopierId};
use crate::chunk::Hash;
use crate::error::{Error, Result};

const TMP_SUFFIX: &str = ".tmp";

/// Backend storing blobs as files under a root directory
pub struct DirCopier {
    id: CopierId,
    root: PathBuf,
}

impl DirCopier {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: CopierId::new(id),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding `hash`
    pub fn path_for(&self, hash: &Hash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }
}

#[async_trait]
impl Copier for DirCopier {
    fn id(&self) -> &CopierId {
        &self.id
    }

    async fn ls(&self) -> Result<Vec<(Hash, u64)>> {
        let mut out = Vec::new();
        let mut shards = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.ends_with(TMP_SUFFIX) {
                    continue;
                }
                match name.parse::<Hash>() {
                    Ok(hash) => out.push((hash, file.metadata().await?.len())),
                    Err(_) => debug!(file = name, "skipping foreign file"),
                }
            }
        }
        Ok(out)
    }

    async fn put(&self, hash: Hash, data: Bytes) -> Result<()> {
        let path = self.path_for(&hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("{:08x}{}", rand::random::<u32>(), TMP_SUFFIX));
        if let Err(e) = write_then_rename(&tmp, &path, &data).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                debug!(file = %tmp.display(), error = %cleanup, "temp file not removed");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, hash: Hash) -> Result<Bytes> {
        match fs::read(self.path_for(&hash)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound {
                copier: self.id.to_string(),
                hash,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_then_rename(tmp: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let copier = DirCopier::new("d", dir.path());
        let hash = Hash::of(b"on disk");

        assert!(copier.ls().await.unwrap().is_empty());
        copier.put(hash, Bytes::from_static(b"on disk")).await.unwrap();

        assert!(copier.path_for(&hash).exists());
        assert_eq!(copier.get(hash).await.unwrap(), "on disk");
        assert_eq!(copier.ls().await.unwrap(), vec![(hash, 7)]);
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let copier = DirCopier::new("d", dir.path().join("absent"));
        assert!(copier.ls().await.unwrap().is_empty());
        assert_matches!(copier.get(Hash::of(b"nope")).await, Err(Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_failed_put_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let copier = DirCopier::new("d", dir.path());
        let hash = Hash::of(b"blocked");

        // A non-empty directory where the blob belongs makes the rename fail.
        let target = copier.path_for(&hash);
        std::fs::create_dir_all(target.join("occupied")).unwrap();

        assert!(copier.put(hash, Bytes::from_static(b"blocked")).await.is_err());
        let parent = target.parent().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(parent)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(TMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }
}
