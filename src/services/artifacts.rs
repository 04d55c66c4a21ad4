use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// A destination file written through a sibling `.part` file.
///
/// The real path only appears after [`StagedFile::commit`]; dropping an
/// uncommitted stage removes the partial file.
pub struct StagedFile {
    target: PathBuf,
    file: File,
    cleanup: PartialFile,
}

/// Removes the staging path on drop unless disarmed.
struct PartialFile(Option<PathBuf>);

impl Drop for PartialFile {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl StagedFile {
    /// Open a stage for `target`, creating its parent directory if needed.
    pub async fn create(target: &Path) -> std::io::Result<Self> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut staging = target.as_os_str().to_owned();
        staging.push(".part");
        let staging = PathBuf::from(staging);

        let file = File::create(&staging).await?;
        Ok(Self {
            target: target.to_path_buf(),
            file,
            cleanup: PartialFile(Some(staging)),
        })
    }

    pub fn writer(&mut self) -> &mut File {
        &mut self.file
    }

    /// Flush, sync and move the stage onto the target. Fails with
    /// `InvalidData` if nothing was written.
    pub async fn commit(self) -> std::io::Result<u64> {
        let StagedFile {
            target,
            mut file,
            mut cleanup,
        } = self;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let Some(staging) = cleanup.0.clone() else {
            return Err(std::io::Error::other("stage already committed"));
        };

        let size = fs::metadata(&staging).await?.len();
        if size == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "refusing to publish an empty file",
            ));
        }

        fs::rename(&staging, &target).await?;
        cleanup.0 = None;
        Ok(size)
    }
}

/// Write `value` as pretty JSON to `target` through a stage.
pub async fn write_json_snapshot<T: Serialize>(target: &Path, value: &T) -> std::io::Result<u64> {
    let bytes = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    let mut stage = StagedFile::create(target).await?;
    stage.writer().write_all(&bytes).await?;
    stage.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_commit_publishes_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out/mesh.obj");

        let mut stage = StagedFile::create(&target).await.unwrap();
        stage.writer().write_all(b"v 0 0 0\n").await.unwrap();
        let size = stage.commit().await.unwrap();

        assert_eq!(size, 8);
        assert_eq!(std::fs::read(&target).unwrap(), b"v 0 0 0\n");
        assert!(!dir.path().join("nested/out/mesh.obj.part").exists());
    }

    #[tokio::test]
    async fn test_empty_stage_is_rejected_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("mesh.obj");

        let stage = StagedFile::create(&target).await.unwrap();
        let err = stage.commit().await.unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(!target.exists());
        assert!(!dir.path().join("mesh.obj.part").exists());
    }

    #[tokio::test]
    async fn test_dropped_stage_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("mesh.obj");
        {
            let mut stage = StagedFile::create(&target).await.unwrap();
            stage.writer().write_all(b"partial").await.unwrap();
        }
        assert!(!target.exists());
        assert!(!dir.path().join("mesh.obj.part").exists());
    }

    #[tokio::test]
    async fn test_commit_overwrites_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("uv_info.json");
        std::fs::write(&target, "stale").unwrap();

        write_json_snapshot(&target, &json!({"num_components": 3}))
            .await
            .unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&target).unwrap()).unwrap();
        assert_eq!(written, json!({"num_components": 3}));
    }
}
