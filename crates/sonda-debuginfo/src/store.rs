use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sonda_process::{BuildId, DebugInfoService, ObjectFile};

/// Name of the debug information file, within a build ID directory.
const DEBUGINFO_FILE_NAME: &str = "debuginfo";

/// Debug information service backed by local directories.
///
/// Files are laid out as `<dir>/<build-id>/debuginfo`, in both the cache
/// and the store directories.
#[derive(Debug, Clone)]
pub struct LocalStore {
    /// Directory containing the extracted debug information.
    cache_dir: PathBuf,

    /// Directory containing the uploaded debug information.
    store_dir: PathBuf,
}

impl LocalStore {
    /// Creates a new store.
    pub fn new(cache_dir: impl Into<PathBuf>, store_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            store_dir: store_dir.into(),
        }
    }

    /// Returns the path of the extracted debug information of the given
    /// build ID.
    pub fn cached_path(&self, build_id: &BuildId) -> PathBuf {
        self.cache_dir
            .join(build_id.as_str())
            .join(DEBUGINFO_FILE_NAME)
    }

    /// Returns the path of the uploaded debug information of the given build
    /// ID.
    pub fn stored_path(&self, build_id: &BuildId) -> PathBuf {
        self.store_dir
            .join(build_id.as_str())
            .join(DEBUGINFO_FILE_NAME)
    }
}

impl DebugInfoService for LocalStore {
    type Error = crate::Error;

    async fn extract_or_find(&self, root: &Path, object_file: &ObjectFile) -> crate::Result<()> {
        let build_id = build_id(object_file)?;
        let cached_path = self.cached_path(build_id);

        if exists(&cached_path).await? {
            tracing::trace!(path = %cached_path.display(), "debug information found");
            return Ok(());
        }

        let path = object_file.path();
        let host_path = root.join(path.strip_prefix("/").unwrap_or(path));

        copy_file(&host_path, &cached_path).await?;

        tracing::debug!(path = %cached_path.display(), "debug information extracted");

        Ok(())
    }

    async fn upload(&self, object_file: &ObjectFile) -> crate::Result<()> {
        let build_id = build_id(object_file)?;
        let stored_path = self.stored_path(build_id);

        if exists(&stored_path).await? {
            tracing::debug!(%build_id, "debug information already uploaded");
            return Ok(());
        }

        copy_file(&self.cached_path(build_id), &stored_path).await?;

        tracing::debug!(path = %stored_path.display(), "debug information uploaded");

        Ok(())
    }
}

fn build_id(object_file: &ObjectFile) -> crate::Result<&BuildId> {
    object_file
        .build_id()
        .ok_or_else(|| crate::Error::MissingBuildId(object_file.path().to_path_buf()))
}

async fn exists(path: &Path) -> crate::Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| crate::Error::File(path.to_path_buf(), e))
}

/// Copies `src` into `dst`, so that `dst` is either missing or complete.
///
/// Concurrent copies into the same destination are allowed, as long as they
/// copy the same content.
async fn copy_file(src: &Path, dst: &Path) -> crate::Result<()> {
    static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

    let dir = dst.parent().unwrap_or(Path::new("."));

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| crate::Error::File(dir.to_path_buf(), e))?;

    let tmp_path = dir.join(format!(
        ".{DEBUGINFO_FILE_NAME}.{}.{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = tokio::fs::copy(src, &tmp_path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(crate::Error::File(src.to_path_buf(), e));
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, dst).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(crate::Error::File(dst.to_path_buf(), e));
    }

    Ok(())
}
